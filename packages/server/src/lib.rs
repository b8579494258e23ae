// Approval Workflow Engine - API Core
//
// Moves requests through ordered chains of approval steps, audits every
// transition, and detects and repairs requests whose stored state has
// drifted from their approval history.

pub mod common;
pub mod config;
pub mod domains;
pub mod server;

pub use config::*;
