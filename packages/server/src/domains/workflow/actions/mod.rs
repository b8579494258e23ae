//! Workflow actions - entry-point business logic
//!
//! Each action opens its own unit of work on a [`WorkflowStore`] and either
//! commits everything it wrote or nothing at all.
//!
//! [`WorkflowStore`]: crate::domains::workflow::store::WorkflowStore

pub mod advance;
pub mod diagnose;
pub mod repair;
pub mod submit;
mod transition;

#[cfg(test)]
pub(crate) mod testing;

pub use advance::{advance, AdvanceInput, TransitionResult};
pub use diagnose::{analyze, diagnose, scan_stuck, DiagnosticIssue, DiagnosticReport};
pub use repair::{repair, RepairResult};
pub use submit::{submit, SubmitInput};
