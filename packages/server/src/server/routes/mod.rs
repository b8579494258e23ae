// HTTP routes
pub mod health;
pub mod workflow;

pub use health::*;
pub use workflow::*;
