pub mod actions;
pub mod error;
pub mod machines;
pub mod models;
pub mod store;

// Re-export errors
pub use error::WorkflowError;

// Re-export the planner
pub use machines::{ApprovalMachine, Transition};

// Re-export storage contracts
pub use store::{MemoryWorkflowStore, PgWorkflowStore, WorkflowStore, WorkflowTx};
