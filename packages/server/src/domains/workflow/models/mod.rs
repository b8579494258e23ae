pub mod audit_entry;
pub mod request;
pub mod request_approval;
pub mod workflow;
pub mod workflow_step;

pub use audit_entry::*;
pub use request::*;
pub use request_approval::*;
pub use workflow::*;
pub use workflow_step::*;
