//! Typed ID definitions for the approval workflow entities.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for workflow definitions.
pub struct Workflow;

/// Marker type for a single step of a workflow definition.
pub struct WorkflowStep;

/// Marker type for submitted requests moving through a workflow.
pub struct Request;

/// Marker type for per-step approval rows.
pub struct RequestApproval;

/// Marker type for portal members (submitters and approvers).
pub struct Member;

/// Marker type for workflow audit log entries.
pub struct AuditEntry;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

pub type WorkflowId = Id<Workflow>;

pub type StepId = Id<WorkflowStep>;

pub type RequestId = Id<Request>;

pub type ApprovalId = Id<RequestApproval>;

/// Identity supplied by the external identity service.
pub type MemberId = Id<Member>;

pub type AuditEntryId = Id<AuditEntry>;
