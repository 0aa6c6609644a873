pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;

pub use approvals::{
    ApprovalEngine, ApprovalSnapshot, DashboardSummary, Decision, DecisionOutcome, Directory,
    FlowInput, FlowView, InMemoryDirectory, StepInput, SubjectApprovalView, ValidationLimits,
};
pub use domain::actor::{Actor, Capability};
pub use domain::approval::{ApprovalRecord, ApprovalState, ApprovalStatus, RecordId, StateId};
pub use domain::flow::{
    ApprovalFlow, ApprovalFlowStep, ApprovalModule, Assignee, FlowId, FlowScope, RoleKey, StepId,
    UserId,
};
pub use domain::subject::{SubjectKind, SubjectRef};
pub use errors::{ApplicationError, ApprovalError, FieldViolation, InterfaceError};
pub use notify::{ApprovalEvent, ApprovalNotifier};
