pub mod authorization;
pub mod dashboard;
pub mod directory;
pub mod engine;
pub mod validation;
pub mod view;

pub use authorization::{can_act, ensure_can_act, ensure_can_manage_flows, ensure_can_reset};
pub use dashboard::{summarize, DashboardSummary, PendingAssignment, PendingItem};
pub use directory::{Directory, InMemoryDirectory};
pub use engine::{
    ApprovalEngine, ApprovalSnapshot, Decision, DecisionOutcome, DecisionPlan, ResetPlan,
    StartPlan,
};
pub use validation::{validate_remarks, FlowInput, StepInput, ValidationLimits};
pub use view::{CurrentStepView, FlowView, StepView, SubjectApprovalView};
