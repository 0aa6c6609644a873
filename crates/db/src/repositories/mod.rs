use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use signoff_core::approvals::dashboard::PendingAssignment;
use signoff_core::approvals::engine::{ApprovalSnapshot, DecisionPlan, ResetPlan, StartPlan};
use signoff_core::domain::approval::{ApprovalRecord, ApprovalState};
use signoff_core::domain::flow::{ApprovalFlow, FlowDraft, FlowId, FlowScope};
use signoff_core::domain::subject::SubjectRef;

pub mod approval;
pub mod flow;
pub mod memory;
mod rows;

pub use approval::SqlApprovalRepository;
pub use flow::SqlFlowRepository;
pub use memory::InMemoryApprovalStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("an approval flow already exists for {0}")]
    DuplicateScope(FlowScope),
    #[error("approval flow {0} not found")]
    FlowNotFound(FlowId),
    #[error("approval flow {flow_id} has {in_flight} unfinished approval(s)")]
    FlowInUse { flow_id: FlowId, in_flight: u64 },
    #[error("approval for {subject} changed since version {expected_version}")]
    Conflict { subject: SubjectRef, expected_version: i64 },
}

/// Result of persisting a [`StartPlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Created(ApprovalState),
    /// Another caller attached the subject first; its state is left untouched.
    Existing(ApprovalState),
}

impl StartOutcome {
    pub fn into_state(self) -> ApprovalState {
        match self {
            Self::Created(state) | Self::Existing(state) => state,
        }
    }
}

/// Everything a subject's approval view shows, read in one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalHistory {
    pub state: ApprovalState,
    pub flow: Option<ApprovalFlow>,
    /// Ledger, oldest step first.
    pub records: Vec<ApprovalRecord>,
}

#[async_trait]
pub trait FlowRepository: Send + Sync {
    /// Inserts the flow and all of its steps in one transaction.
    async fn create(&self, draft: FlowDraft, now: DateTime<Utc>)
        -> Result<ApprovalFlow, RepositoryError>;

    /// Rewrites the flow header and replaces its whole step collection.
    ///
    /// Refused with [`RepositoryError::FlowInUse`] while any subject on the
    /// flow is pending or rejected.
    async fn replace(
        &self,
        id: FlowId,
        draft: FlowDraft,
        now: DateTime<Utc>,
    ) -> Result<ApprovalFlow, RepositoryError>;

    async fn delete(&self, id: FlowId) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: FlowId) -> Result<Option<ApprovalFlow>, RepositoryError>;

    async fn find_by_scope(&self, scope: &FlowScope)
        -> Result<Option<ApprovalFlow>, RepositoryError>;

    async fn list(&self) -> Result<Vec<ApprovalFlow>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_state(&self, subject: SubjectRef)
        -> Result<Option<ApprovalState>, RepositoryError>;

    /// State, its flow with ordered steps, and the open record, read together.
    async fn find_snapshot(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<ApprovalSnapshot>, RepositoryError>;

    /// State, flow and ledger as of a single committed point.
    async fn find_history(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<ApprovalHistory>, RepositoryError>;

    /// Ledger for `subject`, oldest first.
    async fn list_records(&self, subject: SubjectRef)
        -> Result<Vec<ApprovalRecord>, RepositoryError>;

    async fn start(&self, plan: &StartPlan) -> Result<StartOutcome, RepositoryError>;

    /// Commits a decision if the state is still at `plan.expected_version`.
    async fn apply_decision(&self, plan: &DecisionPlan) -> Result<ApprovalState, RepositoryError>;

    /// Commits a reset, discarding every prior record for the subject.
    async fn apply_reset(&self, plan: &ResetPlan) -> Result<ApprovalState, RepositoryError>;

    /// Every pending state joined with the step at its current order.
    async fn list_pending(&self) -> Result<Vec<PendingAssignment>, RepositoryError>;
}
