use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::flow::{Assignee, FlowId, UserId};
use crate::domain::subject::SubjectRef;

/// Outbound events for notification dispatchers and domain controllers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEvent {
    /// The sequence moved on; `next_assignee` should be told it has work.
    StepAdvanced {
        subject: SubjectRef,
        flow_id: FlowId,
        step_order: u32,
        next_assignee: Assignee,
        decided_by: UserId,
    },
    /// The last step was approved.
    WorkflowCompleted { subject: SubjectRef, flow_id: FlowId, decided_by: UserId },
    WorkflowRejected { subject: SubjectRef, flow_id: FlowId, decided_by: UserId },
}

impl ApprovalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StepAdvanced { .. } => "approval.step_advanced",
            Self::WorkflowCompleted { .. } => "approval.workflow_completed",
            Self::WorkflowRejected { .. } => "approval.workflow_rejected",
        }
    }

    pub fn subject(&self) -> SubjectRef {
        match self {
            Self::StepAdvanced { subject, .. }
            | Self::WorkflowCompleted { subject, .. }
            | Self::WorkflowRejected { subject, .. } => *subject,
        }
    }
}

pub trait ApprovalNotifier: Send + Sync {
    fn notify(&self, event: ApprovalEvent);
}

/// Logs each event; the default when no dispatcher is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl ApprovalNotifier for TracingNotifier {
    fn notify(&self, event: ApprovalEvent) {
        let subject = event.subject();
        info!(
            event_name = event.name(),
            subject_type = subject.kind.as_str(),
            subject_id = subject.id,
            "approval event dispatched"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    events: Arc<Mutex<Vec<ApprovalEvent>>>,
}

impl InMemoryNotifier {
    pub fn events(&self) -> Vec<ApprovalEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ApprovalNotifier for InMemoryNotifier {
    fn notify(&self, event: ApprovalEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
