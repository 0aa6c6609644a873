use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::authorization::can_act;
use crate::domain::actor::Actor;
use crate::domain::approval::ApprovalState;
use crate::domain::flow::{ApprovalFlowStep, Assignee, FlowId};
use crate::domain::subject::{SubjectKind, SubjectRef};

/// A pending subject joined with the step it is waiting on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAssignment {
    pub state: ApprovalState,
    pub step: ApprovalFlowStep,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub subject: SubjectRef,
    pub flow_id: Option<FlowId>,
    pub step_order: u32,
    pub assignee: Assignee,
    pub waiting_since: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub pending_count: usize,
    pub pending_by_type: BTreeMap<SubjectKind, usize>,
    pub recent_pending: Vec<PendingItem>,
}

/// Projects pending assignments onto what `actor` can act on right now.
pub fn summarize(
    actor: &Actor,
    pending: impl IntoIterator<Item = PendingAssignment>,
    recent_limit: usize,
) -> DashboardSummary {
    let mut actionable: Vec<PendingItem> = pending
        .into_iter()
        .filter(|assignment| assignment.state.is_pending())
        .filter(|assignment| assignment.step.order == assignment.state.current_order)
        .filter(|assignment| can_act(actor, &assignment.step.assignee))
        .map(|assignment| PendingItem {
            subject: assignment.state.subject,
            flow_id: assignment.state.flow_id,
            step_order: assignment.step.order,
            assignee: assignment.step.assignee,
            waiting_since: assignment.state.updated_at,
        })
        .collect();

    let mut pending_by_type = BTreeMap::new();
    for item in &actionable {
        *pending_by_type.entry(item.subject.kind).or_insert(0) += 1;
    }

    actionable.sort_by(|left, right| {
        right.waiting_since.cmp(&left.waiting_since).then_with(|| left.subject.cmp(&right.subject))
    });
    let pending_count = actionable.len();
    actionable.truncate(recent_limit);

    DashboardSummary { pending_count, pending_by_type, recent_pending: actionable }
}
