use serde::{Deserialize, Serialize};

use crate::approvals::directory::Directory;
use crate::domain::approval::{ApprovalRecord, ApprovalState};
use crate::domain::flow::{ApprovalFlow, ApprovalFlowStep, Assignee, StepId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepView {
    pub id: StepId,
    pub order: u32,
    pub assignee: Assignee,
    pub assigned_to: String,
}

impl StepView {
    pub fn build<D>(step: &ApprovalFlowStep, directory: &D) -> Self
    where
        D: Directory + ?Sized,
    {
        Self {
            id: step.id,
            order: step.order,
            assignee: step.assignee.clone(),
            assigned_to: directory.assignee_label(&step.assignee),
        }
    }
}

/// A flow with display names resolved, as the flow admin page lists it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowView {
    #[serde(flatten)]
    pub flow: ApprovalFlow,
    pub step_views: Vec<StepView>,
}

impl FlowView {
    pub fn build<D>(flow: ApprovalFlow, directory: &D) -> Self
    where
        D: Directory + ?Sized,
    {
        let step_views = flow.steps.iter().map(|step| StepView::build(step, directory)).collect();
        Self { flow, step_views }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStepView {
    pub assignee: Assignee,
    pub assigned_to: String,
    /// 1-based position among the flow's steps.
    pub position: usize,
    pub total_steps: usize,
}

/// Read model for one subject's approval progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectApprovalView {
    pub approval_state: Option<ApprovalState>,
    pub current_step: Option<CurrentStepView>,
    pub approvals: Vec<ApprovalRecord>,
    pub has_approval_flow: bool,
    pub is_approval_complete: bool,
    pub is_approval_pending: bool,
    pub is_approval_rejected: bool,
}

impl SubjectApprovalView {
    pub fn build<D>(
        state: Option<ApprovalState>,
        flow: Option<&ApprovalFlow>,
        approvals: Vec<ApprovalRecord>,
        directory: &D,
    ) -> Self
    where
        D: Directory + ?Sized,
    {
        let current_step = match (&state, flow) {
            (Some(state), Some(flow)) if state.is_pending() => {
                flow.step_at(state.current_order).map(|step| CurrentStepView {
                    assignee: step.assignee.clone(),
                    assigned_to: directory.assignee_label(&step.assignee),
                    position: flow.position_of(step.order).unwrap_or(1),
                    total_steps: flow.steps.len(),
                })
            }
            _ => None,
        };

        Self {
            has_approval_flow: state.as_ref().is_some_and(|state| state.flow_id.is_some()),
            is_approval_complete: state.as_ref().is_some_and(ApprovalState::is_approved),
            is_approval_pending: state.as_ref().is_some_and(ApprovalState::is_pending),
            is_approval_rejected: state.as_ref().is_some_and(ApprovalState::is_rejected),
            approval_state: state,
            current_step,
            approvals,
        }
    }
}
