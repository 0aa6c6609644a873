//! Deterministic approval state machine.
//!
//! The engine never touches storage. It reads a snapshot of one subject's
//! approval data and returns a plan; the repository commits the plan in a
//! single transaction guarded by `expected_version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::authorization::{ensure_can_act, ensure_can_reset};
use crate::domain::actor::Actor;
use crate::domain::approval::{
    ApprovalRecord, ApprovalState, ApprovalStatus, NewApprovalRecord, StateId,
};
use crate::domain::flow::{ApprovalFlow, ApprovalFlowStep, Assignee, FlowId};
use crate::domain::subject::SubjectRef;
use crate::errors::ApprovalError;

/// Everything the engine needs to know about one subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalSnapshot {
    pub state: ApprovalState,
    /// `None` when the flow the state points at no longer exists.
    pub flow: Option<ApprovalFlow>,
    /// The pending record for the current step, if one is open.
    pub open_record: Option<ApprovalRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    fn record_status(&self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartPlan {
    pub subject: SubjectRef,
    pub flow_id: FlowId,
    pub first_order: u32,
    pub first_record: NewApprovalRecord,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Advanced { from_order: u32, to_order: u32, next_assignee: Assignee },
    Completed,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionPlan {
    pub state_id: StateId,
    pub expected_version: i64,
    /// State as it reads after the commit, version already bumped.
    pub next_state: ApprovalState,
    pub closed_record: ApprovalRecord,
    pub opened_record: Option<NewApprovalRecord>,
    pub outcome: DecisionOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResetPlan {
    pub state_id: StateId,
    pub expected_version: i64,
    pub next_state: ApprovalState,
    pub opened_record: NewApprovalRecord,
    pub previous_status: ApprovalStatus,
    pub previous_order: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalEngine;

impl ApprovalEngine {
    pub fn new() -> Self {
        Self
    }

    /// Plans entry into `flow` at its lowest step order.
    pub fn start(
        &self,
        subject: SubjectRef,
        flow: &ApprovalFlow,
        now: DateTime<Utc>,
    ) -> Result<StartPlan, ApprovalError> {
        let first = flow.first_step().ok_or_else(|| {
            ApprovalError::integrity(subject, format!("approval flow {} has no steps", flow.id))
        })?;

        Ok(StartPlan {
            subject,
            flow_id: flow.id,
            first_order: first.order,
            first_record: open_record(subject, first, now),
            started_at: now,
        })
    }

    /// Plans an approve or reject decision by `actor` on the current step.
    pub fn decide(
        &self,
        snapshot: &ApprovalSnapshot,
        actor: &Actor,
        decision: Decision,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecisionPlan, ApprovalError> {
        let state = &snapshot.state;
        if state.status != ApprovalStatus::Pending {
            return Err(ApprovalError::InvalidState {
                subject: state.subject,
                status: state.status,
            });
        }

        let flow = require_flow(snapshot)?;
        let step = flow.step_at(state.current_order).ok_or_else(|| {
            ApprovalError::integrity(
                state.subject,
                format!("flow {} has no step at order {}", flow.id, state.current_order),
            )
        })?;

        ensure_can_act(actor, &step.assignee)?;

        let open = snapshot
            .open_record
            .as_ref()
            .filter(|record| record.status == ApprovalStatus::Pending)
            .filter(|record| record.step_order == state.current_order)
            .ok_or_else(|| {
                ApprovalError::integrity(
                    state.subject,
                    format!("no pending record for order {}", state.current_order),
                )
            })?;

        let mut closed_record = open.clone();
        closed_record.status = decision.record_status();
        closed_record.approved_by = Some(actor.user_id.clone());
        closed_record.approved_at = Some(now);
        closed_record.remarks = remarks;
        closed_record.updated_at = now;

        let mut next_state = state.clone();
        next_state.version = state.version + 1;
        next_state.updated_at = now;

        let (opened_record, outcome) = match decision {
            Decision::Reject => {
                next_state.status = ApprovalStatus::Rejected;
                (None, DecisionOutcome::Rejected)
            }
            Decision::Approve => match flow.next_step_after(state.current_order) {
                Some(next) => {
                    next_state.current_order = next.order;
                    (
                        Some(open_record(state.subject, next, now)),
                        DecisionOutcome::Advanced {
                            from_order: state.current_order,
                            to_order: next.order,
                            next_assignee: next.assignee.clone(),
                        },
                    )
                }
                None => {
                    next_state.status = ApprovalStatus::Approved;
                    (None, DecisionOutcome::Completed)
                }
            },
        };

        Ok(DecisionPlan {
            state_id: state.id,
            expected_version: state.version,
            next_state,
            closed_record,
            opened_record,
            outcome,
        })
    }

    /// Plans a return to the first step; prior records are discarded on commit.
    pub fn reset(
        &self,
        snapshot: &ApprovalSnapshot,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ResetPlan, ApprovalError> {
        ensure_can_reset(actor)?;

        let state = &snapshot.state;
        let flow = require_flow(snapshot)?;
        let first = flow.first_step().ok_or_else(|| {
            ApprovalError::integrity(
                state.subject,
                format!("approval flow {} has no steps", flow.id),
            )
        })?;

        let mut next_state = state.clone();
        next_state.current_order = first.order;
        next_state.status = ApprovalStatus::Pending;
        next_state.version = state.version + 1;
        next_state.updated_at = now;

        Ok(ResetPlan {
            state_id: state.id,
            expected_version: state.version,
            next_state,
            opened_record: open_record(state.subject, first, now),
            previous_status: state.status,
            previous_order: state.current_order,
        })
    }
}

fn require_flow(snapshot: &ApprovalSnapshot) -> Result<&ApprovalFlow, ApprovalError> {
    let state = &snapshot.state;
    match (&snapshot.flow, state.flow_id) {
        (Some(flow), Some(flow_id)) if flow.id == flow_id => Ok(flow),
        (_, Some(flow_id)) => Err(ApprovalError::integrity(
            state.subject,
            format!("approval flow {flow_id} is missing"),
        )),
        (_, None) => Err(ApprovalError::integrity(
            state.subject,
            "approval state no longer references a flow",
        )),
    }
}

fn open_record(
    subject: SubjectRef,
    step: &ApprovalFlowStep,
    now: DateTime<Utc>,
) -> NewApprovalRecord {
    NewApprovalRecord {
        subject,
        step_id: step.id,
        step_order: step.order,
        assignee: step.assignee.clone(),
        opened_at: now,
    }
}
