use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use signoff_core::approvals::dashboard::PendingAssignment;
use signoff_core::approvals::engine::{ApprovalSnapshot, DecisionPlan, ResetPlan, StartPlan};
use signoff_core::domain::approval::{
    ApprovalRecord, ApprovalState, ApprovalStatus, NewApprovalRecord, RecordId, StateId,
};
use signoff_core::domain::flow::{
    ApprovalFlow, ApprovalFlowStep, FlowDraft, FlowId, FlowScope, StepId,
};
use signoff_core::domain::subject::SubjectRef;

use super::{ApprovalHistory, ApprovalRepository, FlowRepository, RepositoryError, StartOutcome};

#[derive(Default)]
struct Tables {
    flows: BTreeMap<FlowId, ApprovalFlow>,
    states: BTreeMap<SubjectRef, ApprovalState>,
    records: BTreeMap<RecordId, ApprovalRecord>,
    next_flow_id: i64,
    next_step_id: i64,
    next_state_id: i64,
    next_record_id: i64,
}

impl Tables {
    fn scope_owner(&self, scope: &FlowScope) -> Option<FlowId> {
        self.flows.values().find(|flow| flow.scope() == *scope).map(|flow| flow.id)
    }

    fn records_for(&self, subject: SubjectRef) -> Vec<ApprovalRecord> {
        let mut records: Vec<ApprovalRecord> =
            self.records.values().filter(|record| record.subject == subject).cloned().collect();
        records.sort_by_key(|record| (record.step_order, record.id));
        records
    }

    fn in_flight(&self, flow_id: FlowId) -> u64 {
        let count = self
            .states
            .values()
            .filter(|state| state.flow_id == Some(flow_id))
            .filter(|state| !state.is_approved())
            .count();
        u64::try_from(count).unwrap_or(u64::MAX)
    }

    fn build_steps(&mut self, flow_id: FlowId, draft: &FlowDraft) -> Vec<ApprovalFlowStep> {
        draft
            .steps
            .iter()
            .map(|step| {
                self.next_step_id += 1;
                ApprovalFlowStep {
                    id: StepId(self.next_step_id),
                    flow_id,
                    order: step.order,
                    assignee: step.assignee.clone(),
                }
            })
            .collect()
    }

    /// Mirrors `ON DELETE SET NULL` on `approval_records.approval_flow_step_id`.
    fn detach_records_from(&mut self, step_ids: &[StepId]) {
        for record in self.records.values_mut() {
            if record.step_id.is_some_and(|id| step_ids.contains(&id)) {
                record.step_id = None;
            }
        }
    }

    fn insert_record(&mut self, new: &NewApprovalRecord) {
        self.next_record_id += 1;
        let id = RecordId(self.next_record_id);
        self.records.insert(
            id,
            ApprovalRecord {
                id,
                subject: new.subject,
                step_id: Some(new.step_id),
                step_order: new.step_order,
                assignee: new.assignee.clone(),
                status: ApprovalStatus::Pending,
                approved_by: None,
                approved_at: None,
                remarks: None,
                created_at: new.opened_at,
                updated_at: new.opened_at,
            },
        );
    }

    fn ensure_version(
        &self,
        next: &ApprovalState,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        match self.states.get(&next.subject) {
            Some(current) if current.id == next.id && current.version == expected_version => Ok(()),
            _ => Err(RepositoryError::Conflict { subject: next.subject, expected_version }),
        }
    }
}

/// Both repositories over one shared set of tables, for tests and embedding.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    tables: RwLock<Tables>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FlowRepository for InMemoryApprovalStore {
    async fn create(
        &self,
        draft: FlowDraft,
        now: DateTime<Utc>,
    ) -> Result<ApprovalFlow, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.scope_owner(&draft.scope).is_some() {
            return Err(RepositoryError::DuplicateScope(draft.scope));
        }

        tables.next_flow_id += 1;
        let id = FlowId(tables.next_flow_id);
        let mut flow = ApprovalFlow {
            id,
            module: draft.scope.module,
            department: draft.scope.department.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            steps: tables.build_steps(id, &draft),
            created_at: now,
            updated_at: now,
        };
        flow.sort_steps();
        tables.flows.insert(id, flow.clone());
        Ok(flow)
    }

    async fn replace(
        &self,
        id: FlowId,
        draft: FlowDraft,
        now: DateTime<Utc>,
    ) -> Result<ApprovalFlow, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.flows.contains_key(&id) {
            return Err(RepositoryError::FlowNotFound(id));
        }
        if tables.scope_owner(&draft.scope).is_some_and(|owner| owner != id) {
            return Err(RepositoryError::DuplicateScope(draft.scope));
        }
        let in_flight = tables.in_flight(id);
        if in_flight > 0 {
            return Err(RepositoryError::FlowInUse { flow_id: id, in_flight });
        }

        let old_steps: Vec<StepId> = tables
            .flows
            .get(&id)
            .map(|flow| flow.steps.iter().map(|step| step.id).collect())
            .unwrap_or_default();
        tables.detach_records_from(&old_steps);
        let steps = tables.build_steps(id, &draft);

        let flow = tables.flows.get_mut(&id).ok_or(RepositoryError::FlowNotFound(id))?;
        flow.module = draft.scope.module;
        flow.department = draft.scope.department;
        flow.name = draft.name;
        flow.description = draft.description;
        flow.steps = steps;
        flow.updated_at = now;
        flow.sort_steps();
        Ok(flow.clone())
    }

    async fn delete(&self, id: FlowId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.flows.contains_key(&id) {
            return Err(RepositoryError::FlowNotFound(id));
        }
        let in_flight = tables.in_flight(id);
        if in_flight > 0 {
            return Err(RepositoryError::FlowInUse { flow_id: id, in_flight });
        }

        let removed = tables.flows.remove(&id);
        if let Some(flow) = removed {
            let step_ids: Vec<StepId> = flow.steps.iter().map(|step| step.id).collect();
            tables.detach_records_from(&step_ids);
        }
        for state in tables.states.values_mut() {
            if state.flow_id == Some(id) {
                state.flow_id = None;
            }
        }
        Ok(())
    }

    async fn find_by_id(&self, id: FlowId) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.flows.get(&id).cloned())
    }

    async fn find_by_scope(
        &self,
        scope: &FlowScope,
    ) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.scope_owner(scope).and_then(|id| tables.flows.get(&id).cloned()))
    }

    async fn list(&self) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut flows: Vec<ApprovalFlow> = tables.flows.values().cloned().collect();
        flows.sort_by(|left, right| {
            left.module
                .as_str()
                .cmp(right.module.as_str())
                .then_with(|| left.department.cmp(&right.department))
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(flows)
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalStore {
    async fn find_state(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<ApprovalState>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.states.get(&subject).cloned())
    }

    async fn find_snapshot(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<ApprovalSnapshot>, RepositoryError> {
        let tables = self.tables.read().await;
        let Some(state) = tables.states.get(&subject).cloned() else {
            return Ok(None);
        };

        let flow = state.flow_id.and_then(|id| tables.flows.get(&id).cloned());
        let open_record = tables
            .records
            .values()
            .rev()
            .find(|record| record.subject == subject && record.status == ApprovalStatus::Pending)
            .cloned();
        Ok(Some(ApprovalSnapshot { state, flow, open_record }))
    }

    async fn find_history(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<ApprovalHistory>, RepositoryError> {
        let tables = self.tables.read().await;
        let Some(state) = tables.states.get(&subject).cloned() else {
            return Ok(None);
        };

        let flow = state.flow_id.and_then(|id| tables.flows.get(&id).cloned());
        Ok(Some(ApprovalHistory { state, flow, records: tables.records_for(subject) }))
    }

    async fn list_records(
        &self,
        subject: SubjectRef,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        Ok(self.tables.read().await.records_for(subject))
    }

    async fn start(&self, plan: &StartPlan) -> Result<StartOutcome, RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.states.get(&plan.subject) {
            return Ok(StartOutcome::Existing(existing.clone()));
        }
        if !tables.flows.contains_key(&plan.flow_id) {
            return Err(RepositoryError::FlowNotFound(plan.flow_id));
        }

        tables.next_state_id += 1;
        let state = ApprovalState {
            id: StateId(tables.next_state_id),
            subject: plan.subject,
            flow_id: Some(plan.flow_id),
            current_order: plan.first_order,
            status: ApprovalStatus::Pending,
            version: 1,
            created_at: plan.started_at,
            updated_at: plan.started_at,
        };
        tables.states.insert(plan.subject, state.clone());
        tables.insert_record(&plan.first_record);
        Ok(StartOutcome::Created(state))
    }

    async fn apply_decision(&self, plan: &DecisionPlan) -> Result<ApprovalState, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.ensure_version(&plan.next_state, plan.expected_version)?;

        let closed = &plan.closed_record;
        match tables.records.get_mut(&closed.id) {
            Some(record) if record.status == ApprovalStatus::Pending => *record = closed.clone(),
            _ => {
                return Err(RepositoryError::Conflict {
                    subject: closed.subject,
                    expected_version: plan.expected_version,
                })
            }
        }
        if let Some(opened) = &plan.opened_record {
            tables.insert_record(opened);
        }
        tables.states.insert(plan.next_state.subject, plan.next_state.clone());
        Ok(plan.next_state.clone())
    }

    async fn apply_reset(&self, plan: &ResetPlan) -> Result<ApprovalState, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.ensure_version(&plan.next_state, plan.expected_version)?;

        let subject = plan.next_state.subject;
        tables.records.retain(|_, record| record.subject != subject);
        tables.insert_record(&plan.opened_record);
        tables.states.insert(subject, plan.next_state.clone());
        Ok(plan.next_state.clone())
    }

    async fn list_pending(&self) -> Result<Vec<PendingAssignment>, RepositoryError> {
        let tables = self.tables.read().await;
        let pending = tables
            .states
            .values()
            .filter(|state| state.is_pending())
            .filter_map(|state| {
                let flow = tables.flows.get(&state.flow_id?)?;
                let step = flow.step_at(state.current_order)?;
                Some(PendingAssignment { state: state.clone(), step: step.clone() })
            })
            .collect();
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use signoff_core::approvals::engine::{ApprovalEngine, Decision};
    use signoff_core::domain::actor::Actor;
    use signoff_core::domain::approval::ApprovalStatus;
    use signoff_core::domain::flow::{
        ApprovalModule, Assignee, FlowDraft, FlowScope, RoleKey, StepDraft,
    };
    use signoff_core::domain::subject::SubjectRef;

    use crate::repositories::{
        ApprovalRepository, FlowRepository, InMemoryApprovalStore, RepositoryError,
    };

    fn draft() -> FlowDraft {
        FlowDraft {
            scope: FlowScope::new(ApprovalModule::InspectionApproval, None),
            name: "Inspection approval".to_string(),
            description: None,
            steps: vec![StepDraft {
                order: 1,
                assignee: Assignee::Role(RoleKey::new("inspection_supervisor")),
            }],
        }
    }

    #[tokio::test]
    async fn in_memory_store_enforces_scope_uniqueness() {
        let store = InMemoryApprovalStore::new();
        store.create(draft(), Utc::now()).await.expect("create");

        let error = store.create(draft(), Utc::now()).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::DuplicateScope(_)));
    }

    #[tokio::test]
    async fn in_memory_store_completes_single_step_flow() {
        let store = InMemoryApprovalStore::new();
        let flow = store.create(draft(), Utc::now()).await.expect("create");
        let subject = SubjectRef::inspection(7);
        let engine = ApprovalEngine::new();

        let plan = engine.start(subject, &flow, Utc::now()).expect("plan");
        store.start(&plan).await.expect("start");
        assert_eq!(store.list_pending().await.expect("pending").len(), 1);

        let snapshot = store.find_snapshot(subject).await.expect("load").expect("exists");
        let decision = engine
            .decide(
                &snapshot,
                &Actor::new("U5").with_role("inspection_supervisor"),
                Decision::Approve,
                None,
                Utc::now(),
            )
            .expect("plan");
        let state = store.apply_decision(&decision).await.expect("approve");

        assert_eq!(state.status, ApprovalStatus::Approved);
        assert!(store.list_pending().await.expect("pending").is_empty());
        let stale = store.apply_decision(&decision).await.expect_err("replay");
        assert!(matches!(stale, RepositoryError::Conflict { .. }));

        store.delete(flow.id).await.expect("completed subjects do not block delete");
        let orphan = store.find_state(subject).await.expect("load").expect("state survives");
        assert_eq!(orphan.flow_id, None);
        let records = store.list_records(subject).await.expect("records");
        assert_eq!(records[0].step_id, None);
    }
}
