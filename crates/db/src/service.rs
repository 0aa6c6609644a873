//! Approval operations as the surrounding application calls them.
//!
//! Each call validates input, asks the pure engine for a plan, commits the
//! plan through a repository in one transaction, then logs, audits and
//! dispatches outbound events. Errors come back as [`ApplicationError`];
//! callers turn them into flash messages with
//! [`ApplicationError::into_interface`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use signoff_core::approvals::authorization::{ensure_can_manage_flows, ensure_can_reset};
use signoff_core::approvals::dashboard::{summarize, DashboardSummary};
use signoff_core::approvals::directory::Directory;
use signoff_core::approvals::engine::{ApprovalEngine, Decision, DecisionOutcome, DecisionPlan};
use signoff_core::approvals::validation::{validate_remarks, FlowInput};
use signoff_core::approvals::view::{FlowView, SubjectApprovalView};
use signoff_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use signoff_core::config::ApprovalsConfig;
use signoff_core::domain::actor::Actor;
use signoff_core::domain::approval::ApprovalState;
use signoff_core::domain::flow::{ApprovalFlow, ApprovalModule, FlowId, FlowScope};
use signoff_core::domain::subject::SubjectRef;
use signoff_core::errors::{ApplicationError, ApprovalError};
use signoff_core::notify::{ApprovalEvent, ApprovalNotifier, TracingNotifier};

use crate::repositories::{
    ApprovalHistory, ApprovalRepository, FlowRepository, InMemoryApprovalStore, RepositoryError,
    SqlApprovalRepository, SqlFlowRepository, StartOutcome,
};
use crate::DbPool;

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::DuplicateScope(scope) => ApprovalError::DuplicateFlow { scope }.into(),
            RepositoryError::FlowNotFound(id) => {
                ApprovalError::not_found("approval flow", id).into()
            }
            RepositoryError::FlowInUse { flow_id, in_flight } => {
                ApprovalError::FlowInUse { flow_id, in_flight }.into()
            }
            RepositoryError::Conflict { subject, .. } => ApprovalError::Conflict { subject }.into(),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

pub struct ApprovalService {
    flows: Arc<dyn FlowRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    directory: Arc<dyn Directory>,
    engine: ApprovalEngine,
    settings: ApprovalsConfig,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn ApprovalNotifier>,
}

impl ApprovalService {
    pub fn new(
        flows: Arc<dyn FlowRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        directory: Arc<dyn Directory>,
        settings: ApprovalsConfig,
    ) -> Self {
        Self {
            flows,
            approvals,
            directory,
            engine: ApprovalEngine::new(),
            settings,
            audit: Arc::new(TracingAuditSink),
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn sqlite(pool: DbPool, directory: Arc<dyn Directory>, settings: ApprovalsConfig) -> Self {
        Self::new(
            Arc::new(SqlFlowRepository::new(pool.clone())),
            Arc::new(SqlApprovalRepository::new(pool)),
            directory,
            settings,
        )
    }

    pub fn in_memory(directory: Arc<dyn Directory>, settings: ApprovalsConfig) -> Self {
        let store = Arc::new(InMemoryApprovalStore::new());
        Self::new(store.clone(), store, directory, settings)
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &ApprovalsConfig {
        &self.settings
    }

    pub async fn create_flow(
        &self,
        actor: &Actor,
        input: FlowInput,
    ) -> Result<FlowId, ApplicationError> {
        let context = context(None, actor);
        let result: Result<FlowId, ApplicationError> = async {
            ensure_can_manage_flows(actor)?;
            let draft = input.validate(&self.settings.limits(), self.directory.as_ref())?;
            let flow = self.flows.create(draft, Utc::now()).await?;
            self.flow_written(&context, "approval.flow.created", &flow);
            Ok(flow.id)
        }
        .await;
        self.observe(&context, "approval.flow.created", AuditCategory::Definition, result)
    }

    /// Rewrites the flow and replaces all of its steps.
    pub async fn update_flow(
        &self,
        actor: &Actor,
        id: FlowId,
        input: FlowInput,
    ) -> Result<ApprovalFlow, ApplicationError> {
        let context = context(None, actor);
        let result: Result<ApprovalFlow, ApplicationError> = async {
            ensure_can_manage_flows(actor)?;
            let draft = input.validate(&self.settings.limits(), self.directory.as_ref())?;
            let flow = self.flows.replace(id, draft, Utc::now()).await?;
            self.flow_written(&context, "approval.flow.updated", &flow);
            Ok(flow)
        }
        .await;
        self.observe(&context, "approval.flow.updated", AuditCategory::Definition, result)
    }

    pub async fn delete_flow(&self, actor: &Actor, id: FlowId) -> Result<(), ApplicationError> {
        let context = context(None, actor);
        let result: Result<(), ApplicationError> = async {
            ensure_can_manage_flows(actor)?;
            self.flows.delete(id).await?;

            info!(
                event_name = "approval.flow.deleted",
                correlation_id = %context.correlation_id,
                actor = %context.actor,
                flow_id = id.0,
                "approval flow deleted"
            );
            self.audit.emit(
                context
                    .event(
                        "approval.flow.deleted",
                        AuditCategory::Definition,
                        AuditOutcome::Success,
                    )
                    .with_metadata("flow_id", id.to_string()),
            );
            Ok(())
        }
        .await;
        self.observe(&context, "approval.flow.deleted", AuditCategory::Definition, result)
    }

    /// All flows with assignee display names resolved.
    pub async fn list_flows(&self) -> Result<Vec<FlowView>, ApplicationError> {
        let flows = self.flows.list().await?;
        Ok(flows.into_iter().map(|flow| FlowView::build(flow, self.directory.as_ref())).collect())
    }

    pub async fn find_flow(&self, id: FlowId) -> Result<FlowView, ApplicationError> {
        let flow = self
            .flows
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("approval flow", id))?;
        Ok(FlowView::build(flow, self.directory.as_ref()))
    }

    /// Enters `subject` into `flow_id` unless it already has an approval state.
    pub async fn attach(
        &self,
        subject: SubjectRef,
        flow_id: FlowId,
    ) -> Result<ApprovalState, ApplicationError> {
        let context = context(Some(subject), &Actor::new("system"));
        let result: Result<ApprovalState, ApplicationError> = async {
            if let Some(existing) = self.approvals.find_state(subject).await? {
                return Ok(existing);
            }
            let flow = self
                .flows
                .find_by_id(flow_id)
                .await?
                .ok_or_else(|| ApprovalError::not_found("approval flow", flow_id))?;
            self.start(&context, subject, &flow).await
        }
        .await;
        self.observe(&context, "approval.attached", AuditCategory::Tracking, result)
    }

    /// Attaches the flow configured for `(module, department)`, if any.
    ///
    /// Returns `None` when no flow governs that scope.
    pub async fn attach_for_module(
        &self,
        subject: SubjectRef,
        module: ApprovalModule,
        department: Option<&str>,
    ) -> Result<Option<ApprovalState>, ApplicationError> {
        let context = context(Some(subject), &Actor::new("system"));
        let scope = FlowScope::new(module, department);
        let result: Result<Option<ApprovalState>, ApplicationError> = async {
            if let Some(existing) = self.approvals.find_state(subject).await? {
                return Ok(Some(existing));
            }
            match self.flows.find_by_scope(&scope).await? {
                Some(flow) => self.start(&context, subject, &flow).await.map(Some),
                None => {
                    debug!(
                        event_name = "approval.attach.skipped",
                        correlation_id = %context.correlation_id,
                        subject_type = subject.kind.as_str(),
                        subject_id = subject.id,
                        scope = %scope,
                        "no approval flow configured"
                    );
                    Ok(None)
                }
            }
        }
        .await;
        self.observe(&context, "approval.attached", AuditCategory::Tracking, result)
    }

    /// Attaches through the module that normally governs `subject`'s kind.
    pub async fn attach_default(
        &self,
        subject: SubjectRef,
        department: Option<&str>,
    ) -> Result<Option<ApprovalState>, ApplicationError> {
        self.attach_for_module(subject, subject.kind.default_module(), department).await
    }

    /// Builds the subject's view from one consistent read of state, flow and ledger.
    pub async fn query(
        &self,
        subject: SubjectRef,
    ) -> Result<SubjectApprovalView, ApplicationError> {
        let view = match self.approvals.find_history(subject).await? {
            Some(ApprovalHistory { state, flow, records }) => SubjectApprovalView::build(
                Some(state),
                flow.as_ref(),
                records,
                self.directory.as_ref(),
            ),
            None => SubjectApprovalView::build(None, None, Vec::new(), self.directory.as_ref()),
        };
        Ok(view)
    }

    pub async fn approve(
        &self,
        subject: SubjectRef,
        actor: &Actor,
        remarks: Option<&str>,
    ) -> Result<ApprovalState, ApplicationError> {
        self.decide(subject, actor, Decision::Approve, remarks).await
    }

    pub async fn reject(
        &self,
        subject: SubjectRef,
        actor: &Actor,
        remarks: Option<&str>,
    ) -> Result<ApprovalState, ApplicationError> {
        self.decide(subject, actor, Decision::Reject, remarks).await
    }

    /// Sends `subject` back to the first step and discards its ledger.
    pub async fn reset(
        &self,
        subject: SubjectRef,
        actor: &Actor,
    ) -> Result<ApprovalState, ApplicationError> {
        let context = context(Some(subject), actor);
        let result: Result<ApprovalState, ApplicationError> = async {
            ensure_can_reset(actor)?;
            let snapshot = self
                .approvals
                .find_snapshot(subject)
                .await?
                .ok_or_else(|| ApprovalError::not_found("approval state", subject))?;
            let plan = self.engine.reset(&snapshot, actor, Utc::now())?;
            let state = self.approvals.apply_reset(&plan).await?;

            info!(
                event_name = "approval.reset",
                correlation_id = %context.correlation_id,
                actor = %context.actor,
                subject_type = subject.kind.as_str(),
                subject_id = subject.id,
                previous_status = plan.previous_status.as_str(),
                previous_order = plan.previous_order,
                current_order = state.current_order,
                "approval sequence reset"
            );
            self.audit.emit(
                context
                    .event("approval.reset", AuditCategory::Decision, AuditOutcome::Success)
                    .with_metadata("previous_status", plan.previous_status.as_str())
                    .with_metadata("previous_order", plan.previous_order.to_string()),
            );
            Ok(state)
        }
        .await;
        self.observe(&context, "approval.reset", AuditCategory::Decision, result)
    }

    /// What `actor` can act on right now.
    pub async fn dashboard(&self, actor: &Actor) -> Result<DashboardSummary, ApplicationError> {
        let pending = self.approvals.list_pending().await?;
        Ok(summarize(actor, pending, self.settings.dashboard_recent_limit))
    }

    async fn decide(
        &self,
        subject: SubjectRef,
        actor: &Actor,
        decision: Decision,
        remarks: Option<&str>,
    ) -> Result<ApprovalState, ApplicationError> {
        let context = context(Some(subject), actor);
        let result: Result<ApprovalState, ApplicationError> = async {
            let remarks = validate_remarks(remarks, &self.settings.limits())?;
            let snapshot = self
                .approvals
                .find_snapshot(subject)
                .await?
                .ok_or_else(|| ApprovalError::not_found("approval state", subject))?;
            let plan = self.engine.decide(&snapshot, actor, decision, remarks, Utc::now())?;
            let state = self.approvals.apply_decision(&plan).await?;

            info!(
                event_name = "approval.decision.applied",
                correlation_id = %context.correlation_id,
                actor = %context.actor,
                subject_type = subject.kind.as_str(),
                subject_id = subject.id,
                decision = decision.as_str(),
                step_order = plan.closed_record.step_order,
                status = state.status.as_str(),
                current_order = state.current_order,
                "approval decision applied"
            );
            self.audit.emit(
                context
                    .event(
                        "approval.decision.applied",
                        AuditCategory::Decision,
                        AuditOutcome::Success,
                    )
                    .with_metadata("decision", decision.as_str())
                    .with_metadata("step_order", plan.closed_record.step_order.to_string())
                    .with_metadata("status", state.status.as_str()),
            );
            self.dispatch(&plan, actor);
            Ok(state)
        }
        .await;
        self.observe(&context, "approval.decision.applied", AuditCategory::Decision, result)
    }

    async fn start(
        &self,
        context: &AuditContext,
        subject: SubjectRef,
        flow: &ApprovalFlow,
    ) -> Result<ApprovalState, ApplicationError> {
        let plan = self.engine.start(subject, flow, Utc::now())?;
        match self.approvals.start(&plan).await? {
            StartOutcome::Created(state) => {
                info!(
                    event_name = "approval.attached",
                    correlation_id = %context.correlation_id,
                    subject_type = subject.kind.as_str(),
                    subject_id = subject.id,
                    flow_id = flow.id.0,
                    current_order = state.current_order,
                    "approval flow attached"
                );
                self.audit.emit(
                    context
                        .event("approval.attached", AuditCategory::Tracking, AuditOutcome::Success)
                        .with_metadata("flow_id", flow.id.to_string())
                        .with_metadata("first_order", plan.first_order.to_string()),
                );
                Ok(state)
            }
            StartOutcome::Existing(state) => Ok(state),
        }
    }

    fn dispatch(&self, plan: &DecisionPlan, actor: &Actor) {
        let Some(flow_id) = plan.next_state.flow_id else {
            return;
        };
        let subject = plan.next_state.subject;
        let decided_by = actor.user_id.clone();

        let event = match &plan.outcome {
            DecisionOutcome::Advanced { to_order, next_assignee, .. } => {
                ApprovalEvent::StepAdvanced {
                    subject,
                    flow_id,
                    step_order: *to_order,
                    next_assignee: next_assignee.clone(),
                    decided_by,
                }
            }
            DecisionOutcome::Completed => {
                ApprovalEvent::WorkflowCompleted { subject, flow_id, decided_by }
            }
            DecisionOutcome::Rejected => {
                ApprovalEvent::WorkflowRejected { subject, flow_id, decided_by }
            }
        };
        self.notifier.notify(event);
    }

    fn flow_written(&self, context: &AuditContext, event_name: &'static str, flow: &ApprovalFlow) {
        info!(
            event_name,
            correlation_id = %context.correlation_id,
            actor = %context.actor,
            flow_id = flow.id.0,
            module = flow.module.as_str(),
            department = flow.department.as_deref().unwrap_or(""),
            steps = flow.steps.len(),
            "approval flow saved"
        );
        self.audit.emit(
            context
                .event(event_name, AuditCategory::Definition, AuditOutcome::Success)
                .with_metadata("flow_id", flow.id.to_string())
                .with_metadata("module", flow.module.as_str())
                .with_metadata("step_count", flow.steps.len().to_string()),
        );
    }

    /// Passes `result` through, logging and auditing it first when it failed.
    fn observe<T>(
        &self,
        context: &AuditContext,
        event_name: &'static str,
        category: AuditCategory,
        result: Result<T, ApplicationError>,
    ) -> Result<T, ApplicationError> {
        if let Err(failure) = &result {
            self.record_failure(context, event_name, category, failure);
        }
        result
    }

    fn record_failure(
        &self,
        context: &AuditContext,
        event_name: &'static str,
        category: AuditCategory,
        failure: &ApplicationError,
    ) {
        let outcome = match failure {
            ApplicationError::Approval(ApprovalError::DataIntegrity { subject, detail }) => {
                error!(
                    event_name,
                    correlation_id = %context.correlation_id,
                    actor = %context.actor,
                    subject = %subject,
                    detail = %detail,
                    "approval data is inconsistent"
                );
                AuditOutcome::Failed
            }
            ApplicationError::Approval(refusal) => {
                warn!(
                    event_name,
                    correlation_id = %context.correlation_id,
                    actor = %context.actor,
                    reason = %refusal,
                    "approval operation refused"
                );
                AuditOutcome::Rejected
            }
            ApplicationError::Persistence(message) | ApplicationError::Configuration(message) => {
                error!(
                    event_name,
                    correlation_id = %context.correlation_id,
                    actor = %context.actor,
                    error = %message,
                    "approval operation failed"
                );
                AuditOutcome::Failed
            }
        };

        self.audit.emit(
            context
                .event(event_name, category, outcome)
                .with_metadata("error", failure.to_string()),
        );
    }
}

fn context(subject: Option<SubjectRef>, actor: &Actor) -> AuditContext {
    AuditContext::new(subject, Uuid::new_v4().to_string(), actor.user_id.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use signoff_core::approvals::dashboard::PendingAssignment;
    use signoff_core::approvals::directory::InMemoryDirectory;
    use signoff_core::approvals::engine::{
        ApprovalEngine, ApprovalSnapshot, Decision, DecisionPlan, ResetPlan, StartPlan,
    };
    use signoff_core::approvals::validation::{FlowInput, StepInput};
    use signoff_core::audit::{AuditOutcome, InMemoryAuditSink};
    use signoff_core::config::ApprovalsConfig;
    use signoff_core::domain::actor::Actor;
    use signoff_core::domain::approval::{ApprovalRecord, ApprovalState, ApprovalStatus};
    use signoff_core::domain::flow::{ApprovalModule, Assignee, UserId};
    use signoff_core::domain::subject::{SubjectKind, SubjectRef};
    use signoff_core::errors::{ApplicationError, ApprovalError, InterfaceError};
    use signoff_core::notify::{ApprovalEvent, InMemoryNotifier};

    use super::ApprovalService;
    use crate::repositories::{
        ApprovalHistory, ApprovalRepository, InMemoryApprovalStore, RepositoryError, StartOutcome,
    };

    /// Commits one supervisor approval right after the first read a caller makes.
    struct ConcurrentApprover {
        store: Arc<InMemoryApprovalStore>,
        decided: AtomicBool,
    }

    impl ConcurrentApprover {
        async fn approve_once(&self, subject: SubjectRef) -> Result<(), RepositoryError> {
            if self.decided.load(Ordering::SeqCst) {
                return Ok(());
            }
            let Some(snapshot) = self.store.find_snapshot(subject).await? else {
                return Ok(());
            };
            let supervisor = Actor::new("U7").with_role("ccd_supervisor");
            let plan = ApprovalEngine::new()
                .decide(&snapshot, &supervisor, Decision::Approve, None, Utc::now())
                .expect("supervisor holds the first step");
            self.store.apply_decision(&plan).await?;
            self.decided.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl ApprovalRepository for ConcurrentApprover {
        async fn find_state(
            &self,
            subject: SubjectRef,
        ) -> Result<Option<ApprovalState>, RepositoryError> {
            let state = self.store.find_state(subject).await?;
            self.approve_once(subject).await?;
            Ok(state)
        }

        async fn find_snapshot(
            &self,
            subject: SubjectRef,
        ) -> Result<Option<ApprovalSnapshot>, RepositoryError> {
            self.store.find_snapshot(subject).await
        }

        async fn find_history(
            &self,
            subject: SubjectRef,
        ) -> Result<Option<ApprovalHistory>, RepositoryError> {
            let history = self.store.find_history(subject).await?;
            self.approve_once(subject).await?;
            Ok(history)
        }

        async fn list_records(
            &self,
            subject: SubjectRef,
        ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
            self.store.list_records(subject).await
        }

        async fn start(&self, plan: &StartPlan) -> Result<StartOutcome, RepositoryError> {
            self.store.start(plan).await
        }

        async fn apply_decision(
            &self,
            plan: &DecisionPlan,
        ) -> Result<ApprovalState, RepositoryError> {
            self.store.apply_decision(plan).await
        }

        async fn apply_reset(&self, plan: &ResetPlan) -> Result<ApprovalState, RepositoryError> {
            self.store.apply_reset(plan).await
        }

        async fn list_pending(&self) -> Result<Vec<PendingAssignment>, RepositoryError> {
            self.store.list_pending().await
        }
    }

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::default()
            .with_role("ccd_supervisor", "CCD Supervisor")
            .with_role("inspection_supervisor", "Inspection Supervisor")
            .with_user("U42", "Maria Santos")
            .with_user("U99", "Juan Dela Cruz")
    }

    fn service() -> (ApprovalService, InMemoryAuditSink, InMemoryNotifier) {
        let audit = InMemoryAuditSink::default();
        let notifier = InMemoryNotifier::default();
        let service = ApprovalService::in_memory(Arc::new(directory()), ApprovalsConfig::default())
            .with_audit_sink(Arc::new(audit.clone()))
            .with_notifier(Arc::new(notifier.clone()));
        (service, audit, notifier)
    }

    fn customer_flow() -> FlowInput {
        FlowInput {
            module: ApprovalModule::CustomerApplication,
            department: None,
            name: "Customer application approval".to_string(),
            description: None,
            steps: vec![StepInput::role(1, "ccd_supervisor"), StepInput::user(2, "U42")],
        }
    }

    fn approval_error(error: ApplicationError) -> ApprovalError {
        match error {
            ApplicationError::Approval(error) => error,
            other => panic!("expected approval error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_admin_cannot_create_flows_and_gets_a_flash_message() {
        let (service, audit, _) = service();

        let error = service
            .create_flow(&Actor::new("U42"), customer_flow())
            .await
            .expect_err("only superadmin");
        let interface = error.clone().into_interface("req-9");

        assert!(matches!(approval_error(error), ApprovalError::Authorization { .. }));
        assert!(matches!(interface, InterfaceError::Rejected { .. }));
        assert_eq!(interface.user_message(), "Only a superadmin can manage approval flows.");
        assert_eq!(audit.events()[0].outcome, AuditOutcome::Rejected);
    }

    #[tokio::test]
    async fn duplicate_scope_is_refused() {
        let (service, _, _) = service();
        let admin = Actor::superadmin("root");
        service.create_flow(&admin, customer_flow()).await.expect("create");

        let error = service.create_flow(&admin, customer_flow()).await.expect_err("duplicate");
        assert!(matches!(approval_error(error), ApprovalError::DuplicateFlow { .. }));
    }

    #[tokio::test]
    async fn list_flows_resolves_display_names() {
        let (service, _, _) = service();
        service.create_flow(&Actor::superadmin("root"), customer_flow()).await.expect("create");

        let flows = service.list_flows().await.expect("list");
        let labels: Vec<&str> =
            flows[0].step_views.iter().map(|step| step.assigned_to.as_str()).collect();
        assert_eq!(labels, vec!["Role: CCD Supervisor", "User: Maria Santos"]);
    }

    #[tokio::test]
    async fn attach_for_unconfigured_module_is_a_no_op() {
        let (service, _, _) = service();
        let subject = SubjectRef::inspection(5);

        let attached = service.attach_default(subject, Some("north")).await.expect("attach");
        assert_eq!(attached, None);

        let view = service.query(subject).await.expect("query");
        assert!(!view.has_approval_flow);
        assert!(view.approvals.is_empty());
    }

    #[tokio::test]
    async fn attach_default_picks_the_module_for_the_subject_kind() {
        let (service, _, _) = service();
        let flow_id =
            service.create_flow(&Actor::superadmin("root"), customer_flow()).await.expect("create");

        let attached = service
            .attach_default(SubjectRef::customer_application(3), None)
            .await
            .expect("attach")
            .expect("customer flow configured");
        assert_eq!(attached.flow_id, Some(flow_id));
        assert_eq!(SubjectKind::CustomerApplication.default_module(), customer_flow().module);
    }

    #[tokio::test]
    async fn query_reads_state_and_ledger_from_one_point_in_time() {
        let store = Arc::new(InMemoryApprovalStore::new());
        let approver = Arc::new(ConcurrentApprover { store: store.clone(), decided: false.into() });
        let service = ApprovalService::new(
            store.clone(),
            approver,
            Arc::new(directory()),
            ApprovalsConfig::default(),
        );
        let flow_id =
            service.create_flow(&Actor::superadmin("root"), customer_flow()).await.expect("create");
        let subject = SubjectRef::customer_application(100);
        service.attach(subject, flow_id).await.expect("attach");

        let view = service.query(subject).await.expect("query");
        let state = view.approval_state.expect("state");
        let pending: Vec<_> = view
            .approvals
            .iter()
            .filter(|record| record.status == ApprovalStatus::Pending)
            .collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].step_order, state.current_order);
        assert_eq!(view.approvals.len(), state.current_order as usize);

        let later = service.query(subject).await.expect("query after decision");
        assert_eq!(later.approval_state.map(|state| state.current_order), Some(2));
        assert_eq!(later.approvals.len(), 2);
        assert_eq!(later.approvals[0].status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn decisions_emit_outbound_events() {
        let (service, _, notifier) = service();
        let flow_id =
            service.create_flow(&Actor::superadmin("root"), customer_flow()).await.expect("create");
        let subject = SubjectRef::customer_application(100);
        service.attach(subject, flow_id).await.expect("attach");

        service
            .approve(subject, &Actor::new("U7").with_role("ccd_supervisor"), Some("complete"))
            .await
            .expect("step 1");
        service.approve(subject, &Actor::new("U42"), None).await.expect("step 2");

        let events = notifier.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ApprovalEvent::StepAdvanced { step_order: 2, next_assignee: Assignee::User(user), .. }
                if *user == UserId::new("U42")
        ));
        assert!(matches!(events[1], ApprovalEvent::WorkflowCompleted { .. }));
    }

    #[tokio::test]
    async fn overlong_remarks_are_a_validation_error() {
        let (service, _, _) = service();
        let flow_id =
            service.create_flow(&Actor::superadmin("root"), customer_flow()).await.expect("create");
        let subject = SubjectRef::customer_application(1);
        service.attach(subject, flow_id).await.expect("attach");

        let remarks = "x".repeat(1001);
        let error = service
            .reject(subject, &Actor::new("U7").with_role("ccd_supervisor"), Some(&remarks))
            .await
            .expect_err("too long");
        assert!(matches!(approval_error(error), ApprovalError::Validation(_)));

        let view = service.query(subject).await.expect("query");
        assert_eq!(view.approval_state.map(|state| state.status), Some(ApprovalStatus::Pending));
    }

    #[tokio::test]
    async fn in_flight_flow_cannot_be_edited_or_deleted() {
        let (service, _, _) = service();
        let admin = Actor::superadmin("root");
        let flow_id = service.create_flow(&admin, customer_flow()).await.expect("create");
        service.attach(SubjectRef::customer_application(1), flow_id).await.expect("attach");

        let error = service.delete_flow(&admin, flow_id).await.expect_err("in flight");
        assert!(matches!(approval_error(error), ApprovalError::FlowInUse { in_flight: 1, .. }));
        let error =
            service.update_flow(&admin, flow_id, customer_flow()).await.expect_err("in flight");
        assert!(matches!(approval_error(error), ApprovalError::FlowInUse { .. }));
    }

    #[tokio::test]
    async fn reset_requires_capability_before_anything_else() {
        let (service, _, _) = service();

        let error = service
            .reset(SubjectRef::customer_application(404), &Actor::new("U7"))
            .await
            .expect_err("no capability");
        assert!(matches!(approval_error(error), ApprovalError::Authorization { .. }));

        let error = service
            .reset(SubjectRef::customer_application(404), &Actor::superadmin("root"))
            .await
            .expect_err("no state");
        assert!(matches!(approval_error(error), ApprovalError::NotFound { .. }));
    }
}
