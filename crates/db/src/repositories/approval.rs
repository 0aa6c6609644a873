use sqlx::SqliteConnection;

use signoff_core::approvals::dashboard::PendingAssignment;
use signoff_core::approvals::engine::{ApprovalSnapshot, DecisionPlan, ResetPlan, StartPlan};
use signoff_core::domain::approval::{ApprovalRecord, ApprovalState, NewApprovalRecord};
use signoff_core::domain::flow::{ApprovalFlowStep, FlowId, StepId};
use signoff_core::domain::subject::SubjectRef;

use super::flow::load_flow;
use super::rows::{
    assignee, column, format_timestamp, order, row_to_record, row_to_state, RECORD_COLUMNS,
    STATE_COLUMNS,
};
use super::{ApprovalHistory, ApprovalRepository, RepositoryError, StartOutcome};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn load_state(
    conn: &mut SqliteConnection,
    subject: SubjectRef,
) -> Result<Option<ApprovalState>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {STATE_COLUMNS} FROM approval_states
         WHERE approvable_type = ? AND approvable_id = ?"
    ))
    .bind(subject.kind.as_str())
    .bind(subject.id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_state).transpose()
}

async fn load_records(
    conn: &mut SqliteConnection,
    subject: SubjectRef,
) -> Result<Vec<ApprovalRecord>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM approval_records
         WHERE approvable_type = ? AND approvable_id = ?
         ORDER BY step_order ASC, id ASC"
    ))
    .bind(subject.kind.as_str())
    .bind(subject.id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_record).collect()
}

async fn insert_record(
    conn: &mut SqliteConnection,
    record: &NewApprovalRecord,
) -> Result<(), RepositoryError> {
    let opened_at = format_timestamp(record.opened_at);
    sqlx::query(
        "INSERT INTO approval_records
             (approvable_type, approvable_id, approval_flow_step_id, step_order, assignee_kind,
              assignee_key, status, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
    )
    .bind(record.subject.kind.as_str())
    .bind(record.subject.id)
    .bind(record.step_id.0)
    .bind(i64::from(record.step_order))
    .bind(record.assignee.kind_str())
    .bind(record.assignee.key())
    .bind(&opened_at)
    .bind(&opened_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Moves the state to `next` only if nobody committed since `expected_version`.
async fn update_state_guarded(
    conn: &mut SqliteConnection,
    next: &ApprovalState,
    expected_version: i64,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_states
         SET current_order = ?, status = ?, version = ?, updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(i64::from(next.current_order))
    .bind(next.status.as_str())
    .bind(next.version)
    .bind(format_timestamp(next.updated_at))
    .bind(next.id.0)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict { subject: next.subject, expected_version });
    }
    Ok(())
}

async fn close_record(
    conn: &mut SqliteConnection,
    record: &ApprovalRecord,
    expected_version: i64,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_records
         SET status = ?, approved_by = ?, approved_at = ?, remarks = ?, updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(record.status.as_str())
    .bind(record.approved_by.as_ref().map(|user| user.0.as_str()))
    .bind(record.approved_at.map(format_timestamp))
    .bind(record.remarks.as_deref())
    .bind(format_timestamp(record.updated_at))
    .bind(record.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict { subject: record.subject, expected_version });
    }
    Ok(())
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_state(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<ApprovalState>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_state(&mut conn, subject).await
    }

    async fn find_snapshot(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<ApprovalSnapshot>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let Some(state) = load_state(&mut tx, subject).await? else {
            return Ok(None);
        };

        let flow = match state.flow_id {
            Some(flow_id) => load_flow(&mut tx, flow_id).await?,
            None => None,
        };

        let open_record = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_records
             WHERE approvable_type = ? AND approvable_id = ? AND status = 'pending'
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(subject.kind.as_str())
        .bind(subject.id)
        .fetch_optional(&mut *tx)
        .await?
        .as_ref()
        .map(row_to_record)
        .transpose()?;

        tx.commit().await?;
        Ok(Some(ApprovalSnapshot { state, flow, open_record }))
    }

    async fn find_history(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<ApprovalHistory>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let Some(state) = load_state(&mut tx, subject).await? else {
            return Ok(None);
        };

        let flow = match state.flow_id {
            Some(flow_id) => load_flow(&mut tx, flow_id).await?,
            None => None,
        };
        let records = load_records(&mut tx, subject).await?;

        tx.commit().await?;
        Ok(Some(ApprovalHistory { state, flow, records }))
    }

    async fn list_records(
        &self,
        subject: SubjectRef,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_records(&mut conn, subject).await
    }

    async fn start(&self, plan: &StartPlan) -> Result<StartOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let started_at = format_timestamp(plan.started_at);

        let inserted = sqlx::query(
            "INSERT INTO approval_states
                 (approvable_type, approvable_id, approval_flow_id, current_order, status, version,
                  created_at, updated_at)
             VALUES (?, ?, ?, ?, 'pending', 1, ?, ?)
             ON CONFLICT (approvable_type, approvable_id) DO NOTHING",
        )
        .bind(plan.subject.kind.as_str())
        .bind(plan.subject.id)
        .bind(plan.flow_id.0)
        .bind(i64::from(plan.first_order))
        .bind(&started_at)
        .bind(&started_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            insert_record(&mut tx, &plan.first_record).await?;
        }

        let state = load_state(&mut tx, plan.subject).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("approval state for {} vanished", plan.subject))
        })?;
        tx.commit().await?;

        Ok(if inserted == 1 { StartOutcome::Created(state) } else { StartOutcome::Existing(state) })
    }

    async fn apply_decision(&self, plan: &DecisionPlan) -> Result<ApprovalState, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        update_state_guarded(&mut tx, &plan.next_state, plan.expected_version).await?;
        close_record(&mut tx, &plan.closed_record, plan.expected_version).await?;
        if let Some(opened) = &plan.opened_record {
            insert_record(&mut tx, opened).await?;
        }

        tx.commit().await?;
        Ok(plan.next_state.clone())
    }

    async fn apply_reset(&self, plan: &ResetPlan) -> Result<ApprovalState, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        update_state_guarded(&mut tx, &plan.next_state, plan.expected_version).await?;
        let subject = plan.next_state.subject;
        sqlx::query("DELETE FROM approval_records WHERE approvable_type = ? AND approvable_id = ?")
            .bind(subject.kind.as_str())
            .bind(subject.id)
            .execute(&mut *tx)
            .await?;
        insert_record(&mut tx, &plan.opened_record).await?;

        tx.commit().await?;
        Ok(plan.next_state.clone())
    }

    async fn list_pending(&self) -> Result<Vec<PendingAssignment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT s.id, s.approvable_type, s.approvable_id, s.approval_flow_id, s.current_order,
                    s.status, s.version, s.created_at, s.updated_at,
                    st.id AS step_id, st.approval_flow_id AS step_flow_id, st.step_order,
                    st.assignee_kind, st.assignee_key
             FROM approval_states s
             JOIN approval_flow_steps st
               ON st.approval_flow_id = s.approval_flow_id AND st.step_order = s.current_order
             WHERE s.status = 'pending'
             ORDER BY s.id ASC, st.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pending: Vec<PendingAssignment> = Vec::with_capacity(rows.len());
        for row in &rows {
            let state = row_to_state(row)?;
            if pending.last().is_some_and(|previous| previous.state.id == state.id) {
                continue;
            }
            let step = ApprovalFlowStep {
                id: StepId(column(row, "step_id")?),
                flow_id: FlowId(column(row, "step_flow_id")?),
                order: order(row, "step_order")?,
                assignee: assignee(row)?,
            };
            pending.push(PendingAssignment { state, step });
        }

        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use signoff_core::approvals::engine::{ApprovalEngine, Decision};
    use signoff_core::domain::actor::{Actor, Capability};
    use signoff_core::domain::approval::ApprovalStatus;
    use signoff_core::domain::flow::{
        ApprovalFlow, ApprovalModule, Assignee, FlowDraft, FlowScope, RoleKey, StepDraft, UserId,
    };
    use signoff_core::domain::subject::SubjectRef;

    use super::SqlApprovalRepository;
    use crate::repositories::{
        ApprovalRepository, FlowRepository, RepositoryError, SqlFlowRepository, StartOutcome,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> (DbPool, ApprovalFlow) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let flow = SqlFlowRepository::new(pool.clone())
            .create(
                FlowDraft {
                    scope: FlowScope::new(ApprovalModule::CustomerApplication, None),
                    name: "CA approval".to_string(),
                    description: None,
                    steps: vec![
                        StepDraft {
                            order: 1,
                            assignee: Assignee::Role(RoleKey::new("ccd_supervisor")),
                        },
                        StepDraft { order: 2, assignee: Assignee::User(UserId::new("U42")) },
                    ],
                },
                Utc::now(),
            )
            .await
            .expect("create flow");
        (pool, flow)
    }

    async fn start(repo: &SqlApprovalRepository, flow: &ApprovalFlow, subject: SubjectRef) {
        let plan = ApprovalEngine::new().start(subject, flow, Utc::now()).expect("plan");
        repo.start(&plan).await.expect("start");
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (pool, flow) = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        let subject = SubjectRef::customer_application(100);
        let plan = ApprovalEngine::new().start(subject, &flow, Utc::now()).expect("plan");

        let first = repo.start(&plan).await.expect("first start");
        let second = repo.start(&plan).await.expect("second start");

        assert!(matches!(first, StartOutcome::Created(_)));
        assert!(matches!(second, StartOutcome::Existing(ref state) if state.current_order == 1));
        assert_eq!(repo.list_records(subject).await.expect("records").len(), 1);
    }

    #[tokio::test]
    async fn snapshot_carries_flow_and_open_record() {
        let (pool, flow) = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        let subject = SubjectRef::customer_application(100);
        start(&repo, &flow, subject).await;

        let snapshot = repo.find_snapshot(subject).await.expect("load").expect("exists");
        assert_eq!(snapshot.flow.as_ref().map(|flow| flow.steps.len()), Some(2));
        let open = snapshot.open_record.expect("open record");
        assert_eq!(open.step_order, 1);
        assert_eq!(open.status, ApprovalStatus::Pending);
        assert!(repo.find_snapshot(SubjectRef::inspection(1)).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn history_reads_state_flow_and_ledger_together() {
        let (pool, flow) = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        let subject = SubjectRef::customer_application(100);
        start(&repo, &flow, subject).await;
        let snapshot = repo.find_snapshot(subject).await.expect("load").expect("exists");
        let plan = ApprovalEngine::new()
            .decide(
                &snapshot,
                &Actor::new("U1").with_role("ccd_supervisor"),
                Decision::Approve,
                None,
                Utc::now(),
            )
            .expect("plan");
        repo.apply_decision(&plan).await.expect("approve");

        let history = repo.find_history(subject).await.expect("load").expect("exists");
        assert_eq!(history.state.current_order, 2);
        assert_eq!(history.flow.map(|flow| flow.id), Some(flow.id));
        let ledger: Vec<(u32, ApprovalStatus)> =
            history.records.iter().map(|record| (record.step_order, record.status)).collect();
        assert_eq!(ledger, vec![(1, ApprovalStatus::Approved), (2, ApprovalStatus::Pending)]);
        assert!(repo.find_history(SubjectRef::inspection(1)).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn stale_plan_is_a_conflict_and_writes_nothing() {
        let (pool, flow) = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        let subject = SubjectRef::customer_application(100);
        start(&repo, &flow, subject).await;

        let engine = ApprovalEngine::new();
        let snapshot = repo.find_snapshot(subject).await.expect("load").expect("exists");
        let first = Actor::new("U1").with_role("ccd_supervisor");
        let second = Actor::new("U2").with_role("ccd_supervisor");
        let plan_a =
            engine.decide(&snapshot, &first, Decision::Approve, None, Utc::now()).expect("plan a");
        let plan_b =
            engine.decide(&snapshot, &second, Decision::Approve, None, Utc::now()).expect("plan b");

        repo.apply_decision(&plan_a).await.expect("first commit wins");
        let error = repo.apply_decision(&plan_b).await.expect_err("second commit loses");
        assert!(matches!(error, RepositoryError::Conflict { expected_version: 1, .. }));

        let state = repo.find_state(subject).await.expect("load").expect("exists");
        assert_eq!(state.current_order, 2);
        assert_eq!(state.version, 2);
        let records = repo.list_records(subject).await.expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].approved_by, Some(UserId::new("U1")));
    }

    #[tokio::test]
    async fn reset_discards_history_and_reopens_first_step() {
        let (pool, flow) = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        let subject = SubjectRef::customer_application(100);
        start(&repo, &flow, subject).await;

        let engine = ApprovalEngine::new();
        let snapshot = repo.find_snapshot(subject).await.expect("load").expect("exists");
        let reject = engine
            .decide(
                &snapshot,
                &Actor::new("U1").with_role("ccd_supervisor"),
                Decision::Reject,
                Some("missing documents".to_string()),
                Utc::now(),
            )
            .expect("plan");
        repo.apply_decision(&reject).await.expect("reject");

        let snapshot = repo.find_snapshot(subject).await.expect("load").expect("exists");
        assert!(snapshot.open_record.is_none());
        let reset = engine
            .reset(
                &snapshot,
                &Actor::new("admin").with_capability(Capability::ResetApprovals),
                Utc::now(),
            )
            .expect("plan");
        let state = repo.apply_reset(&reset).await.expect("reset");

        assert_eq!(state.status, ApprovalStatus::Pending);
        let records = repo.list_records(subject).await.expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ApprovalStatus::Pending);
        assert_eq!(records[0].remarks, None);
    }

    #[tokio::test]
    async fn pending_list_joins_the_current_step() {
        let (pool, flow) = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        start(&repo, &flow, SubjectRef::customer_application(1)).await;
        start(&repo, &flow, SubjectRef::customer_application(2)).await;

        let subject = SubjectRef::customer_application(2);
        let snapshot = repo.find_snapshot(subject).await.expect("load").expect("exists");
        let plan = ApprovalEngine::new()
            .decide(
                &snapshot,
                &Actor::new("U1").with_role("ccd_supervisor"),
                Decision::Approve,
                None,
                Utc::now(),
            )
            .expect("plan");
        repo.apply_decision(&plan).await.expect("approve");

        let pending = repo.list_pending().await.expect("pending");
        let assignees: Vec<(i64, Assignee)> =
            pending.into_iter().map(|item| (item.state.subject.id, item.step.assignee)).collect();
        assert_eq!(
            assignees,
            vec![
                (1, Assignee::Role(RoleKey::new("ccd_supervisor"))),
                (2, Assignee::User(UserId::new("U42"))),
            ]
        );
    }
}
