use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use signoff_core::domain::flow::{
    ApprovalFlow, ApprovalFlowStep, ApprovalModule, FlowDraft, FlowId, FlowScope, StepDraft,
};

use super::rows::{column, format_timestamp, row_to_step, timestamp, STEP_COLUMNS};
use super::{FlowRepository, RepositoryError};
use crate::DbPool;

/// Flow writes check scope and usage before writing, so they take the write lock up front.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

pub struct SqlFlowRepository {
    pool: DbPool,
}

impl SqlFlowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_flow_header(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalFlow, RepositoryError> {
    let module: String = column(row, "module")?;
    let module = module
        .parse::<ApprovalModule>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ApprovalFlow {
        id: FlowId(column(row, "id")?),
        module,
        department: column(row, "department")?,
        name: column(row, "name")?,
        description: column(row, "description")?,
        steps: Vec::new(),
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn map_scope_violation(error: sqlx::Error, scope: &FlowScope) -> RepositoryError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            RepositoryError::DuplicateScope(scope.clone())
        }
        _ => RepositoryError::Database(error),
    }
}

pub(crate) async fn load_flow(
    conn: &mut SqliteConnection,
    id: FlowId,
) -> Result<Option<ApprovalFlow>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, module, department, name, description, created_at, updated_at
         FROM approval_flows WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut flow = row_to_flow_header(&row)?;

    let steps = sqlx::query(&format!(
        "SELECT {STEP_COLUMNS} FROM approval_flow_steps
         WHERE approval_flow_id = ? ORDER BY step_order ASC, id ASC"
    ))
    .bind(id.0)
    .fetch_all(&mut *conn)
    .await?;
    flow.steps = steps.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;

    Ok(Some(flow))
}

async fn scope_owner(
    conn: &mut SqliteConnection,
    scope: &FlowScope,
) -> Result<Option<FlowId>, RepositoryError> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM approval_flows
         WHERE module = ? AND IFNULL(department, '') = IFNULL(?, '')",
    )
    .bind(scope.module.as_str())
    .bind(scope.department.as_deref())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id.map(FlowId))
}

async fn ensure_scope_free(
    conn: &mut SqliteConnection,
    scope: &FlowScope,
    except: Option<FlowId>,
) -> Result<(), RepositoryError> {
    match scope_owner(conn, scope).await? {
        Some(owner) if Some(owner) != except => Err(RepositoryError::DuplicateScope(scope.clone())),
        _ => Ok(()),
    }
}

async fn ensure_not_in_flight(
    conn: &mut SqliteConnection,
    flow_id: FlowId,
) -> Result<(), RepositoryError> {
    let in_flight: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM approval_states
         WHERE approval_flow_id = ? AND status IN ('pending', 'rejected')",
    )
    .bind(flow_id.0)
    .fetch_one(&mut *conn)
    .await?;

    if in_flight > 0 {
        return Err(RepositoryError::FlowInUse {
            flow_id,
            in_flight: u64::try_from(in_flight).unwrap_or_default(),
        });
    }
    Ok(())
}

async fn ensure_exists(conn: &mut SqliteConnection, id: FlowId) -> Result<(), RepositoryError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM approval_flows WHERE id = ?")
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;
    found.map(|_| ()).ok_or(RepositoryError::FlowNotFound(id))
}

async fn insert_steps(
    conn: &mut SqliteConnection,
    flow_id: FlowId,
    steps: &[StepDraft],
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let now = format_timestamp(now);
    for step in steps {
        sqlx::query(
            "INSERT INTO approval_flow_steps
                 (approval_flow_id, step_order, assignee_kind, assignee_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(flow_id.0)
        .bind(i64::from(step.order))
        .bind(step.assignee.kind_str())
        .bind(step.assignee.key())
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl FlowRepository for SqlFlowRepository {
    async fn create(
        &self,
        draft: FlowDraft,
        now: DateTime<Utc>,
    ) -> Result<ApprovalFlow, RepositoryError> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;
        ensure_scope_free(&mut tx, &draft.scope, None).await?;

        let created_at = format_timestamp(now);
        let result = sqlx::query(
            "INSERT INTO approval_flows
                 (module, department, name, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(draft.scope.module.as_str())
        .bind(draft.scope.department.as_deref())
        .bind(&draft.name)
        .bind(draft.description.as_deref())
        .bind(&created_at)
        .bind(&created_at)
        .execute(&mut *tx)
        .await
        .map_err(|error| map_scope_violation(error, &draft.scope))?;

        let flow_id = FlowId(result.last_insert_rowid());
        insert_steps(&mut tx, flow_id, &draft.steps, now).await?;
        let flow =
            load_flow(&mut tx, flow_id).await?.ok_or(RepositoryError::FlowNotFound(flow_id))?;

        tx.commit().await?;
        Ok(flow)
    }

    async fn replace(
        &self,
        id: FlowId,
        draft: FlowDraft,
        now: DateTime<Utc>,
    ) -> Result<ApprovalFlow, RepositoryError> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;
        ensure_exists(&mut tx, id).await?;
        ensure_scope_free(&mut tx, &draft.scope, Some(id)).await?;
        ensure_not_in_flight(&mut tx, id).await?;

        sqlx::query(
            "UPDATE approval_flows
             SET module = ?, department = ?, name = ?, description = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(draft.scope.module.as_str())
        .bind(draft.scope.department.as_deref())
        .bind(&draft.name)
        .bind(draft.description.as_deref())
        .bind(format_timestamp(now))
        .bind(id.0)
        .execute(&mut *tx)
        .await
        .map_err(|error| map_scope_violation(error, &draft.scope))?;

        sqlx::query("DELETE FROM approval_flow_steps WHERE approval_flow_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        insert_steps(&mut tx, id, &draft.steps, now).await?;
        let flow = load_flow(&mut tx, id).await?.ok_or(RepositoryError::FlowNotFound(id))?;

        tx.commit().await?;
        Ok(flow)
    }

    async fn delete(&self, id: FlowId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;
        ensure_exists(&mut tx, id).await?;
        ensure_not_in_flight(&mut tx, id).await?;

        sqlx::query("DELETE FROM approval_flows WHERE id = ?").bind(id.0).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: FlowId) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_flow(&mut conn, id).await
    }

    async fn find_by_scope(
        &self,
        scope: &FlowScope,
    ) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        match scope_owner(&mut conn, scope).await? {
            Some(id) => load_flow(&mut conn, id).await,
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let headers = sqlx::query(
            "SELECT id, module, department, name, description, created_at, updated_at
             FROM approval_flows ORDER BY module ASC, IFNULL(department, '') ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let steps = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_flow_steps
             ORDER BY approval_flow_id ASC, step_order ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut steps_by_flow: BTreeMap<FlowId, Vec<ApprovalFlowStep>> = BTreeMap::new();
        for row in &steps {
            let step = row_to_step(row)?;
            steps_by_flow.entry(step.flow_id).or_default().push(step);
        }

        headers
            .iter()
            .map(|row| {
                let mut flow = row_to_flow_header(row)?;
                flow.steps = steps_by_flow.remove(&flow.id).unwrap_or_default();
                Ok(flow)
            })
            .collect()
    }
}
