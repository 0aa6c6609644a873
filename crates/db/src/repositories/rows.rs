use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use signoff_core::domain::approval::{ApprovalStatus, RecordId, StateId};
use signoff_core::domain::approval::{ApprovalRecord, ApprovalState};
use signoff_core::domain::flow::{ApprovalFlowStep, Assignee, FlowId, StepId, UserId};
use signoff_core::domain::subject::{SubjectKind, SubjectRef};

use super::RepositoryError;

pub(crate) const STATE_COLUMNS: &str = "id, approvable_type, approvable_id, approval_flow_id, \
     current_order, status, version, created_at, updated_at";

pub(crate) const RECORD_COLUMNS: &str = "id, approvable_type, approvable_id, \
     approval_flow_step_id, step_order, assignee_kind, assignee_key, status, approved_by, \
     approved_at, remarks, created_at, updated_at";

pub(crate) const STEP_COLUMNS: &str =
    "id, approval_flow_id, step_order, assignee_kind, assignee_key";

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {e}")))
}

pub(crate) fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    parse_timestamp(&raw)
}

fn optional_timestamp(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn order(row: &SqliteRow, name: &str) -> Result<u32, RepositoryError> {
    let raw: i64 = column(row, name)?;
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("invalid step order {raw}")))
}

fn subject(row: &SqliteRow) -> Result<SubjectRef, RepositoryError> {
    let kind: String = column(row, "approvable_type")?;
    let id: i64 = column(row, "approvable_id")?;
    let kind = kind.parse::<SubjectKind>().map_err(|e| RepositoryError::Decode(e.to_string()))?;
    Ok(SubjectRef::new(kind, id))
}

fn status(row: &SqliteRow) -> Result<ApprovalStatus, RepositoryError> {
    let raw: String = column(row, "status")?;
    raw.parse::<ApprovalStatus>().map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn assignee(row: &SqliteRow) -> Result<Assignee, RepositoryError> {
    let kind: String = column(row, "assignee_kind")?;
    let key: String = column(row, "assignee_key")?;
    Assignee::from_parts(&kind, key).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn row_to_step(row: &SqliteRow) -> Result<ApprovalFlowStep, RepositoryError> {
    Ok(ApprovalFlowStep {
        id: StepId(column(row, "id")?),
        flow_id: FlowId(column(row, "approval_flow_id")?),
        order: order(row, "step_order")?,
        assignee: assignee(row)?,
    })
}

pub(crate) fn row_to_state(row: &SqliteRow) -> Result<ApprovalState, RepositoryError> {
    let flow_id: Option<i64> = column(row, "approval_flow_id")?;
    Ok(ApprovalState {
        id: StateId(column(row, "id")?),
        subject: subject(row)?,
        flow_id: flow_id.map(FlowId),
        current_order: order(row, "current_order")?,
        status: status(row)?,
        version: column(row, "version")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

pub(crate) fn row_to_record(row: &SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let step_id: Option<i64> = column(row, "approval_flow_step_id")?;
    let approved_by: Option<String> = column(row, "approved_by")?;
    Ok(ApprovalRecord {
        id: RecordId(column(row, "id")?),
        subject: subject(row)?,
        step_id: step_id.map(StepId),
        step_order: order(row, "step_order")?,
        assignee: assignee(row)?,
        status: status(row)?,
        approved_by: approved_by.map(UserId),
        approved_at: optional_timestamp(row, "approved_at")?,
        remarks: column(row, "remarks")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{format_timestamp, parse_timestamp};

    #[test]
    fn timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid");
        let late = early + chrono::Duration::milliseconds(1500);

        let (early_text, late_text) = (format_timestamp(early), format_timestamp(late));
        assert_eq!(early_text, "2026-03-01T09:00:00.000000Z");
        assert!(early_text < late_text);
        assert_eq!(parse_timestamp(&late_text).expect("parse"), late);
    }
}
