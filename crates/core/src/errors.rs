use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::ApprovalStatus;
use crate::domain::flow::{FlowId, FlowScope};
use crate::domain::subject::SubjectRef;

/// One rejected input field, keyed the way a form reports it (`steps.1.role`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|violation| format!("{}: {}", violation.field, violation.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("validation failed: {}", describe_violations(.0))]
    Validation(Vec<FieldViolation>),
    #[error("an approval flow already exists for {scope}")]
    DuplicateFlow { scope: FlowScope },
    #[error("not authorized: {reason}")]
    Authorization { reason: String },
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("approval for {subject} is {status}, not pending")]
    InvalidState { subject: SubjectRef, status: ApprovalStatus },
    #[error("approval data for {subject} is inconsistent: {detail}")]
    DataIntegrity { subject: SubjectRef, detail: String },
    #[error("approval flow {flow_id} is in use by {in_flight} unfinished approval(s)")]
    FlowInUse { flow_id: FlowId, in_flight: u64 },
    #[error("approval for {subject} was changed concurrently")]
    Conflict { subject: SubjectRef },
}

impl ApprovalError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound { entity, key: key.to_string() }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Authorization { reason: reason.into() }
    }

    pub fn integrity(subject: SubjectRef, detail: impl Into<String>) -> Self {
        Self::DataIntegrity { subject, detail: detail.into() }
    }

    /// Text shown back to the actor, e.g. as a flash message on redirect.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(violations) => violations
                .iter()
                .map(|violation| violation.message.clone())
                .collect::<Vec<_>>()
                .join(" "),
            Self::DuplicateFlow { .. } => {
                "An approval flow already exists for this module and department.".to_owned()
            }
            Self::Authorization { reason } => reason.clone(),
            Self::NotFound { entity, .. } => format!("The requested {entity} could not be found."),
            Self::InvalidState { status, .. } => {
                format!("This item is no longer awaiting approval (it is {status}).")
            }
            Self::DataIntegrity { .. } => "An unexpected internal error occurred.".to_owned(),
            Self::FlowInUse { .. } => {
                "This approval flow has items still awaiting approval and cannot be changed."
                    .to_owned()
            }
            Self::Conflict { .. } => {
                "This item was updated by someone else. Reload the page and try again.".to_owned()
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    /// The request was refused; the caller redirects back with `message`.
    #[error("request rejected: {message}")]
    Rejected { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &str {
        match self {
            Self::Rejected { message, .. } => message,
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Rejected { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Rejected { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Approval(error @ ApprovalError::DataIntegrity { .. }) => {
                Self::Internal {
                    message: error.to_string(),
                    correlation_id: "unassigned".to_owned(),
                }
            }
            ApplicationError::Approval(error) => Self::Rejected {
                message: error.user_message(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::approval::ApprovalStatus;
    use crate::domain::subject::SubjectRef;
    use crate::errors::{ApplicationError, ApprovalError, FieldViolation, InterfaceError};

    #[test]
    fn validation_error_maps_to_rejected_with_field_messages() {
        let interface = ApplicationError::from(ApprovalError::Validation(vec![FieldViolation::new(
            "steps.0.role",
            "this step needs either a role or user assignment to be valid",
        )]))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Rejected { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "this step needs either a role or user assignment to be valid"
        );
    }

    #[test]
    fn authorization_error_is_a_flash_message_not_a_hard_failure() {
        let interface = ApplicationError::from(ApprovalError::unauthorized(
            "Only a superadmin can manage approval flows.",
        ))
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Rejected { .. }));
        assert_eq!(interface.user_message(), "Only a superadmin can manage approval flows.");
    }

    #[test]
    fn data_integrity_error_is_surfaced_as_generic_failure() {
        let interface = ApplicationError::from(ApprovalError::integrity(
            SubjectRef::customer_application(7),
            "no step at order 3",
        ))
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database is locked".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn invalid_state_message_names_the_status() {
        let error = ApprovalError::InvalidState {
            subject: SubjectRef::inspection(3),
            status: ApprovalStatus::Rejected,
        };

        assert_eq!(error.to_string(), "approval for inspection#3 is rejected, not pending");
        assert!(error.user_message().contains("rejected"));
    }
}
