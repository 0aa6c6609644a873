use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::approvals::directory::Directory;
use crate::domain::flow::{
    ApprovalModule, Assignee, FlowDraft, FlowScope, RoleKey, StepDraft, UserId,
};
use crate::errors::{ApprovalError, FieldViolation};

pub const MISSING_ASSIGNMENT: &str = "this step needs either a role or user assignment to be valid";
pub const DOUBLE_ASSIGNMENT: &str =
    "this step can be assigned to a role or a user, not both";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationLimits {
    pub name_max_len: usize,
    pub description_max_len: usize,
    pub remarks_max_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self { name_max_len: 255, description_max_len: 1000, remarks_max_len: 1000 }
    }
}

/// Flow definition as submitted by an administrator, before validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowInput {
    pub module: ApprovalModule,
    #[serde(default)]
    pub department: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepInput>,
}

/// A submitted step: role and user arrive as two optional form fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInput {
    pub order: i64,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl StepInput {
    pub fn role(order: i64, role: impl Into<String>) -> Self {
        Self { order, role: Some(role.into()), user: None }
    }

    pub fn user(order: i64, user: impl Into<String>) -> Self {
        Self { order, role: None, user: Some(user.into()) }
    }
}

impl FlowInput {
    /// Checks every rule and reports all violations at once.
    pub fn validate<D>(
        &self,
        limits: &ValidationLimits,
        directory: &D,
    ) -> Result<FlowDraft, ApprovalError>
    where
        D: Directory + ?Sized,
    {
        let mut violations = Vec::new();

        let name = self.name.trim();
        if name.is_empty() {
            violations.push(FieldViolation::new("name", "the name field is required"));
        } else if name.chars().count() > limits.name_max_len {
            violations.push(FieldViolation::new(
                "name",
                format!("the name may not be greater than {} characters", limits.name_max_len),
            ));
        }

        let description = non_blank(self.description.as_deref());
        if let Some(description) = &description {
            if description.chars().count() > limits.description_max_len {
                violations.push(FieldViolation::new(
                    "description",
                    format!(
                        "the description may not be greater than {} characters",
                        limits.description_max_len
                    ),
                ));
            }
        }

        if self.steps.is_empty() {
            violations.push(FieldViolation::new("steps", "at least one approval step is required"));
        }

        let mut steps = Vec::with_capacity(self.steps.len());
        let mut seen_orders: HashMap<u32, usize> = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            let order = match u32::try_from(step.order) {
                Ok(order) if order >= 1 => Some(order),
                _ => {
                    violations.push(FieldViolation::new(
                        format!("steps.{index}.order"),
                        "the step order must be a positive integer",
                    ));
                    None
                }
            };

            if let Some(order) = order {
                if let Some(first_index) = seen_orders.insert(order, index) {
                    violations.push(FieldViolation::new(
                        format!("steps.{index}.order"),
                        format!("step order {order} is already used by step {}", first_index + 1),
                    ));
                }
            }

            let role = non_blank(step.role.as_deref());
            let user = non_blank(step.user.as_deref());
            let assignee = match (role, user) {
                (Some(role), None) => {
                    let role = RoleKey::new(role);
                    if directory.role_name(&role).is_none() {
                        violations.push(FieldViolation::new(
                            format!("steps.{index}.role"),
                            format!("the selected role `{role}` does not exist"),
                        ));
                    }
                    Some(Assignee::Role(role))
                }
                (None, Some(user)) => {
                    let user = UserId::new(user);
                    if directory.user_name(&user).is_none() {
                        violations.push(FieldViolation::new(
                            format!("steps.{index}.user"),
                            format!("the selected user `{user}` does not exist"),
                        ));
                    }
                    Some(Assignee::User(user))
                }
                (None, None) => {
                    let field = format!("steps.{index}.role");
                    violations.push(FieldViolation::new(field, MISSING_ASSIGNMENT));
                    None
                }
                (Some(_), Some(_)) => {
                    let field = format!("steps.{index}.role");
                    violations.push(FieldViolation::new(field, DOUBLE_ASSIGNMENT));
                    None
                }
            };

            if let (Some(order), Some(assignee)) = (order, assignee) {
                steps.push(StepDraft { order, assignee });
            }
        }

        if !violations.is_empty() {
            return Err(ApprovalError::Validation(violations));
        }

        steps.sort_by_key(|step| step.order);
        Ok(FlowDraft {
            scope: FlowScope::new(self.module, self.department.as_deref()),
            name: name.to_owned(),
            description,
            steps,
        })
    }
}

/// Trims decision remarks and enforces the configured length.
pub fn validate_remarks(
    remarks: Option<&str>,
    limits: &ValidationLimits,
) -> Result<Option<String>, ApprovalError> {
    let remarks = non_blank(remarks);
    if let Some(value) = &remarks {
        if value.chars().count() > limits.remarks_max_len {
            let max = limits.remarks_max_len;
            return Err(ApprovalError::Validation(vec![FieldViolation::new(
                "remarks",
                format!("the remarks may not be greater than {max} characters"),
            )]));
        }
    }
    Ok(remarks)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_owned)
}
