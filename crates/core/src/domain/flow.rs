use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UnknownKeyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleKey(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl RoleKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_owned())
    }
}

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_owned())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Business process an approval flow governs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalModule {
    CustomerApplication,
    InspectionApproval,
}

impl ApprovalModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerApplication => "customer_application",
            Self::InspectionApproval => "inspection_approval",
        }
    }
}

impl fmt::Display for ApprovalModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalModule {
    type Err = UnknownKeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "customer_application" => Ok(Self::CustomerApplication),
            "inspection_approval" => Ok(Self::InspectionApproval),
            other => Err(UnknownKeyError::new("approval module", other)),
        }
    }
}

/// Who a step is delegated to. A step is never assigned to both or neither.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum Assignee {
    Role(RoleKey),
    User(UserId),
}

impl Assignee {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Role(_) => "role",
            Self::User(_) => "user",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Role(role) => &role.0,
            Self::User(user) => &user.0,
        }
    }

    pub fn from_parts(kind: &str, key: impl Into<String>) -> Result<Self, UnknownKeyError> {
        match kind {
            "role" => Ok(Self::Role(RoleKey::new(key))),
            "user" => Ok(Self::User(UserId::new(key))),
            other => Err(UnknownKeyError::new("assignee kind", other)),
        }
    }
}

impl fmt::Display for Assignee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_str(), self.key())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlowStep {
    pub id: StepId,
    pub flow_id: FlowId,
    pub order: u32,
    pub assignee: Assignee,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: FlowId,
    pub module: ApprovalModule,
    pub department: Option<String>,
    pub name: String,
    pub description: Option<String>,
    /// Kept sorted by `(order, id)`.
    pub steps: Vec<ApprovalFlowStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalFlow {
    pub fn sort_steps(&mut self) {
        self.steps.sort_by(|left, right| {
            left.order.cmp(&right.order).then_with(|| left.id.cmp(&right.id))
        });
    }

    pub fn first_step(&self) -> Option<&ApprovalFlowStep> {
        self.steps.iter().min_by_key(|step| (step.order, step.id))
    }

    /// Step at `order`. Should legacy rows share an order, the lowest step id wins.
    pub fn step_at(&self, order: u32) -> Option<&ApprovalFlowStep> {
        self.steps.iter().filter(|step| step.order == order).min_by_key(|step| step.id)
    }

    pub fn next_step_after(&self, order: u32) -> Option<&ApprovalFlowStep> {
        self.steps.iter().filter(|step| step.order > order).min_by_key(|step| (step.order, step.id))
    }

    /// 1-based position of `order` among the distinct step orders.
    pub fn position_of(&self, order: u32) -> Option<usize> {
        let mut orders: Vec<u32> = self.steps.iter().map(|step| step.order).collect();
        orders.sort_unstable();
        orders.dedup();
        orders.iter().position(|candidate| *candidate == order).map(|index| index + 1)
    }

    pub fn scope(&self) -> FlowScope {
        FlowScope { module: self.module, department: self.department.clone() }
    }
}

/// The `(module, department)` pair a flow is unique within.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowScope {
    pub module: ApprovalModule,
    pub department: Option<String>,
}

impl FlowScope {
    pub fn new(module: ApprovalModule, department: Option<&str>) -> Self {
        Self { module, department: normalize_department(department) }
    }
}

impl fmt::Display for FlowScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.department {
            Some(department) => write!(f, "module `{}` / department `{department}`", self.module),
            None => write!(f, "module `{}`", self.module),
        }
    }
}

pub fn normalize_department(department: Option<&str>) -> Option<String> {
    department.map(str::trim).filter(|value| !value.is_empty()).map(str::to_owned)
}

/// A validated flow definition ready to be persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDraft {
    pub scope: FlowScope,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<StepDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDraft {
    pub order: u32,
    pub assignee: Assignee,
}
