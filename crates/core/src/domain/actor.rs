use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::flow::{RoleKey, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create, edit and delete approval flows ("superadmin").
    ManageApprovalFlows,
    /// Send a subject back to the first step of its flow.
    ResetApprovals,
}

/// The authenticated caller, resolved by the surrounding RBAC layer and passed
/// explicitly into every operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub roles: BTreeSet<RoleKey>,
    pub capabilities: BTreeSet<Capability>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            roles: BTreeSet::new(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn superadmin(user_id: impl Into<String>) -> Self {
        Self::new(user_id).with_capability(Capability::ManageApprovalFlows)
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(RoleKey::new(role));
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn holds_role(&self, role: &RoleKey) -> bool {
        self.roles.contains(role)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn can_manage_flows(&self) -> bool {
        self.has_capability(Capability::ManageApprovalFlows)
    }

    pub fn can_reset_approvals(&self) -> bool {
        self.can_manage_flows() || self.has_capability(Capability::ResetApprovals)
    }
}
