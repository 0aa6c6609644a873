use std::collections::HashMap;

use crate::domain::flow::{Assignee, RoleKey, UserId};

/// Lookups answered by the surrounding RBAC layer.
///
/// `None` means the role or user does not exist.
pub trait Directory: Send + Sync {
    fn role_name(&self, role: &RoleKey) -> Option<String>;
    fn user_name(&self, user: &UserId) -> Option<String>;

    fn assignee_name(&self, assignee: &Assignee) -> Option<String> {
        match assignee {
            Assignee::Role(role) => self.role_name(role),
            Assignee::User(user) => self.user_name(user),
        }
    }

    /// Human-readable "assigned to" label; falls back to the raw key.
    fn assignee_label(&self, assignee: &Assignee) -> String {
        match (assignee, self.assignee_name(assignee)) {
            (Assignee::Role(_), Some(name)) => format!("Role: {name}"),
            (Assignee::User(_), Some(name)) => format!("User: {name}"),
            (Assignee::Role(role), None) => format!("Role: {role} (unknown)"),
            (Assignee::User(user), None) => format!("User: {user} (unknown)"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    roles: HashMap<RoleKey, String>,
    users: HashMap<UserId, String>,
}

impl InMemoryDirectory {
    pub fn with_role(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.roles.insert(RoleKey::new(key), name.into());
        self
    }

    pub fn with_user(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.users.insert(UserId::new(id), name.into());
        self
    }
}

impl Directory for InMemoryDirectory {
    fn role_name(&self, role: &RoleKey) -> Option<String> {
        self.roles.get(role).cloned()
    }

    fn user_name(&self, user: &UserId) -> Option<String> {
        self.users.get(user).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{Directory, InMemoryDirectory};
    use crate::domain::flow::{Assignee, RoleKey, UserId};

    #[test]
    fn labels_fall_back_to_raw_keys_for_unknown_assignees() {
        let directory = InMemoryDirectory::default()
            .with_role("ccd_supervisor", "CCD Supervisor")
            .with_user("U42", "Maria Santos");

        assert_eq!(
            directory.assignee_label(&Assignee::Role(RoleKey::new("ccd_supervisor"))),
            "Role: CCD Supervisor"
        );
        assert_eq!(
            directory.assignee_label(&Assignee::User(UserId::new("U42"))),
            "User: Maria Santos"
        );
        assert_eq!(
            directory.assignee_label(&Assignee::User(UserId::new("U7"))),
            "User: U7 (unknown)"
        );
    }
}
