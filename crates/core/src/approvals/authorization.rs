use crate::domain::actor::Actor;
use crate::domain::flow::Assignee;
use crate::errors::ApprovalError;

/// Whether `actor` may decide a step assigned to `assignee`.
///
/// The engine and the dashboard both go through this predicate so that
/// "awaiting my approval" lists exactly what the actor can act on.
pub fn can_act(actor: &Actor, assignee: &Assignee) -> bool {
    match assignee {
        Assignee::User(user) => actor.user_id == *user,
        Assignee::Role(role) => actor.holds_role(role),
    }
}

pub fn ensure_can_act(actor: &Actor, assignee: &Assignee) -> Result<(), ApprovalError> {
    if can_act(actor, assignee) {
        return Ok(());
    }

    let reason = match assignee {
        Assignee::User(_) => "This step is assigned to another user.".to_owned(),
        Assignee::Role(role) => format!("This step requires the `{role}` role."),
    };
    Err(ApprovalError::unauthorized(reason))
}

pub fn ensure_can_manage_flows(actor: &Actor) -> Result<(), ApprovalError> {
    if actor.can_manage_flows() {
        Ok(())
    } else {
        Err(ApprovalError::unauthorized("Only a superadmin can manage approval flows."))
    }
}

pub fn ensure_can_reset(actor: &Actor) -> Result<(), ApprovalError> {
    if actor.can_reset_approvals() {
        Ok(())
    } else {
        Err(ApprovalError::unauthorized("You are not allowed to reset approvals."))
    }
}

#[cfg(test)]
mod tests {
    use super::{can_act, ensure_can_act, ensure_can_manage_flows, ensure_can_reset};
    use crate::domain::actor::{Actor, Capability};
    use crate::domain::flow::{Assignee, RoleKey, UserId};
    use crate::errors::ApprovalError;

    #[test]
    fn user_assigned_step_matches_identity_only() {
        let step = Assignee::User(UserId::new("U42"));

        assert!(can_act(&Actor::new("U42"), &step));
        assert!(!can_act(&Actor::new("U99").with_role("U42"), &step));
    }

    #[test]
    fn role_assigned_step_matches_membership_only() {
        let step = Assignee::Role(RoleKey::new("ccd_supervisor"));

        assert!(can_act(&Actor::new("U1").with_role("ccd_supervisor"), &step));
        assert!(!can_act(&Actor::new("ccd_supervisor"), &step));
        assert!(!can_act(&Actor::superadmin("admin"), &step));
    }

    #[test]
    fn refusals_are_authorization_errors() {
        let error = ensure_can_act(&Actor::new("U99"), &Assignee::Role(RoleKey::new("cashier")))
            .expect_err("must refuse");
        assert!(matches!(
            error,
            ApprovalError::Authorization { ref reason } if reason.contains("cashier")
        ));

        assert!(ensure_can_manage_flows(&Actor::new("U1")).is_err());
        assert!(ensure_can_manage_flows(&Actor::superadmin("root")).is_ok());
    }

    #[test]
    fn reset_is_allowed_for_flow_admins_and_reset_capability() {
        assert!(ensure_can_reset(&Actor::superadmin("root")).is_ok());
        let resetter = Actor::new("U5").with_capability(Capability::ResetApprovals);
        assert!(ensure_can_reset(&resetter).is_ok());
        assert!(ensure_can_reset(&Actor::new("U5").with_role("ccd_supervisor")).is_err());
    }
}
