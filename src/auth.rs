use ulid::Ulid;

use crate::error::CommandError;
use crate::model::{Principal, Role, UserId};

/// Authorization policy: pure decision functions over (actor roles,
/// resource owner). Nothing here knows how identities are issued.

/// May the actor mutate an entity owned by `owner`?
/// Allowed for the owner themselves and for staff (employee/admin).
pub fn can_modify(actor: &Principal, owner: Option<UserId>) -> bool {
    is_staff(actor) || owner.is_some_and(|o| o == actor.user_id)
}

pub fn is_staff(actor: &Principal) -> bool {
    actor.has_role(Role::Employee) || actor.has_role(Role::Admin)
}

/// Enforce `can_modify`, logging the denial with the requester and
/// target ids before the error propagates.
pub fn require_owner_or_staff(
    actor: &Principal,
    owner: Option<UserId>,
    target: Ulid,
) -> Result<(), CommandError> {
    if can_modify(actor, owner) {
        Ok(())
    } else {
        tracing::warn!(actor = %actor.user_id, target = %target, "authorization denied");
        Err(CommandError::Unauthorized {
            actor: actor.user_id,
            target,
        })
    }
}

/// Staff-only operations (vacancy scheduling).
pub fn require_staff(actor: &Principal, target: Ulid) -> Result<(), CommandError> {
    if is_staff(actor) {
        Ok(())
    } else {
        tracing::warn!(actor = %actor.user_id, target = %target, "authorization denied: staff role required");
        Err(CommandError::Unauthorized {
            actor: actor.user_id,
            target,
        })
    }
}
