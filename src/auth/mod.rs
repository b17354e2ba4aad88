//! Team membership checks and bearer-token verification.

mod jwt;
mod middleware;

pub use jwt::{sign_token, Claims, TokenVerifier};
pub use middleware::AuthUser;

use crate::db::{self, Database, Role};
use crate::error::{CoreError, CoreResult};

/// Roles that may reply to and delete comments.
pub const COMMENT_ROLES: &[Role] = &[Role::Admin, Role::Comments];
/// Roles that may publish, edit and delete posts.
pub const POST_ROLES: &[Role] = &[Role::Admin, Role::Posts];
/// Roles that may read analytics.
pub const ANALYTICS_ROLES: &[Role] = &[Role::Admin, Role::Analytics];

/// Roles of `user_id` in `team_id`; fails `Forbidden` for non-members.
pub async fn require_member(db: &Database, team_id: i64, user_id: i64) -> CoreResult<Vec<Role>> {
    db::get_member_roles(db.pool(), team_id, user_id)
        .await
        .map_err(CoreError::store)?
        .ok_or_else(|| CoreError::Forbidden(format!("user {user_id} is not a member of team {team_id}")))
}

/// Succeeds iff the user's roles intersect `any_of`.
pub async fn require_any_role(
    db: &Database,
    team_id: i64,
    user_id: i64,
    any_of: &[Role],
) -> CoreResult<()> {
    let roles = require_member(db, team_id, user_id).await?;
    if has_any_role(&roles, any_of) {
        Ok(())
    } else {
        let wanted: Vec<&str> = any_of.iter().map(Role::as_str).collect();
        Err(CoreError::Forbidden(format!(
            "one of the roles [{}] is required",
            wanted.join(", ")
        )))
    }
}

#[must_use]
pub fn has_any_role(roles: &[Role], any_of: &[Role]) -> bool {
    roles.iter().any(|r| any_of.contains(r))
}
