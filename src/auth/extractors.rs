use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use tracing::error;

use super::{repo_types::User, session};
use crate::state::AppState;

/// The signed-in user, if the request carries a live session.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = session::resolve(state, &parts.headers).await.map_err(|e| {
            error!(error = %e, "session lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "session lookup failed".to_string())
        })?;
        let Some(claims) = claims else {
            return Ok(MaybeUser(None));
        };

        let user = state.users.find_by_id(claims.sub).await.map_err(|e| {
            error!(error = %e, user_id = %claims.sub, "user lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "user lookup failed".to_string())
        })?;
        Ok(MaybeUser(user))
    }
}
