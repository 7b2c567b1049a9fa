use axum::{
    extract::State,
    response::{AppendHeaders, IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::instrument;

use crate::{
    auth::{extractors::MaybeUser, paths},
    flash::Flash,
    state::AppState,
    views,
};

pub fn router() -> Router<AppState> {
    Router::new().route(paths::HOME, get(home))
}

#[instrument(skip_all)]
pub async fn home(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    flash: Flash,
) -> Response {
    let consumed = flash.consume(state.config.session.cookie_secure);
    (AppendHeaders(consumed), views::home(&flash.0, user.as_ref())).into_response()
}
