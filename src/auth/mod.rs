use crate::state::AppState;
use axum::Router;

pub mod checker;
mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod session;
pub mod tokens;
pub mod validator;

/// Named routes the controller redirects between.
pub mod paths {
    pub const HOME: &str = "/";
    pub const SIGN_IN: &str = "/auth/signin";
    pub const SIGN_UP: &str = "/auth/signup";
    pub const SIGN_OUT: &str = "/auth/signout";
    pub const PASSWORD_FORGOT: &str = "/auth/password/forgot";
    pub const CONFIRM_ROUTE: &str = "/auth/confirm/:token";
    pub const PASSWORD_RESET_ROUTE: &str = "/auth/password/reset/:token";

    pub fn confirm(token: &str) -> String {
        format!("/auth/confirm/{token}")
    }

    pub fn password_reset(token: &str) -> String {
        format!("/auth/password/reset/{token}")
    }
}

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
