use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        checker::{hash_password, passwords_mismatch, Attempt, CredentialChecker},
        dto::{normalize_email, ForgotPasswordForm, ResetPasswordForm, SignInForm, SignUpForm},
        extractors::MaybeUser,
        paths,
        repo::StoreError,
        repo_types::{NewUser, User},
        session, tokens,
        validator::{Rule, Validator},
    },
    flash::{self, Flash, FlashMessage},
    mailer::Mail,
    state::AppState,
    views,
};

const EMAIL_RULES: &[Rule] = &[Rule::NoWhitespace, Rule::NotEmpty, Rule::Email];
const NEW_PASSWORD_RULES: &[Rule] = &[Rule::NoWhitespace, Rule::NotEmpty, Rule::MinLength(8)];
const REPEAT_RULES: &[Rule] = &[Rule::NoWhitespace, Rule::NotEmpty];

const INCORRECT_CREDENTIALS: &str = "Email or password is incorrect";
const UNCONFIRMED: &str = "Please finish your registration. Check your mail box.";
const PASSWORDS_DIFFER: &str = "Passwords do not match";
const UNKNOWN_EMAIL: &str = "Can't find that email, sorry";
const MAIL_FAILED: &str = "We could not send you an email right now, please try again later";
const CONFIRM_SENT: &str = "Please check your email to confirm registration";
const CONFIRMED: &str = "Your email is confirmed, you can sign in now";
const CONFIRM_INVALID: &str = "This confirmation link is invalid or has expired";
const RESET_SENT: &str = "Check your email for a link to reset your password. \
    If it doesn't appear within a few minutes, check your spam folder.";
const RESET_INVALID: &str = "This password reset link is invalid or has expired";
const RESET_DONE: &str = "Your password has been changed, you can sign in now";

type HandlerResult = Result<Response, (StatusCode, String)>;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(paths::SIGN_IN, get(get_sign_in).post(post_sign_in))
        .route(paths::SIGN_UP, get(get_sign_up).post(post_sign_up))
        .route(paths::CONFIRM_ROUTE, get(confirm_email))
        .route(
            paths::PASSWORD_FORGOT,
            get(get_forgot_password).post(post_forgot_password),
        )
        .route(
            paths::PASSWORD_RESET_ROUTE,
            get(get_reset_password).post(post_reset_password),
        )
        .route(paths::SIGN_OUT, get(sign_out))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}

fn back(state: &AppState, to: &str, messages: &[FlashMessage]) -> HandlerResult {
    flash::redirect(to, messages, state.config.session.cookie_secure).map_err(internal)
}

fn validation_failed(state: &AppState, to: &str, v: Validator) -> HandlerResult {
    let messages: Vec<FlashMessage> = v
        .into_errors()
        .into_iter()
        .map(|e| FlashMessage::error(e.message))
        .collect();
    back(state, to, &messages)
}

fn page(state: &AppState, flash: &Flash, html: axum::response::Html<String>) -> Response {
    let consumed = flash.consume(state.config.session.cookie_secure);
    (AppendHeaders(consumed), html).into_response()
}

fn taken_message(field: &str) -> &'static str {
    match field {
        "email" => "Email is already taken",
        _ => "Username is already taken",
    }
}

#[instrument(skip_all)]
pub async fn get_sign_in(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    flash: Flash,
) -> Response {
    if user.is_some() {
        return Redirect::to(paths::HOME).into_response();
    }
    page(&state, &flash, views::sign_in(&flash.0))
}

#[instrument(skip(state, form))]
pub async fn post_sign_in(
    State(state): State<AppState>,
    Form(mut form): Form<SignInForm>,
) -> HandlerResult {
    form.email = normalize_email(&form.email);

    let mut v = Validator::new();
    v.field("email", &form.email, EMAIL_RULES)
        .field("password", &form.password, REPEAT_RULES);
    if v.failed() {
        warn!("sign in form invalid");
        return validation_failed(&state, paths::SIGN_IN, v);
    }

    let attempt = CredentialChecker::new(state.users.as_ref())
        .attempt(&form.email, &form.password)
        .await
        .map_err(internal)?;

    let user = match attempt {
        Attempt::Authenticated(user) => user,
        Attempt::Unconfirmed(user) => {
            warn!(user_id = %user.id, "sign in before email confirmation");
            return back(&state, paths::SIGN_IN, &[FlashMessage::error(UNCONFIRMED)]);
        }
        Attempt::Rejected => {
            warn!("sign in rejected");
            let messages = [FlashMessage::error(INCORRECT_CREDENTIALS)];
            return back(&state, paths::SIGN_IN, &messages);
        }
    };

    let cookie = session::start(&state, user.id).await.map_err(internal)?;
    info!(user_id = %user.id, "user signed in");
    Ok((AppendHeaders([(SET_COOKIE, cookie)]), Redirect::to(paths::HOME)).into_response())
}

#[instrument(skip_all)]
pub async fn get_sign_up(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    flash: Flash,
) -> Response {
    if user.is_some() {
        return Redirect::to(paths::HOME).into_response();
    }
    page(&state, &flash, views::sign_up(&flash.0))
}

#[instrument(skip(state, form))]
pub async fn post_sign_up(
    State(state): State<AppState>,
    Form(mut form): Form<SignUpForm>,
) -> HandlerResult {
    form.email = normalize_email(&form.email);
    form.username = form.username.trim().to_string();
    form.name = form.name.trim().to_string();
    form.surname = form.surname.trim().to_string();

    let mut v = Validator::new();
    v.field("email", &form.email, EMAIL_RULES)
        .field("username", &form.username, &[Rule::NotEmpty])
        .field("name", &form.name, &[Rule::NotEmpty, Rule::Alpha])
        .field("surname", &form.surname, &[Rule::NotEmpty, Rule::Alpha])
        .field("password", &form.password, NEW_PASSWORD_RULES)
        .field("password_repeat", &form.password_repeat, REPEAT_RULES);

    if !v.has_error("email")
        && state
            .users
            .find_by_email(&form.email)
            .await
            .map_err(internal)?
            .is_some()
    {
        v.reject("email", taken_message("email"));
    }
    if !v.has_error("username")
        && state
            .users
            .username_taken(&form.username)
            .await
            .map_err(internal)?
    {
        v.reject("username", taken_message("username"));
    }
    if v.failed() {
        warn!("sign up form invalid");
        return validation_failed(&state, paths::SIGN_UP, v);
    }

    if passwords_mismatch(&form.password, &form.password_repeat) {
        warn!("sign up passwords differ");
        return back(&state, paths::SIGN_UP, &[FlashMessage::error(PASSWORDS_DIFFER)]);
    }

    let password_hash = hash_password(&form.password).map_err(internal)?;
    let user = match state
        .users
        .create(NewUser {
            email: form.email,
            username: form.username,
            first_name: form.name,
            last_name: form.surname,
            password_hash,
        })
        .await
    {
        Ok(user) => user,
        Err(StoreError::Taken(field)) => {
            // Lost a race against a concurrent sign-up.
            warn!(field, "unique field taken on insert");
            return back(&state, paths::SIGN_UP, &[FlashMessage::error(taken_message(field))]);
        }
        Err(StoreError::Other(e)) => return Err(internal(format!("{e:#}"))),
    };

    if let Err(e) = send_confirmation(&state, &user).await {
        error!(error = %e, user_id = %user.id, "confirmation mail failed");
        // Frees the email and username for the next attempt.
        state
            .users
            .discard_unconfirmed(user.id)
            .await
            .map_err(internal)?;
        return back(&state, paths::SIGN_UP, &[FlashMessage::error(MAIL_FAILED)]);
    }

    info!(user_id = %user.id, "user registered");
    back(&state, paths::SIGN_UP, &[FlashMessage::global(CONFIRM_SENT)])
}

async fn send_confirmation(state: &AppState, user: &User) -> anyhow::Result<()> {
    let token = tokens::issue();
    let expires_at =
        OffsetDateTime::now_utc() + Duration::hours(state.config.tokens.confirm_ttl_hours);
    state
        .users
        .add_email_confirmation(&user.email, &token.hash, expires_at)
        .await?;

    let link = state.config.link(&paths::confirm(&token.raw));
    let mail = Mail::confirmation(&user.email, &user.username, &link);
    state.mailer.send(&mail).await
}

#[instrument(skip_all)]
pub async fn confirm_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> HandlerResult {
    let confirmed = if tokens::looks_valid(&token) {
        state
            .users
            .confirm_email(&tokens::hash_token(&token), OffsetDateTime::now_utc())
            .await
            .map_err(internal)?
    } else {
        None
    };

    match confirmed {
        Some(user) => {
            info!(user_id = %user.id, "email confirmed");
            back(&state, paths::SIGN_IN, &[FlashMessage::global(CONFIRMED)])
        }
        None => {
            warn!("confirmation link rejected");
            back(&state, paths::SIGN_IN, &[FlashMessage::error(CONFIRM_INVALID)])
        }
    }
}

#[instrument(skip_all)]
pub async fn get_forgot_password(State(state): State<AppState>, flash: Flash) -> Response {
    page(&state, &flash, views::forgot_password(&flash.0))
}

#[instrument(skip(state, form))]
pub async fn post_forgot_password(
    State(state): State<AppState>,
    Form(mut form): Form<ForgotPasswordForm>,
) -> HandlerResult {
    form.email = normalize_email(&form.email);

    let mut v = Validator::new();
    v.field("email", &form.email, EMAIL_RULES);
    if v.failed() {
        return validation_failed(&state, paths::PASSWORD_FORGOT, v);
    }

    let Some(user) = state
        .users
        .find_by_email(&form.email)
        .await
        .map_err(internal)?
    else {
        warn!("password reset for unknown email");
        return back(&state, paths::PASSWORD_FORGOT, &[FlashMessage::error(UNKNOWN_EMAIL)]);
    };

    let token = tokens::issue();
    let ttl_minutes = state.config.tokens.reset_ttl_minutes;
    let expires_at = OffsetDateTime::now_utc() + Duration::minutes(ttl_minutes);
    state
        .users
        .add_password_reset(user.id, &token.hash, expires_at)
        .await
        .map_err(internal)?;

    let link = state.config.link(&paths::password_reset(&token.raw));
    let mail = Mail::password_reset(&user.email, &user.username, &link, ttl_minutes);
    if let Err(e) = state.mailer.send(&mail).await {
        error!(error = %e, user_id = %user.id, "password reset mail failed");
        return back(&state, paths::PASSWORD_FORGOT, &[FlashMessage::error(MAIL_FAILED)]);
    }

    info!(user_id = %user.id, "password reset requested");
    back(&state, paths::PASSWORD_FORGOT, &[FlashMessage::global(RESET_SENT)])
}

async fn reset_token_usable(state: &AppState, token: &str) -> Result<bool, (StatusCode, String)> {
    if !tokens::looks_valid(token) {
        return Ok(false);
    }
    let owner = state
        .users
        .password_reset_owner(&tokens::hash_token(token), OffsetDateTime::now_utc())
        .await
        .map_err(internal)?;
    Ok(owner.is_some())
}

#[instrument(skip_all)]
pub async fn get_reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    flash: Flash,
) -> HandlerResult {
    if !reset_token_usable(&state, &token).await? {
        warn!("reset link rejected");
        return back(&state, paths::PASSWORD_FORGOT, &[FlashMessage::error(RESET_INVALID)]);
    }
    Ok(page(&state, &flash, views::reset_password(&flash.0, &token)))
}

#[instrument(skip_all)]
pub async fn post_reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Form(form): Form<ResetPasswordForm>,
) -> HandlerResult {
    if !reset_token_usable(&state, &token).await? {
        warn!("reset link rejected");
        return back(&state, paths::PASSWORD_FORGOT, &[FlashMessage::error(RESET_INVALID)]);
    }

    let here = paths::password_reset(&token);
    let mut v = Validator::new();
    v.field("password", &form.password, NEW_PASSWORD_RULES)
        .field("password_repeat", &form.password_repeat, REPEAT_RULES);
    if v.failed() {
        return validation_failed(&state, &here, v);
    }
    if passwords_mismatch(&form.password, &form.password_repeat) {
        return back(&state, &here, &[FlashMessage::error(PASSWORDS_DIFFER)]);
    }

    let password_hash = hash_password(&form.password).map_err(internal)?;
    let Some(user) = state
        .users
        .reset_password(&tokens::hash_token(&token), &password_hash, OffsetDateTime::now_utc())
        .await
        .map_err(internal)?
    else {
        // Consumed or expired between the check above and now.
        return back(&state, paths::PASSWORD_FORGOT, &[FlashMessage::error(RESET_INVALID)]);
    };

    let closed = state.sessions.close_all(user.id).await.map_err(internal)?;
    info!(user_id = %user.id, sessions_closed = closed, "password reset");
    back(&state, paths::SIGN_IN, &[FlashMessage::global(RESET_DONE)])
}

#[instrument(skip_all)]
pub async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> HandlerResult {
    let cookie = session::end(&state, &headers).await.map_err(internal)?;
    Ok((AppendHeaders([(SET_COOKIE, cookie)]), Redirect::to(paths::SIGN_IN)).into_response())
}
