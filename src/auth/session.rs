use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::FromRef,
    http::{HeaderMap, HeaderValue},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::SessionConfig, cookies, state::AppState};

pub const SESSION_COOKIE: &str = "authgate_session";

/// Payload of the signed session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,  // user ID
    pub sid: Uuid,  // server-side session row
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Server-side record of live sessions; a signed cookie alone is not enough.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Opens a session, dropping the user's expired ones first.
    async fn open(&self, user_id: Uuid, expires_at: OffsetDateTime) -> anyhow::Result<Uuid>;
    async fn is_active(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool>;
    async fn close(&self, session_id: Uuid) -> anyhow::Result<()>;
    /// Ends every session of the user, returning how many were live.
    async fn close_all(&self, user_id: Uuid) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn open(&self, user_id: Uuid, expires_at: OffsetDateTime) -> anyhow::Result<Uuid> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND expires_at <= now()")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("prune sessions")?;

        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .context("insert session")?;
        tx.commit().await.context("commit tx")?;
        Ok(id)
    }

    async fn is_active(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let active: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sessions
                 WHERE id = $1 AND user_id = $2 AND expires_at > $3
            )
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.db)
        .await
        .context("lookup session")?;
        Ok(active)
    }

    async fn close(&self, session_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.db)
            .await
            .context("delete session")?;
        Ok(())
    }

    async fn close_all(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let done = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("delete user sessions")?;
        Ok(done.rows_affected())
    }
}

/// Signing material for session cookies.
#[derive(Clone)]
pub struct SessionKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
    pub secure: bool,
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        let SessionConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
            cookie_secure,
        } = state.config.session.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl: Duration::from_secs((ttl_minutes.max(1) as u64) * 60),
            secure: cookie_secure,
        }
    }
}

impl SessionKeys {
    pub fn sign(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = SessionClaims {
            sub: user_id,
            sid: session_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, session_id = %session_id, "session signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    fn cookie(&self, token: &str) -> anyhow::Result<HeaderValue> {
        cookies::set(SESSION_COOKIE, token, self.ttl.as_secs() as i64, self.secure)
            .context("build session cookie")
    }

    pub fn clear_cookie(&self) -> anyhow::Result<HeaderValue> {
        cookies::clear(SESSION_COOKIE, self.secure).context("build session cookie")
    }
}

/// Opens a session for the user and returns the `Set-Cookie` value carrying it.
pub async fn start(state: &AppState, user_id: Uuid) -> anyhow::Result<HeaderValue> {
    let keys = SessionKeys::from_ref(state);
    let now = OffsetDateTime::now_utc();
    let expires_at = now + TimeDuration::seconds(keys.ttl.as_secs() as i64);
    let session_id = state.sessions.open(user_id, expires_at).await?;
    let token = keys.sign(user_id, session_id, now)?;
    keys.cookie(&token)
}

/// Live session behind the request cookie, if any.
pub async fn resolve(
    state: &AppState,
    headers: &HeaderMap,
) -> anyhow::Result<Option<SessionClaims>> {
    let Some(token) = cookies::read(headers, SESSION_COOKIE) else {
        return Ok(None);
    };
    let keys = SessionKeys::from_ref(state);
    let claims = match keys.verify(token) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "invalid or expired session cookie");
            return Ok(None);
        }
    };
    let active = state
        .sessions
        .is_active(claims.sid, claims.sub, OffsetDateTime::now_utc())
        .await?;
    Ok(active.then_some(claims))
}

/// Ends the session behind the request cookie and returns the clearing cookie.
pub async fn end(state: &AppState, headers: &HeaderMap) -> anyhow::Result<HeaderValue> {
    let keys = SessionKeys::from_ref(state);
    let claims = cookies::read(headers, SESSION_COOKIE).and_then(|t| keys.verify(t).ok());
    if let Some(claims) = claims {
        state.sessions.close(claims.sid).await?;
        debug!(user_id = %claims.sub, session_id = %claims.sid, "session closed");
    }
    keys.clear_cookie()
}
