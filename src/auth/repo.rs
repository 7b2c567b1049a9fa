use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

const USER_COLUMNS: &str =
    "id, email, username, first_name, last_name, password_hash, email_confirmed, created_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique field ("email" or "username") already belongs to another user.
    #[error("{0} is already taken")]
    Taken(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Users plus the single-use tokens tied to them.
///
/// Token methods take the sha256 of the raw token; raw values never reach storage.
/// Consuming methods succeed at most once per token and only before `expires_at`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn username_taken(&self, username: &str) -> anyhow::Result<bool>;
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Removes a user that never confirmed, with its tokens. Confirmed users are kept.
    async fn discard_unconfirmed(&self, id: Uuid) -> anyhow::Result<()>;

    async fn add_email_confirmation(
        &self,
        email: &str,
        token_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    /// Marks the token used and the owner's e-mail confirmed.
    async fn confirm_email(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;

    async fn add_password_reset(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    /// Owner of a usable reset token, without consuming it.
    async fn password_reset_owner(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>>;

    /// Consumes the reset token and stores the new password hash.
    async fn reset_password(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn taken_field(err: &sqlx::Error) -> Option<&'static str> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    match db_err.constraint() {
        Some("users_email_key") => Some("email"),
        Some("users_username_key") => Some("username"),
        _ => None,
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn username_taken(&self, username: &str) -> anyhow::Result<bool> {
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.db)
                .await
                .context("check username")?;
        Ok(taken)
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, username, first_name, last_name, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match taken_field(&e) {
            Some(field) => StoreError::Taken(field),
            None => StoreError::Other(anyhow::Error::new(e).context("insert user")),
        })?;
        Ok(created)
    }

    async fn discard_unconfirmed(&self, id: Uuid) -> anyhow::Result<()> {
        // Token rows go with the user through ON DELETE CASCADE.
        sqlx::query("DELETE FROM users WHERE id = $1 AND email_confirmed = FALSE")
            .bind(id)
            .execute(&self.db)
            .await
            .context("discard unconfirmed user")?;
        Ok(())
    }

    async fn add_email_confirmation(
        &self,
        email: &str,
        token_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        sqlx::query(
            "DELETE FROM email_confirmations \
             WHERE email = $1 AND (used_at IS NOT NULL OR expires_at <= now())",
        )
        .bind(email)
        .execute(&mut *tx)
        .await
        .context("prune email confirmations")?;

        sqlx::query(
            "INSERT INTO email_confirmations (token_hash, email, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(token_hash)
        .bind(email)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .context("insert email confirmation")?;
        tx.commit().await.context("commit tx")?;
        Ok(())
    }

    async fn confirm_email(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let email: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE email_confirmations
               SET used_at = $2
             WHERE token_hash = $1 AND used_at IS NULL AND expires_at > $2
            RETURNING email
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .context("consume email confirmation")?;

        let Some(email) = email else {
            return Ok(None);
        };

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET email_confirmed = TRUE WHERE email = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await
        .context("mark email confirmed")?;
        tx.commit().await.context("commit tx")?;
        Ok(user)
    }

    async fn add_password_reset(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        sqlx::query(
            "DELETE FROM password_resets \
             WHERE user_id = $1 AND (used_at IS NOT NULL OR expires_at <= now())",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("prune password resets")?;

        sqlx::query(
            "INSERT INTO password_resets (token_hash, user_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .context("insert password reset")?;
        tx.commit().await.context("commit tx")?;
        Ok(())
    }

    async fn password_reset_owner(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>> {
        let owner: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM password_resets
             WHERE token_hash = $1 AND used_at IS NULL AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("lookup password reset")?;
        Ok(owner)
    }

    async fn reset_password(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let owner: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE password_resets
               SET used_at = $2
             WHERE token_hash = $1 AND used_at IS NULL AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .context("consume password reset")?;

        let Some(user_id) = owner else {
            return Ok(None);
        };

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET password_hash = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(password_hash)
        .fetch_optional(&mut *tx)
        .await
        .context("update password")?;

        // Outstanding links for the same account die with this one.
        sqlx::query(
            "UPDATE password_resets SET used_at = $2 WHERE user_id = $1 AND used_at IS NULL",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("expire other password resets")?;

        tx.commit().await.context("commit tx")?;
        Ok(user)
    }
}
