use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,                // trimmed, lowercased
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,        // Argon2 PHC string, never plaintext
    pub email_confirmed: bool,
    pub created_at: OffsetDateTime,
}

/// Fields collected by the sign-up form, password already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
}
