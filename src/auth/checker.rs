use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::{debug, error};

use crate::auth::{repo::UserStore, repo_types::User};

/// Outcome of checking an e-mail/password pair.
#[derive(Debug)]
pub enum Attempt {
    Authenticated(User),
    /// Password is right but the address was never confirmed.
    Unconfirmed(User),
    /// Unknown e-mail or wrong password; callers must not tell them apart.
    Rejected,
}

pub struct CredentialChecker<'a> {
    users: &'a dyn UserStore,
}

impl<'a> CredentialChecker<'a> {
    pub fn new(users: &'a dyn UserStore) -> Self {
        Self { users }
    }

    pub async fn attempt(&self, email: &str, password: &str) -> anyhow::Result<Attempt> {
        let Some(user) = self.users.find_by_email(email).await? else {
            debug!(email = %email, "attempt for unknown email");
            return Ok(Attempt::Rejected);
        };

        if !verify_password(password, &user.password_hash)? {
            debug!(user_id = %user.id, "attempt with wrong password");
            return Ok(Attempt::Rejected);
        }

        if !user.email_confirmed {
            return Ok(Attempt::Unconfirmed(user));
        }
        Ok(Attempt::Authenticated(user))
    }
}

/// True when the repeated password does not match the first one.
pub fn passwords_mismatch(password: &str, repeated: &str) -> bool {
    password != repeated
}

/// Alphanumeric string drawn from the OS CSPRNG.
pub fn random_string(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
