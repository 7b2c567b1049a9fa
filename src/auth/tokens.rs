//! Single-use tokens for e-mail confirmation and password reset links.

use sha2::{Digest, Sha256};

use crate::auth::checker::random_string;

const TOKEN_LEN: usize = 48;

/// A freshly generated token. `raw` goes into the mailed link, `hash` into storage.
pub struct IssuedToken {
    pub raw: String,
    pub hash: Vec<u8>,
}

pub fn issue() -> IssuedToken {
    let raw = random_string(TOKEN_LEN);
    let hash = hash_token(&raw);
    IssuedToken { raw, hash }
}

pub fn hash_token(raw: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.finalize().to_vec()
}

/// Cheap shape check so garbage paths never reach the database.
pub fn looks_valid(raw: &str) -> bool {
    raw.len() == TOKEN_LEN && raw.chars().all(|c| c.is_ascii_alphanumeric())
}
