//! In-memory stores and a recording mailer for tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{
        checker::hash_password,
        repo::{StoreError, UserStore},
        repo_types::{NewUser, User},
        session::SessionStore,
    },
    mailer::{Mail, Mailer},
    state::{test_config, AppState},
};

struct TokenRow<K> {
    owner: K,
    expires_at: OffsetDateTime,
    used: bool,
}

impl<K: Clone> TokenRow<K> {
    fn usable(&self, now: OffsetDateTime) -> Option<K> {
        (!self.used && self.expires_at > now).then(|| self.owner.clone())
    }
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    confirmations: HashMap<Vec<u8>, TokenRow<String>>,
    resets: HashMap<Vec<u8>, TokenRow<Uuid>>,
    // Field reported taken by the next `create`, as if another insert won.
    create_conflict: Option<&'static str>,
}

#[derive(Default)]
pub struct MemoryUserStore {
    tables: Mutex<Tables>,
}

impl MemoryUserStore {
    pub fn insert_user(
        &self,
        email: &str,
        username: &str,
        password: &str,
        confirmed: bool,
    ) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.into(),
            username: username.into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            password_hash: hash_password(password).expect("hash"),
            email_confirmed: confirmed,
            created_at: OffsetDateTime::now_utc(),
        };
        self.tables.lock().unwrap().users.push(user.clone());
        user
    }

    pub fn user(&self, email: &str) -> Option<User> {
        self.tables.lock().unwrap().users.iter().find(|u| u.email == email).cloned()
    }

    /// Makes the next `create` fail on `field` after the availability checks passed.
    pub fn conflict_on_create(&self, field: &'static str) {
        self.tables.lock().unwrap().create_conflict = Some(field);
    }

    pub fn confirmation_count(&self) -> usize {
        self.tables.lock().unwrap().confirmations.len()
    }

    /// Moves every stored token's expiry into the past.
    pub fn expire_tokens(&self) {
        let past = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        let mut t = self.tables.lock().unwrap();
        t.confirmations.values_mut().for_each(|r| r.expires_at = past);
        t.resets.values_mut().for_each(|r| r.expires_at = past);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.user(email))
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn username_taken(&self, username: &str) -> anyhow::Result<bool> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.iter().any(|u| u.username == username))
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(field) = t.create_conflict.take() {
            return Err(StoreError::Taken(field));
        }
        if t.users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::Taken("email"));
        }
        if t.users.iter().any(|u| u.username == new.username) {
            return Err(StoreError::Taken("username"));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            username: new.username,
            first_name: new.first_name,
            last_name: new.last_name,
            password_hash: new.password_hash,
            email_confirmed: false,
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.push(user.clone());
        Ok(user)
    }

    async fn discard_unconfirmed(&self, id: Uuid) -> anyhow::Result<()> {
        let mut t = self.tables.lock().unwrap();
        let Some(pos) = t.users.iter().position(|u| u.id == id && !u.email_confirmed) else {
            return Ok(());
        };
        let user = t.users.remove(pos);
        t.confirmations.retain(|_, r| r.owner != user.email);
        t.resets.retain(|_, r| r.owner != user.id);
        Ok(())
    }

    async fn add_email_confirmation(
        &self,
        email: &str,
        token_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let row = TokenRow {
            owner: email.to_string(),
            expires_at,
            used: false,
        };
        self.tables.lock().unwrap().confirmations.insert(token_hash.to_vec(), row);
        Ok(())
    }

    async fn confirm_email(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.lock().unwrap();
        let Some(row) = t.confirmations.get_mut(token_hash) else {
            return Ok(None);
        };
        let Some(email) = row.usable(now) else {
            return Ok(None);
        };
        row.used = true;
        let user = t.users.iter_mut().find(|u| u.email == email).map(|u| {
            u.email_confirmed = true;
            u.clone()
        });
        Ok(user)
    }

    async fn add_password_reset(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let row = TokenRow {
            owner: user_id,
            expires_at,
            used: false,
        };
        self.tables.lock().unwrap().resets.insert(token_hash.to_vec(), row);
        Ok(())
    }

    async fn password_reset_owner(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>> {
        let t = self.tables.lock().unwrap();
        Ok(t.resets.get(token_hash).and_then(|r| r.usable(now)))
    }

    async fn reset_password(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.lock().unwrap();
        let Some(user_id) = t.resets.get(token_hash).and_then(|r| r.usable(now)) else {
            return Ok(None);
        };
        t.resets
            .values_mut()
            .filter(|r| r.owner == user_id)
            .for_each(|r| r.used = true);
        let user = t.users.iter_mut().find(|u| u.id == user_id).map(|u| {
            u.password_hash = password_hash.to_string();
            u.clone()
        });
        Ok(user)
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, (Uuid, OffsetDateTime)>>,
}

impl MemorySessionStore {
    pub fn count_for(&self, user_id: Uuid) -> usize {
        let s = self.sessions.lock().unwrap();
        s.values().filter(|(owner, _)| *owner == user_id).count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn open(&self, user_id: Uuid, expires_at: OffsetDateTime) -> anyhow::Result<Uuid> {
        let now = OffsetDateTime::now_utc();
        let mut s = self.sessions.lock().unwrap();
        s.retain(|_, (owner, exp)| *owner != user_id || *exp > now);
        let id = Uuid::new_v4();
        s.insert(id, (user_id, expires_at));
        Ok(id)
    }

    async fn is_active(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let s = self.sessions.lock().unwrap();
        Ok(matches!(s.get(&session_id), Some((owner, exp)) if *owner == user_id && *exp > now))
    }

    async fn close(&self, session_id: Uuid) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().remove(&session_id);
        Ok(())
    }

    async fn close_all(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let mut s = self.sessions.lock().unwrap();
        let before = s.len();
        s.retain(|_, (owner, _)| *owner != user_id);
        Ok((before - s.len()) as u64)
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Mail>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().unwrap().clone()
    }

    /// Path of the first link to this service in the latest mail.
    pub fn last_link_path(&self) -> Option<String> {
        let mail = self.sent.lock().unwrap().last().cloned()?;
        let base = test_config().base_url;
        mail.body
            .split_whitespace()
            .find_map(|w| w.strip_prefix(base.as_str()).map(str::to_string))
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &Mail) -> anyhow::Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("smtp unavailable");
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Shared fakes plus the state wired to them.
pub struct Fixture {
    pub users: Arc<MemoryUserStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub mailer: Arc<RecordingMailer>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            users: Arc::default(),
            sessions: Arc::default(),
            mailer: Arc::default(),
        }
    }

    pub fn state(&self) -> AppState {
        AppState::from_parts(
            Arc::new(test_config()),
            self.users.clone(),
            self.sessions.clone(),
            self.mailer.clone(),
        )
    }
}
