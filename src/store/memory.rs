//! In-memory stores for local runs and tests.
//!
//! A single mutex guards both the pending and confirmed sets, which is what
//! makes promotion atomic per username.

use super::{
    generate_token, hash_token, now_unix, AccountRecord, AccountStore, PendingAccount,
    SessionError, SessionHandle, SessionRecord, SessionStore, StoreError,
};
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct Accounts {
    pending: HashMap<String, PendingAccount>,
    confirmed: HashMap<String, AccountRecord>,
}

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<Accounts>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending(&self, username: &str) -> Option<PendingAccount> {
        self.accounts.lock().await.pending.get(username).cloned()
    }

    pub async fn account(&self, username: &str) -> Option<AccountRecord> {
        self.accounts.lock().await.confirmed.get(username).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.accounts.lock().await.pending.len()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create(&self, pending: PendingAccount) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().await;

        if accounts.confirmed.contains_key(&pending.username) {
            return Err(StoreError::Duplicate);
        }
        if let Some(existing) = accounts.pending.get(&pending.username) {
            if !existing.is_expired(now_unix()) {
                return Err(StoreError::Duplicate);
            }
        }

        accounts.pending.insert(pending.username.clone(), pending);
        Ok(())
    }

    async fn promote(
        &self,
        username: &str,
        registration_key: &str,
    ) -> Result<AccountRecord, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let now = now_unix();

        let Some(pending) = accounts.pending.get(username) else {
            return Err(StoreError::UnknownRegistration);
        };
        if pending.is_expired(now) {
            return Err(StoreError::UnknownRegistration);
        }
        if pending.registration_key_hash != hash_token(registration_key) {
            return Err(StoreError::InvalidKey);
        }

        let Some(pending) = accounts.pending.remove(username) else {
            return Err(StoreError::UnknownRegistration);
        };
        let account = AccountRecord {
            username: pending.username,
            email: pending.email,
            credential_hash: pending.credential_hash,
            confirmed_at: now,
        };
        accounts
            .confirmed
            .insert(account.username.clone(), account.clone());

        Ok(account)
    }

    async fn demote(&self, pending: PendingAccount) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().await;
        if accounts.confirmed.remove(&pending.username).is_none() {
            return Err(StoreError::UnknownRegistration);
        }
        accounts.pending.insert(pending.username.clone(), pending);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct MemorySessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn bind(&self, username: &str, email: &str) -> Result<SessionHandle, SessionError> {
        let token = generate_token()?;
        let now = now_unix();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let record = SessionRecord {
            username: username.to_string(),
            email: email.to_string(),
            expires_at: now.saturating_add(ttl),
        };

        let mut sessions = self.sessions.lock().await;
        // Sweep on write; lookup only filters.
        sessions.retain(|_, existing| existing.expires_at > now);
        sessions.insert(hash_token(&token), record.clone());

        Ok(SessionHandle::new(SecretString::from(token), record))
    }

    async fn lookup(&self, token: &str) -> Result<Option<SessionRecord>, SessionError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(&hash_token(token))
            .filter(|record| record.expires_at > now_unix())
            .cloned())
    }

    async fn destroy(&self, token: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.sessions.lock().await.remove(&hash_token(token)))
    }
}
