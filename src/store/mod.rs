//! Account and session persistence.
//!
//! Pending registrations and confirmed accounts live behind [`AccountStore`];
//! sessions bound at confirmation live behind [`SessionStore`]. Both come in a
//! PostgreSQL flavour for deployments and an in-memory flavour for local runs
//! and tests. Raw registration keys and session tokens never reach a store:
//! callers hand over SHA-256 digests only.

pub mod memory;
pub mod postgres;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use memory::{MemoryAccountStore, MemorySessionStore};
pub use postgres::{PgAccountStore, PgSessionStore};

/// Unconfirmed registration awaiting the emailed link.
#[derive(Clone)]
pub struct PendingAccount {
    pub username: String,
    pub email: String,
    pub credential_hash: String,
    pub registration_key_hash: Vec<u8>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl PendingAccount {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for PendingAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAccount")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Permanent account produced by a successful confirmation.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub username: String,
    pub email: String,
    pub credential_hash: String,
    pub confirmed_at: i64,
}

impl std::fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRecord")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("confirmed_at", &self.confirmed_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already registered")]
    Duplicate,
    #[error("no pending registration for username")]
    UnknownRegistration,
    #[error("registration key does not match")]
    InvalidKey,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Pending set plus the confirmed accounts they are promoted into.
///
/// Implementations must keep a username in at most one of the two sets and
/// make `promote` atomic per username.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Store a pending account.
    ///
    /// # Errors
    /// [`StoreError::Duplicate`] when the username is pending (and not expired)
    /// or already confirmed.
    async fn create(&self, pending: PendingAccount) -> Result<(), StoreError>;

    /// Move a pending account into the confirmed set.
    ///
    /// # Errors
    /// [`StoreError::UnknownRegistration`] when nothing (unexpired) is pending,
    /// [`StoreError::InvalidKey`] when the key does not match; the pending
    /// record is left untouched in both cases.
    async fn promote(
        &self,
        username: &str,
        registration_key: &str,
    ) -> Result<AccountRecord, StoreError>;

    /// Undo a promotion: drop the confirmed account and put `pending` back,
    /// so the same confirmation link can be opened again.
    ///
    /// # Errors
    /// [`StoreError::UnknownRegistration`] when no account is confirmed under
    /// the username; nothing is changed in that case.
    async fn demote(&self, pending: PendingAccount) -> Result<(), StoreError>;

    /// Backend liveness check used by `/health`.
    ///
    /// # Errors
    /// Returns the backend error when the store is unreachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Session data returned for a valid token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub username: String,
    pub email: String,
    pub expires_at: i64,
}

/// Freshly bound session; the raw token only lives here and in the cookie.
#[derive(Debug)]
pub struct SessionHandle {
    token: SecretString,
    pub record: SessionRecord,
}

impl SessionHandle {
    #[must_use]
    pub fn new(token: SecretString, record: SessionRecord) -> Self {
        Self { token, record }
    }

    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create and durably save a session for the account.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the session could not be saved.
    async fn bind(&self, username: &str, email: &str) -> Result<SessionHandle, SessionError>;

    /// Resolve a raw token into its session, ignoring expired ones.
    ///
    /// # Errors
    /// Returns [`SessionError`] on backend failures.
    async fn lookup(&self, token: &str) -> Result<Option<SessionRecord>, SessionError>;

    /// Remove a session, returning the record that was destroyed.
    ///
    /// # Errors
    /// Returns [`SessionError`] on backend failures.
    async fn destroy(&self, token: &str) -> Result<Option<SessionRecord>, SessionError>;
}

/// 32 random bytes, URL-safe base64 without padding.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Digest stored in place of raw registration keys and session tokens.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
