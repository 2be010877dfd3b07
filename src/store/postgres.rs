//! PostgreSQL-backed stores.
//!
//! Every write that touches a username takes a transaction-scoped advisory
//! lock on it first, so `create` and `promote` for the same username are
//! serialized while different usernames proceed in parallel.

use super::{
    generate_token, hash_token, now_unix, AccountRecord, AccountStore, PendingAccount,
    SessionError, SessionHandle, SessionRecord, SessionStore, StoreError,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{info_span, Instrument, Span};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const LOCK_USERNAME: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Apply `sql/schema.sql`; every statement is idempotent.
///
/// # Errors
/// Returns an error naming the statement that failed.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
    }
    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

async fn lock_username(tx: &mut Transaction<'_, Postgres>, username: &str) -> Result<()> {
    sqlx::query(LOCK_USERNAME)
        .bind(username)
        .execute(&mut **tx)
        .instrument(db_span("SELECT", LOCK_USERNAME))
        .await
        .context("failed to lock username")?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create(&self, pending: PendingAccount) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin create transaction")?;
        lock_username(&mut tx, &pending.username).await?;

        // Expired pending rows do not reserve the username.
        let query = "DELETE FROM pending_accounts WHERE username = $1 AND expires_at <= $2";
        sqlx::query(query)
            .bind(&pending.username)
            .bind(now_unix())
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to clear expired pending account")?;

        let query = r"
            SELECT EXISTS(SELECT 1 FROM accounts WHERE username = $1)
                OR EXISTS(SELECT 1 FROM pending_accounts WHERE username = $1) AS taken
        ";
        let taken: bool = sqlx::query(query)
            .bind(&pending.username)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check username")?
            .get("taken");
        if taken {
            let _ = tx.rollback().await;
            return Err(StoreError::Duplicate);
        }

        let query = r"
            INSERT INTO pending_accounts
                (username, email, credential_hash, registration_key_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let inserted = sqlx::query(query)
            .bind(&pending.username)
            .bind(&pending.email)
            .bind(&pending.credential_hash)
            .bind(&pending.registration_key_hash)
            .bind(pending.created_at)
            .bind(pending.expires_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await;
        if let Err(err) = inserted {
            let _ = tx.rollback().await;
            if is_unique_violation(&err) {
                return Err(StoreError::Duplicate);
            }
            return Err(anyhow::Error::from(err)
                .context("failed to insert pending account")
                .into());
        }

        tx.commit().await.context("commit create transaction")?;
        Ok(())
    }

    async fn promote(
        &self,
        username: &str,
        registration_key: &str,
    ) -> Result<AccountRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin promote transaction")?;
        lock_username(&mut tx, username).await?;

        let query = r"
            SELECT email, credential_hash, registration_key_hash, expires_at
            FROM pending_accounts
            WHERE username = $1
        ";
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup pending account")?;

        let now = now_unix();
        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Err(StoreError::UnknownRegistration);
        };
        let expires_at: i64 = row.get("expires_at");
        if expires_at <= now {
            let _ = tx.rollback().await;
            return Err(StoreError::UnknownRegistration);
        }
        let stored_hash: Vec<u8> = row.get("registration_key_hash");
        if stored_hash != hash_token(registration_key) {
            let _ = tx.rollback().await;
            return Err(StoreError::InvalidKey);
        }

        let account = AccountRecord {
            username: username.to_string(),
            email: row.get("email"),
            credential_hash: row.get("credential_hash"),
            confirmed_at: now,
        };

        let query = "DELETE FROM pending_accounts WHERE username = $1";
        sqlx::query(query)
            .bind(username)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete pending account")?;

        let query = r"
            INSERT INTO accounts (username, email, credential_hash, confirmed_at)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.credential_hash)
            .bind(account.confirmed_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert account")?;

        tx.commit().await.context("commit promote transaction")?;
        Ok(account)
    }

    async fn demote(&self, pending: PendingAccount) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin demote transaction")?;
        lock_username(&mut tx, &pending.username).await?;

        let query = "DELETE FROM accounts WHERE username = $1";
        let deleted = sqlx::query(query)
            .bind(&pending.username)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete account")?;
        if deleted.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Err(StoreError::UnknownRegistration);
        }

        let query = r"
            INSERT INTO pending_accounts
                (username, email, credential_hash, registration_key_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(&pending.username)
            .bind(&pending.email)
            .bind(&pending.credential_hash)
            .bind(&pending.registration_key_hash)
            .bind(pending.created_at)
            .bind(pending.expires_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to restore pending account")?;

        tx.commit().await.context("commit demote transaction")?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
    ttl: Duration,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn bind(&self, username: &str, email: &str) -> Result<SessionHandle, SessionError> {
        let token = generate_token()?;
        let now = now_unix();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let record = SessionRecord {
            username: username.to_string(),
            email: email.to_string(),
            expires_at: now.saturating_add(ttl),
        };

        let query = r"
            INSERT INTO sessions (token_hash, username, email, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(hash_token(&token))
            .bind(&record.username)
            .bind(&record.email)
            .bind(now)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert session")?;

        Ok(SessionHandle::new(SecretString::from(token), record))
    }

    async fn lookup(&self, token: &str) -> Result<Option<SessionRecord>, SessionError> {
        let query = r"
            SELECT username, email, expires_at
            FROM sessions
            WHERE token_hash = $1 AND expires_at > $2
        ";
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .bind(now_unix())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup session")?;

        Ok(row.map(|row| SessionRecord {
            username: row.get("username"),
            email: row.get("email"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn destroy(&self, token: &str) -> Result<Option<SessionRecord>, SessionError> {
        let query = r"
            DELETE FROM sessions
            WHERE token_hash = $1
            RETURNING username, email, expires_at
        ";
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete session")?;

        Ok(row.map(|row| SessionRecord {
            username: row.get("username"),
            email: row.get("email"),
            expires_at: row.get("expires_at"),
        }))
    }
}
