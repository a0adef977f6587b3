//! Durable, tamper-evident storage of login sessions.
//!
//! Every mutation is a single-row atomic statement; `revoke_if_active` is a
//! conditional update so that concurrent rotations racing on one session can
//! be serialized without an in-process lock.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::models::session::Session;
use crate::types::{SessionId, UserId};
use crate::utils::vault::TokenVault;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found")]
    NotFound,
    #[error("stored upstream token could not be decrypted")]
    DecryptionFailed,
    #[error("stored upstream token digest does not match")]
    HashMismatch,
    #[error("session storage failed")]
    Storage(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Storage(other.into()),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Hashes and seals `raw_token`, then writes a fresh row in a single
    /// statement. `issued_at = last_activity_at = now`,
    /// `expires_at = now + max_age`.
    async fn create(
        &self,
        user_id: &UserId,
        raw_token: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<SessionId, StoreError>;

    async fn find(&self, id: SessionId) -> Result<Session, StoreError>;

    /// Records a successful use. Idempotent; safe to call redundantly.
    async fn touch(&self, id: SessionId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Flips `revoked` only if it is currently false and reports whether
    /// THIS call performed the flip. Concurrent rotations race on this
    /// update and exactly one of them observes `true`.
    async fn revoke_if_active(&self, id: SessionId) -> Result<bool, StoreError>;

    /// Revokes every non-revoked session belonging to `user_id`; returns the
    /// number of rows flipped.
    async fn revoke_all_for_user(&self, user_id: &UserId) -> Result<u64, StoreError>;

    async fn list_active_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Opens the sealed upstream token and checks it against the stored
    /// digest. Either failure kind signals corruption or tampering and the
    /// caller must revoke the session.
    fn decrypt_and_verify(&self, session: &Session) -> Result<String, StoreError>;
}

fn decrypt_and_verify_with(vault: &TokenVault, session: &Session) -> Result<String, StoreError> {
    let raw = vault
        .open(&session.token_enc)
        .map_err(|_| StoreError::DecryptionFailed)?;
    let digest = vault.digest(&raw);
    let matches: bool = digest
        .as_bytes()
        .ct_eq(session.token_hash.as_bytes())
        .into();
    if !matches {
        return Err(StoreError::HashMismatch);
    }
    Ok(raw)
}

pub struct PgSessionStore {
    pool: PgPool,
    vault: TokenVault,
}

impl PgSessionStore {
    pub fn new(pool: PgPool, vault: TokenVault) -> Self {
        Self { pool, vault }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        user_id: &UserId,
        raw_token: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<SessionId, StoreError> {
        let id = SessionId::new();
        let token_hash = self.vault.digest(raw_token);
        let token_enc = self.vault.seal(raw_token).map_err(StoreError::Storage)?;

        sqlx::query(
            "INSERT INTO sessions \
             (id, user_id, token_hash, token_enc, issued_at, last_activity_at, expires_at, revoked) \
             VALUES ($1, $2, $3, $4, $5, $5, $6, FALSE)",
        )
        .bind(id)
        .bind(user_id.clone())
        .bind(&token_hash)
        .bind(&token_enc)
        .bind(now)
        .bind(now + max_age)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find(&self, id: SessionId) -> Result<Session, StoreError> {
        sqlx::query_as::<_, Session>(
            "SELECT id, user_id, token_hash, token_enc, issued_at, last_activity_at, expires_at, revoked \
             FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn touch(&self, id: SessionId, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET last_activity_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_if_active(&self, id: SessionId) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE sessions SET revoked = TRUE WHERE id = $1 AND revoked = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id.clone())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(
            "SELECT id, user_id, token_hash, token_enc, issued_at, last_activity_at, expires_at, revoked \
             FROM sessions \
             WHERE user_id = $1 AND revoked = FALSE AND expires_at > $2 \
             ORDER BY last_activity_at DESC, issued_at DESC",
        )
        .bind(user_id.clone())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    fn decrypt_and_verify(&self, session: &Session) -> Result<String, StoreError> {
        decrypt_and_verify_with(&self.vault, session)
    }
}

/// In-process store for local development and deterministic tests.
///
/// The mutex makes `revoke_if_active` an atomic compare-and-set, matching
/// the single-row conditional update of the Postgres store.
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
    vault: TokenVault,
}

impl MemorySessionStore {
    pub fn new(vault: TokenVault) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            vault,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().expect("session store lock")
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        user_id: &UserId,
        raw_token: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<SessionId, StoreError> {
        let id = SessionId::new();
        let session = Session {
            id,
            user_id: user_id.clone(),
            token_hash: self.vault.digest(raw_token),
            token_enc: self.vault.seal(raw_token).map_err(StoreError::Storage)?,
            issued_at: now,
            last_activity_at: now,
            expires_at: now + max_age,
            revoked: false,
        };
        self.lock().insert(id, session);
        Ok(id)
    }

    async fn find(&self, id: SessionId) -> Result<Session, StoreError> {
        self.lock().get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn touch(&self, id: SessionId, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(session) = self.lock().get_mut(&id) {
            session.last_activity_at = now;
        }
        Ok(())
    }

    async fn revoke_if_active(&self, id: SessionId) -> Result<bool, StoreError> {
        let mut sessions = self.lock();
        match sessions.get_mut(&id) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let mut sessions = self.lock();
        let mut flipped = 0;
        for session in sessions.values_mut() {
            if &session.user_id == user_id && !session.revoked {
                session.revoked = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn list_active_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = self.lock();
        let mut active: Vec<Session> = sessions
            .values()
            .filter(|s| &s.user_id == user_id && !s.revoked && s.expires_at > now)
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then(b.issued_at.cmp(&a.issued_at))
        });
        Ok(active)
    }

    fn decrypt_and_verify(&self, session: &Session) -> Result<String, StoreError> {
        decrypt_and_verify_with(&self.vault, session)
    }
}
