//! Session lifecycle orchestration: creation, rotation, revocation, probes.
//!
//! The upstream refresh token is single-use, so every successful refresh
//! replaces the whole session (new row, new wrapper) and retires the old
//! one. Failure handling is split between fail-secure branches, which
//! revoke the session because its stored token can no longer be trusted,
//! and fail-safe branches, which leave it untouched because the upstream
//! state is unknown and a revoke could strand a legitimate user.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::models::session::Session;
use crate::repositories::session_store::{SessionStore, StoreError};
use crate::services::identity::{Credentials, IdentityProvider, ProviderError, ProviderSession};
use crate::types::{SessionId, UserId};
use crate::utils::clock::Clock;
use crate::utils::wrapper::{WrapperCodec, WrapperError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token is malformed")]
    MalformedToken,
    #[error("session token signature is invalid")]
    InvalidSignature,
    #[error("session token has expired")]
    WrapperExpired,
    #[error("session was revoked or does not exist")]
    TokenRevokedOrNotFound,
    #[error("session was revoked")]
    TokenRevoked,
    #[error("session reached its absolute expiry")]
    AbsoluteExpiry,
    #[error("session exceeded the inactivity window")]
    SessionInactive,
    #[error("stored upstream token could not be decrypted")]
    DecryptionFailed,
    #[error("stored upstream token failed its integrity check")]
    HashMismatch,
    #[error("the identity provider rejected the token exchange")]
    ExchangeRejected,
    #[error("the identity provider could not be reached")]
    ExchangeUnavailable,
    #[error("storing the replacement session failed")]
    RotationStorageFailed,
    #[error("a concurrent rotation already replaced this session")]
    RotationConflict,
    #[error("session storage failed")]
    Storage(#[source] anyhow::Error),
}

impl SessionError {
    /// Fail-safe errors: the session (if any) was left untouched and the
    /// caller may retry with the same wrapper. Everything else means the
    /// client-side wrapper should be cleared.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::ExchangeUnavailable
                | SessionError::RotationStorageFailed
                | SessionError::RotationConflict
                | SessionError::Storage(_)
        )
    }
}

impl From<WrapperError> for SessionError {
    fn from(err: WrapperError) -> Self {
        match err {
            WrapperError::MalformedToken | WrapperError::MalformedPayload => {
                SessionError::MalformedToken
            }
            WrapperError::InvalidSignature => SessionError::InvalidSignature,
            WrapperError::Expired => SessionError::WrapperExpired,
        }
    }
}

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("invalid credentials")]
    Credentials,
    #[error("the identity provider could not be reached")]
    ProviderUnavailable,
    #[error("session storage failed")]
    Storage(#[source] anyhow::Error),
}

/// Session material issued to a client after sign-in or sign-up.
#[derive(Debug)]
pub struct IssuedSession {
    pub user_id: UserId,
    pub access_token: String,
    /// Present when the provider returned an upstream refresh token and a
    /// durable session was created for it.
    pub session: Option<(SessionId, String)>,
}

/// Result of a successful rotation.
#[derive(Debug)]
pub struct RotatedSession {
    pub user_id: UserId,
    pub access_token: String,
    pub session_id: SessionId,
    pub wrapper: String,
}

/// Expiry policy applied to every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    /// Fixed absolute lifetime; `expires_at` is never extended.
    pub max_age: Duration,
    /// Sliding window measured from the last successful use.
    pub inactivity_limit: Duration,
}

pub struct SessionLifecycleManager {
    codec: WrapperCodec,
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
}

impl SessionLifecycleManager {
    pub fn new(
        codec: WrapperCodec,
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            codec,
            store,
            provider,
            clock,
            policy,
        }
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<IssuedSession, SignInError> {
        let provided = self
            .provider
            .sign_in(credentials)
            .await
            .map_err(sign_in_error)?;
        self.issue(provided).await
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> Result<IssuedSession, SignInError> {
        let provided = self
            .provider
            .sign_up(credentials)
            .await
            .map_err(sign_in_error)?;
        self.issue(provided).await
    }

    async fn issue(&self, provided: ProviderSession) -> Result<IssuedSession, SignInError> {
        let session = match provided.refresh_token.as_deref() {
            Some(raw_token) => {
                let issued = self
                    .create_session(&provided.user_id, raw_token)
                    .await
                    .map_err(|err| SignInError::Storage(anyhow::Error::new(err)))?;
                Some(issued)
            }
            None => None,
        };
        Ok(IssuedSession {
            user_id: provided.user_id,
            access_token: provided.access_token,
            session,
        })
    }

    /// Creates a durable session for a raw upstream token and signs its
    /// wrapper.
    pub async fn create_session(
        &self,
        user_id: &UserId,
        raw_token: &str,
    ) -> Result<(SessionId, String), SessionError> {
        let now = self.clock.now();
        let id = self
            .store
            .create(user_id, raw_token, now, self.policy.max_age)
            .await
            .map_err(storage)?;
        let wrapper = self
            .codec
            .create(user_id, id, now, self.policy.max_age)
            .map_err(SessionError::Storage)?;
        tracing::debug!(session_id = %id, user_id = %user_id, "session created");
        Ok((id, wrapper))
    }

    /// Rotates an active session: verifies the wrapper, exchanges the stored
    /// upstream token, writes the replacement, and retires the old row. The
    /// conditional revoke on the old row is what serializes duplicate
    /// rotation attempts racing on the same wrapper.
    pub async fn rotate(&self, wrapper: &str) -> Result<RotatedSession, SessionError> {
        let now = self.clock.now();
        // Garbage and forged input is rejected before any store access.
        let verified = self.codec.verify(wrapper, now)?;
        let old_id = verified.session_id;

        let session = self.load_usable(old_id, now).await?;
        let raw_token = self.open_stored_token(&session).await?;

        // Keeps the sliding window honest if a fail-safe branch below makes
        // the client retry this same wrapper later.
        if let Err(err) = self.store.touch(old_id, now).await {
            tracing::warn!(session_id = %old_id, error = %err, "failed to record session activity");
        }

        let exchanged = match self.provider.exchange_refresh_token(&raw_token).await {
            Ok(tokens) => tokens,
            Err(ProviderError::Unavailable(err)) => {
                // Consumption state upstream is unknown; the session must
                // survive so the client can retry with the same wrapper.
                tracing::warn!(session_id = %old_id, error = %err, "token exchange unavailable");
                return Err(SessionError::ExchangeUnavailable);
            }
            Err(_) => {
                // The upstream token is burned regardless of provider
                // semantics.
                self.best_effort_revoke(old_id).await;
                return Err(SessionError::ExchangeRejected);
            }
        };

        let new_id = match self
            .store
            .create(&session.user_id, &exchanged.refresh_token, now, self.policy.max_age)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                // The old session stays active: never destroy the only valid
                // session before a replacement durably exists.
                tracing::error!(session_id = %old_id, error = %err, "failed to store replacement session");
                return Err(SessionError::RotationStorageFailed);
            }
        };

        let revoked_by_this_call = match self.store.revoke_if_active(old_id).await {
            Ok(flag) => flag,
            Err(err) => {
                self.best_effort_revoke(new_id).await;
                return Err(storage(err));
            }
        };
        if !revoked_by_this_call {
            // A concurrent rotation won the race on the old session; this
            // call must not hand out a second live session for it.
            self.best_effort_revoke(new_id).await;
            tracing::debug!(session_id = %old_id, "lost rotation race");
            return Err(SessionError::RotationConflict);
        }

        let new_wrapper = self
            .codec
            .create(&session.user_id, new_id, now, self.policy.max_age)
            .map_err(SessionError::Storage)?;
        tracing::debug!(
            old_session_id = %old_id,
            new_session_id = %new_id,
            user_id = %session.user_id,
            "session rotated"
        );

        Ok(RotatedSession {
            user_id: session.user_id,
            access_token: exchanged.access_token,
            session_id: new_id,
            wrapper: new_wrapper,
        })
    }

    /// Idempotent revocation; succeeds regardless of the session's prior
    /// state.
    pub async fn revoke(&self, id: SessionId) -> Result<(), SessionError> {
        self.store
            .revoke_if_active(id)
            .await
            .map(|_| ())
            .map_err(storage)
    }

    /// Revokes the session a wrapper points at. Tolerates an expired
    /// wrapper, since sign-out must still retire the server-side row, but
    /// never trusts an unsigned `tid`.
    pub async fn sign_out(&self, wrapper: &str) -> Result<(), SessionError> {
        let verified = self.codec.decode(wrapper)?;
        self.revoke(verified.session_id).await
    }

    /// Revokes every session of the user named by a (signed) wrapper.
    pub async fn sign_out_all(&self, wrapper: &str) -> Result<u64, SessionError> {
        let verified = self.codec.decode(wrapper)?;
        self.store
            .revoke_all_for_user(&verified.user_id)
            .await
            .map_err(storage)
    }

    pub async fn revoke_all(&self, user_id: &UserId) -> Result<u64, SessionError> {
        self.store.revoke_all_for_user(user_id).await.map_err(storage)
    }

    /// Read-only usability probe: the same validation chain as rotation up
    /// to the stored-token check, without the exchange. Apart from the
    /// inactivity cleanup it performs no writes.
    pub async fn check_active(&self, wrapper: &str) -> bool {
        let now = self.clock.now();
        let Ok(verified) = self.codec.verify(wrapper, now) else {
            return false;
        };
        let Ok(session) = self.load_usable(verified.session_id, now).await else {
            return false;
        };
        self.store.decrypt_and_verify(&session).is_ok()
    }

    /// Session id referenced by a wrapper, if its signature holds.
    pub fn wrapper_session_id(&self, wrapper: &str) -> Option<SessionId> {
        self.codec.decode(wrapper).ok().map(|v| v.session_id)
    }

    /// Active sessions for `user_id` under the current policy.
    pub async fn list_active(&self, user_id: &UserId) -> Result<Vec<Session>, SessionError> {
        let now = self.clock.now();
        let sessions = self
            .store
            .list_active_for_user(user_id, now)
            .await
            .map_err(storage)?;
        Ok(sessions
            .into_iter()
            .filter(|session| session.is_active(now, self.policy.inactivity_limit))
            .collect())
    }

    /// Revokes one of the caller's own sessions. Sessions of other users are
    /// reported as missing rather than forbidden, so the endpoint is not an
    /// oracle for foreign session ids.
    pub async fn revoke_owned(
        &self,
        user_id: &UserId,
        id: SessionId,
    ) -> Result<(), SessionError> {
        let session = match self.store.find(id).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => return Err(SessionError::TokenRevokedOrNotFound),
            Err(err) => return Err(storage(err)),
        };
        if &session.user_id != user_id {
            return Err(SessionError::TokenRevokedOrNotFound);
        }
        self.revoke(id).await
    }

    async fn load_usable(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let session = match self.store.find(id).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => return Err(SessionError::TokenRevokedOrNotFound),
            Err(err) => return Err(storage(err)),
        };
        if session.revoked {
            return Err(SessionError::TokenRevoked);
        }
        if now >= session.expires_at {
            // Already inert by clock alone; no write needed.
            return Err(SessionError::AbsoluteExpiry);
        }
        if now - session.last_activity_at > self.policy.inactivity_limit {
            self.best_effort_revoke(id).await;
            return Err(SessionError::SessionInactive);
        }
        Ok(session)
    }

    async fn open_stored_token(&self, session: &Session) -> Result<String, SessionError> {
        match self.store.decrypt_and_verify(session) {
            Ok(raw) => Ok(raw),
            Err(StoreError::DecryptionFailed) => {
                self.best_effort_revoke(session.id).await;
                Err(SessionError::DecryptionFailed)
            }
            Err(StoreError::HashMismatch) => {
                self.best_effort_revoke(session.id).await;
                Err(SessionError::HashMismatch)
            }
            Err(err) => Err(storage(err)),
        }
    }

    async fn best_effort_revoke(&self, id: SessionId) {
        if let Err(err) = self.store.revoke_if_active(id).await {
            tracing::warn!(session_id = %id, error = %err, "best-effort session revocation failed");
        }
    }
}

fn storage(err: StoreError) -> SessionError {
    SessionError::Storage(anyhow::Error::new(err))
}

fn sign_in_error(err: ProviderError) -> SignInError {
    match err {
        ProviderError::InvalidCredentials | ProviderError::Rejected => SignInError::Credentials,
        ProviderError::Unavailable(_) => SignInError::ProviderUnavailable,
    }
}
