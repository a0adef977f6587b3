//! Signed wrapper tokens handed to clients in place of upstream credentials.
//!
//! The wrapper is a compact three-segment HMAC-SHA256 token whose payload
//! carries only a user id (`sub`) and a session id (`tid`). It contains no
//! upstream secret, so a leaked wrapper is inert without access to the
//! server-side session row it references.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{SessionId, UserId};

const WRAPPER_TYP: &str = "session-wrapper";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WrapperError {
    #[error("wrapper token is malformed")]
    MalformedToken,
    #[error("wrapper token signature is invalid")]
    InvalidSignature,
    #[error("wrapper token payload is malformed")]
    MalformedPayload,
    #[error("wrapper token has expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct WrapperClaims {
    sub: String,
    tid: String,
    iat: i64,
    exp: i64,
}

/// Contents of a wrapper whose signature has been accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedWrapper {
    pub user_id: UserId,
    pub session_id: SessionId,
    /// Unix timestamp after which the wrapper itself is unusable.
    pub expires_at: i64,
}

pub struct WrapperCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl WrapperCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Builds a signed wrapper for `session_id`. Deterministic for identical
    /// inputs and clock value.
    pub fn create(
        &self,
        user_id: &UserId,
        session_id: SessionId,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> anyhow::Result<String> {
        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some(WRAPPER_TYP.to_string());

        let claims = WrapperClaims {
            sub: user_id.to_string(),
            tid: session_id.to_string(),
            iat: now.timestamp(),
            exp: (now + max_age).timestamp(),
        };

        Ok(encode(&header, &claims, &self.encoding)?)
    }

    /// Checks the signature and payload shape without evaluating expiry.
    ///
    /// The signature is compared constant-time and accepted before any
    /// payload field is parsed, so forged tokens are rejected identically
    /// whether their claimed expiry is stale or fresh.
    pub fn decode(&self, token: &str) -> Result<VerifiedWrapper, WrapperError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is evaluated by `verify` against the injected clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data =
            decode::<WrapperClaims>(token, &self.decoding, &validation).map_err(|err| {
                match err.kind() {
                    ErrorKind::InvalidSignature => WrapperError::InvalidSignature,
                    // Payload errors only surface once the signature passed.
                    ErrorKind::Json(_) => WrapperError::MalformedPayload,
                    _ => WrapperError::MalformedToken,
                }
            })?;

        if data.header.typ.as_deref() != Some(WRAPPER_TYP) {
            return Err(WrapperError::MalformedToken);
        }
        if data.claims.sub.is_empty() {
            return Err(WrapperError::MalformedPayload);
        }
        let session_id = data
            .claims
            .tid
            .parse::<SessionId>()
            .map_err(|_| WrapperError::MalformedPayload)?;

        Ok(VerifiedWrapper {
            user_id: UserId::new(data.claims.sub),
            session_id,
            expires_at: data.claims.exp,
        })
    }

    /// Full verification: signature, payload shape, then expiry, in that
    /// order.
    pub fn verify(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedWrapper, WrapperError> {
        let verified = self.decode(token)?;
        if now.timestamp() > verified.expires_at {
            return Err(WrapperError::Expired);
        }
        Ok(verified)
    }
}
