//! Durable session records.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, FromRow)]
/// Database representation of a login session.
///
/// The raw upstream refresh token never appears here: `token_hash` is its
/// one-way digest and `token_enc` its sealed envelope, the only recoverable
/// form.
pub struct Session {
    /// Opaque session identifier (the wrapper's `tid`).
    pub id: SessionId,
    /// Owning user, as known by the identity provider.
    pub user_id: UserId,
    /// Hex SHA-256 digest of the raw upstream refresh token.
    pub token_hash: String,
    /// Sealed envelope holding the upstream refresh token.
    pub token_enc: String,
    /// Creation timestamp.
    pub issued_at: DateTime<Utc>,
    /// Timestamp of the last successful use (sliding inactivity window).
    pub last_activity_at: DateTime<Utc>,
    /// Fixed absolute expiry; never extended after creation.
    pub expires_at: DateTime<Utc>,
    /// Monotonic revocation flag; never flips back to false.
    pub revoked: bool,
}

impl Session {
    /// Whether the session is usable at `now` under the given inactivity
    /// window. Any single violation makes it permanently unusable.
    pub fn is_active(&self, now: DateTime<Utc>, inactivity_limit: Duration) -> bool {
        !self.revoked
            && now < self.expires_at
            && now - self.last_activity_at <= inactivity_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: DateTime<Utc>) -> Session {
        Session {
            id: SessionId::new(),
            user_id: UserId::new("user-1"),
            token_hash: "hash".into(),
            token_enc: "sealed:v1:local:AAAA:AAAA".into(),
            issued_at: now,
            last_activity_at: now,
            expires_at: now + Duration::days(30),
            revoked: false,
        }
    }

    #[test]
    fn fresh_session_is_active() {
        let now = Utc::now();
        assert!(session(now).is_active(now + Duration::hours(1), Duration::days(7)));
    }

    #[test]
    fn any_single_violation_deactivates() {
        let now = Utc::now();
        let limit = Duration::days(7);

        let mut revoked = session(now);
        revoked.revoked = true;
        assert!(!revoked.is_active(now, limit));

        let expired = session(now);
        assert!(!expired.is_active(now + Duration::days(30), limit));

        let idle = session(now);
        assert!(!idle.is_active(now + Duration::days(8), limit));
    }
}
