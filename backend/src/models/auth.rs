//! Request and response payloads for the authentication surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::UserId;

#[derive(Debug, Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 12, message = "must be at least 12 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 120))]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    /// Revoke every session for the user, not just the presented one.
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct SessionProbeResponse {
    pub active: bool,
}

/// Public view of a session row; secret columns never leave the server.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub issued_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub current: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_request_rejects_bad_email_and_short_password() {
        let request = SignUpRequest {
            email: "not-an-email".into(),
            password: "short".into(),
            full_name: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));
        assert!(errors.field_errors().contains_key("password"));
    }

    #[test]
    fn sign_in_request_accepts_well_formed_credentials() {
        let request = SignInRequest {
            email: "clinician@example.com".into(),
            password: "a-long-password".into(),
        };
        assert!(request.validate().is_ok());
    }
}
