use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration as StdDuration;

use crate::services::session::SessionPolicy;
use crate::utils::cookies::{CookieOptions, SameSite};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub session_secret: String,
    pub session_max_age_days: u64,
    pub session_inactivity_days: u64,
    pub token_seal_key_id: String,
    pub identity_base_url: String,
    pub identity_timeout_seconds: u64,
    pub cookie_secure: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/medscribe".to_string());

        let session_secret = env::var("SESSION_SECRET")
            .unwrap_or_else(|_| "your-secret-key-change-this-in-production".to_string());

        let session_max_age_days = env::var("SESSION_MAX_AGE_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let session_inactivity_days = env::var("SESSION_INACTIVITY_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);

        let token_seal_key_id =
            env::var("TOKEN_SEAL_KEY_ID").unwrap_or_else(|_| "local".to_string());

        let identity_base_url = env::var("IDENTITY_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:9000".to_string());

        let identity_timeout_seconds = env::var("IDENTITY_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let cookie_secure = env::var("COOKIE_SECURE")
            .map(|v| v != "false")
            .unwrap_or(true);

        Ok(Config {
            database_url,
            session_secret,
            session_max_age_days,
            session_inactivity_days,
            token_seal_key_id,
            identity_base_url,
            identity_timeout_seconds,
            cookie_secure,
        })
    }

    /// Expiry policy handed to the lifecycle manager at construction, so
    /// business logic never reads the environment itself.
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            max_age: Duration::days(self.session_max_age_days as i64),
            inactivity_limit: Duration::days(self.session_inactivity_days as i64),
        }
    }

    pub fn session_cookie_max_age(&self) -> StdDuration {
        StdDuration::from_secs(self.session_max_age_days * 24 * 60 * 60)
    }

    pub fn identity_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.identity_timeout_seconds)
    }

    pub fn cookie_options(&self) -> CookieOptions {
        CookieOptions {
            secure: self.cookie_secure,
            same_site: SameSite::Strict,
        }
    }
}
