//! Client for the external identity provider.
//!
//! The provider owns user records and credential verification; this backend
//! only ever sees short-lived access tokens and single-use upstream refresh
//! tokens. `Unavailable` is kept distinct from `Rejected` because the two
//! demand opposite handling during rotation: a rejection proves the upstream
//! token is burned, while an unreachable provider leaves its consumption
//! state unknown.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::UserId;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("credentials were rejected")]
    InvalidCredentials,
    #[error("the provider rejected the request")]
    Rejected,
    #[error("the provider could not be reached")]
    Unavailable(#[source] anyhow::Error),
}

/// Tokens returned from a successful sign-in or sign-up.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub user_id: UserId,
    pub access_token: String,
    /// Absent when the provider withholds long-lived credentials, e.g. for
    /// an account pending confirmation.
    pub refresh_token: Option<String>,
}

/// Result of exchanging a single-use upstream refresh token.
#[derive(Debug, Clone)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, credentials: &Credentials) -> Result<ProviderSession, ProviderError>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<ProviderSession, ProviderError>;

    /// Exchanges a single-use upstream refresh token for fresh tokens.
    /// On timeout the provider may or may not have consumed the presented
    /// token; callers must not assume either way.
    async fn exchange_refresh_token(
        &self,
        raw_token: &str,
    ) -> Result<ExchangedTokens, ProviderError>;

    async fn verify_access_token(&self, access_token: &str) -> Result<UserId, ProviderError>;
}

#[derive(Debug, Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    user_id: String,
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExchangeBody<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponseBody {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoBody {
    user_id: String,
}

/// JSON/HTTPS implementation of the provider contract.
pub struct HttpIdentityProvider {
    client: Client,
    base_url: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("medscribe-backend/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_credentials(
        &self,
        path: &str,
        credentials: &Credentials,
    ) -> Result<ProviderSession, ProviderError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(&CredentialsBody {
                email: &credentials.email,
                password: &credentials.password,
                full_name: credentials.full_name.as_deref(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let body: SessionBody = read_json(response, ProviderError::InvalidCredentials).await?;
        Ok(ProviderSession {
            user_id: UserId::new(body.user_id),
            access_token: body.access_token,
            refresh_token: body.refresh_token,
        })
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Unavailable(err.into())
}

/// Maps a provider response: 2xx parses the body, 4xx is the definitive
/// rejection supplied by the caller, everything else is `Unavailable`.
async fn read_json<T: serde::de::DeserializeOwned>(
    response: Response,
    client_error: ProviderError,
) -> Result<T, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(transport_error);
    }
    if status.is_client_error() {
        return Err(client_error);
    }
    Err(ProviderError::Unavailable(anyhow!(
        "provider returned {status}"
    )))
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_up(&self, credentials: &Credentials) -> Result<ProviderSession, ProviderError> {
        self.post_credentials("/v1/auth/signup", credentials).await
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<ProviderSession, ProviderError> {
        self.post_credentials("/v1/auth/signin", credentials).await
    }

    async fn exchange_refresh_token(
        &self,
        raw_token: &str,
    ) -> Result<ExchangedTokens, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("/v1/oauth/token"))
            .json(&ExchangeBody {
                grant_type: "refresh_token",
                refresh_token: raw_token,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let body: ExchangeResponseBody = read_json(response, ProviderError::Rejected).await?;
        Ok(ExchangedTokens {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
        })
    }

    async fn verify_access_token(&self, access_token: &str) -> Result<UserId, ProviderError> {
        let response = self
            .client
            .get(self.endpoint("/v1/oauth/userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;

        let body: UserInfoBody = read_json(response, ProviderError::InvalidCredentials).await?;
        Ok(UserId::new(body.user_id))
    }
}
