#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Barrier;

use medscribe_backend::repositories::session_store::{MemorySessionStore, SessionStore};
use medscribe_backend::services::identity::{
    Credentials, ExchangedTokens, IdentityProvider, ProviderError, ProviderSession,
};
use medscribe_backend::services::session::{SessionLifecycleManager, SessionPolicy};
use medscribe_backend::types::UserId;
use medscribe_backend::utils::clock::FixedClock;
use medscribe_backend::utils::vault::{DerivedKeyring, TokenVault};
use medscribe_backend::utils::wrapper::WrapperCodec;

pub const SECRET: &str = "integration-test-secret";
pub const USER_ID: &str = "user-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    Succeed,
    Rejected,
    Unavailable,
}

/// Deterministic in-process identity provider. Each successful exchange
/// hands out the next numbered token pair; an optional barrier holds every
/// in-flight exchange until the expected number of callers arrive, which
/// lets tests drive two rotations into the race window deliberately.
pub struct StubProvider {
    counter: AtomicUsize,
    exchange_mode: Mutex<ExchangeMode>,
    exchange_barrier: Option<Arc<Barrier>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            exchange_mode: Mutex::new(ExchangeMode::Succeed),
            exchange_barrier: None,
        }
    }

    pub fn with_exchange_barrier(barrier: Arc<Barrier>) -> Self {
        Self {
            exchange_barrier: Some(barrier),
            ..Self::new()
        }
    }

    pub fn set_exchange_mode(&self, mode: ExchangeMode) {
        *self.exchange_mode.lock().unwrap() = mode;
    }

    pub fn exchanges_performed(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    async fn sign_up(&self, _credentials: &Credentials) -> Result<ProviderSession, ProviderError> {
        Ok(ProviderSession {
            user_id: UserId::new(USER_ID),
            access_token: "access-0".into(),
            refresh_token: Some("upstream-0".into()),
        })
    }

    async fn sign_in(&self, _credentials: &Credentials) -> Result<ProviderSession, ProviderError> {
        Ok(ProviderSession {
            user_id: UserId::new(USER_ID),
            access_token: "access-0".into(),
            refresh_token: Some("upstream-0".into()),
        })
    }

    async fn exchange_refresh_token(
        &self,
        _raw_token: &str,
    ) -> Result<ExchangedTokens, ProviderError> {
        if let Some(barrier) = &self.exchange_barrier {
            barrier.wait().await;
        }
        match *self.exchange_mode.lock().unwrap() {
            ExchangeMode::Succeed => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ExchangedTokens {
                    access_token: format!("access-{n}"),
                    refresh_token: format!("upstream-{n}"),
                })
            }
            ExchangeMode::Rejected => Err(ProviderError::Rejected),
            ExchangeMode::Unavailable => {
                Err(ProviderError::Unavailable(anyhow::anyhow!("stub timeout")))
            }
        }
    }

    async fn verify_access_token(&self, access_token: &str) -> Result<UserId, ProviderError> {
        if access_token.starts_with("access-") {
            Ok(UserId::new(USER_ID))
        } else {
            Err(ProviderError::InvalidCredentials)
        }
    }
}

pub struct Harness {
    pub manager: Arc<SessionLifecycleManager>,
    pub store: Arc<MemorySessionStore>,
    pub provider: Arc<StubProvider>,
    pub clock: Arc<FixedClock>,
}

pub fn policy() -> SessionPolicy {
    SessionPolicy {
        max_age: Duration::days(30),
        inactivity_limit: Duration::days(7),
    }
}

pub fn harness_at(now: DateTime<Utc>, provider: StubProvider) -> Harness {
    let vault = TokenVault::new(Box::new(DerivedKeyring::new(SECRET, "local")));
    let store = Arc::new(MemorySessionStore::new(vault));
    let provider = Arc::new(provider);
    let clock = Arc::new(FixedClock::at(now));

    let dyn_store: Arc<dyn SessionStore> = store.clone();
    let dyn_provider: Arc<dyn IdentityProvider> = provider.clone();
    let dyn_clock: Arc<dyn medscribe_backend::utils::clock::Clock> = clock.clone();

    let manager = Arc::new(SessionLifecycleManager::new(
        WrapperCodec::new(SECRET),
        dyn_store,
        dyn_provider,
        dyn_clock,
        policy(),
    ));

    Harness {
        manager,
        store,
        provider,
        clock,
    }
}

pub fn harness() -> Harness {
    harness_at(Utc::now(), StubProvider::new())
}

pub fn credentials() -> Credentials {
    Credentials {
        email: "clinician@example.com".into(),
        password: "a-long-enough-password".into(),
        full_name: None,
    }
}
