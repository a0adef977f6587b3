use std::sync::Arc;

use crate::config::Config;
use crate::services::identity::IdentityProvider;
use crate::services::session::SessionLifecycleManager;

/// Shared application state handed to the router.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionLifecycleManager>,
    pub provider: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(
        config: Config,
        sessions: Arc<SessionLifecycleManager>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            sessions,
            provider,
        }
    }
}
