use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medscribe_backend::{
    config::Config,
    db::connection::create_pool,
    repositories::session_store::{PgSessionStore, SessionStore},
    routes,
    services::identity::{HttpIdentityProvider, IdentityProvider},
    services::session::SessionLifecycleManager,
    state::AppState,
    utils::{
        clock::SystemClock,
        vault::{DerivedKeyring, TokenVault},
        wrapper::WrapperCodec,
    },
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medscribe_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        database_url = %config.database_url,
        session_secret = %mask_secret(&config.session_secret),
        session_max_age_days = config.session_max_age_days,
        session_inactivity_days = config.session_inactivity_days,
        identity_base_url = %config.identity_base_url,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Wire the session subsystem
    let vault = TokenVault::new(Box::new(DerivedKeyring::new(
        &config.session_secret,
        &config.token_seal_key_id,
    )));
    let store: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool, vault));
    let provider: Arc<dyn IdentityProvider> = Arc::new(HttpIdentityProvider::new(
        &config.identity_base_url,
        config.identity_timeout(),
    )?);
    let sessions = Arc::new(SessionLifecycleManager::new(
        WrapperCodec::new(&config.session_secret),
        store,
        provider.clone(),
        Arc::new(SystemClock),
        config.session_policy(),
    ));

    let state = AppState::new(config, sessions, provider);

    // Compose app with shared layers (CORS/Trace)
    let app = routes::app(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                    .allow_headers(Any)
                    .max_age(std::time::Duration::from_secs(24 * 60 * 60)),
            ),
    );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
