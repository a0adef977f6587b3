//! Route table for the authentication surface.

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};

use crate::{handlers, middleware as app_middleware, state::AppState};

pub fn app(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/auth/signup", post(handlers::auth::sign_up))
        .route("/api/auth/signin", post(handlers::auth::sign_in))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/session", get(handlers::auth::session_probe));

    let authenticated = Router::new()
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/auth/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/api/auth/sessions/{id}",
            delete(handlers::sessions::revoke_session),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth::auth,
        ));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .layer(axum_middleware::from_fn(app_middleware::request_id::request_id))
        .with_state(state)
}
