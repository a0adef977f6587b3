use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use serde_json::{json, Value};

use crate::{
    error::AppError,
    handlers::auth::session_cookie,
    middleware::auth::AuthenticatedUser,
    models::auth::SessionResponse,
    services::session::SessionError,
    state::AppState,
    types::SessionId,
};

/// Lists the caller's active sessions, flagging the one referenced by the
/// presented wrapper cookie.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionResponse>>, AppError> {
    let current = session_cookie(&headers)
        .and_then(|wrapper| state.sessions.wrapper_session_id(&wrapper));

    let sessions = state
        .sessions
        .list_active(&user.user_id)
        .await
        .map_err(session_error)?;

    Ok(Json(
        sessions
            .into_iter()
            .map(|session| SessionResponse {
                id: session.id.to_string(),
                issued_at: session.issued_at,
                last_activity_at: session.last_activity_at,
                expires_at: session.expires_at,
                current: Some(session.id) == current,
            })
            .collect(),
    ))
}

/// Revokes one of the caller's sessions, e.g. a lost device.
pub async fn revoke_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id: SessionId = session_id
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid session id".into()))?;

    state
        .sessions
        .revoke_owned(&user.user_id, id)
        .await
        .map_err(session_error)?;

    Ok(Json(json!({
        "message": "Session revoked",
        "session_id": session_id
    })))
}

fn session_error(err: SessionError) -> AppError {
    match err {
        SessionError::TokenRevokedOrNotFound => AppError::NotFound("Session not found".into()),
        SessionError::Storage(err) => AppError::InternalServerError(err),
        other => AppError::InternalServerError(anyhow::anyhow!(other)),
    }
}
