use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::AuthenticatedUser,
    models::auth::{AuthResponse, LogoutRequest, SessionProbeResponse, SignInRequest, SignUpRequest},
    services::identity::Credentials,
    services::session::{IssuedSession, SessionError, SignInError},
    state::AppState,
    utils::cookies::{build_clear_cookie, build_session_cookie, extract_cookie_value, SESSION_COOKIE_NAME},
};

pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;

    let issued = state
        .sessions
        .sign_up(&Credentials {
            email: payload.email,
            password: payload.password,
            full_name: payload.full_name,
        })
        .await
        .map_err(sign_in_error)?;

    Ok(issued_response(&state, issued))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;

    let issued = state
        .sessions
        .sign_in(&Credentials {
            email: payload.email,
            password: payload.password,
            full_name: None,
        })
        .await
        .map_err(sign_in_error)?;

    Ok(issued_response(&state, issued))
}

/// Rotates the session referenced by the wrapper cookie. Success replaces
/// the cookie; fail-secure errors clear it, fail-safe errors leave it so the
/// client can retry with the same wrapper.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(wrapper) = session_cookie(&headers) else {
        return AppError::Unauthorized("No session".into()).into_response();
    };

    match state.sessions.rotate(&wrapper).await {
        Ok(rotated) => {
            let cookie = build_session_cookie(
                &rotated.wrapper,
                state.config.session_cookie_max_age(),
                state.config.cookie_options(),
            );
            let body = Json(AuthResponse {
                access_token: rotated.access_token,
                user_id: rotated.user_id,
            });
            with_set_cookie(body.into_response(), &cookie)
        }
        Err(err) => rotation_error_response(&state, err),
    }
}

/// Lightweight probe for "is there a usable session" without a provider
/// round-trip.
pub async fn session_probe(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<SessionProbeResponse> {
    let active = match session_cookie(&headers) {
        Some(wrapper) => state.sessions.check_active(&wrapper).await,
        None => false,
    };
    Json(SessionProbeResponse { active })
}

/// Revokes the presented session (or, with `all: true`, every session of the
/// wrapper's user) and clears the cookie. Best-effort: the cookie is cleared
/// even when no usable wrapper was presented.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    // An empty or malformed body means a plain single-session logout.
    let all = serde_json::from_str::<LogoutRequest>(&body)
        .unwrap_or_default()
        .all;

    if let Some(wrapper) = session_cookie(&headers) {
        let result = if all {
            state.sessions.sign_out_all(&wrapper).await.map(|_| ())
        } else {
            state.sessions.sign_out(&wrapper).await
        };
        if let Err(err) = result {
            tracing::debug!(error = %err, "logout presented an unusable wrapper");
        }
    }

    let response = Json(json!({ "message": "Logged out" })).into_response();
    with_set_cookie(response, &build_clear_cookie(state.config.cookie_options()))
}

pub async fn me(Extension(user): Extension<AuthenticatedUser>) -> Json<Value> {
    Json(json!({ "user_id": user.user_id }))
}

pub(crate) fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| extract_cookie_value(raw, SESSION_COOKIE_NAME))
}

fn sign_in_error(err: SignInError) -> AppError {
    match err {
        SignInError::Credentials => AppError::Unauthorized("Invalid email or password".into()),
        SignInError::ProviderUnavailable => {
            AppError::ServiceUnavailable("Identity provider unavailable; try again".into())
        }
        SignInError::Storage(err) => AppError::InternalServerError(err),
    }
}

fn issued_response(state: &AppState, issued: IssuedSession) -> Response {
    let session = issued.session;
    let body = Json(AuthResponse {
        access_token: issued.access_token,
        user_id: issued.user_id,
    });
    match session {
        Some((_, wrapper)) => {
            let cookie = build_session_cookie(
                &wrapper,
                state.config.session_cookie_max_age(),
                state.config.cookie_options(),
            );
            with_set_cookie(body.into_response(), &cookie)
        }
        None => body.into_response(),
    }
}

fn rotation_error_response(state: &AppState, err: SessionError) -> Response {
    match err {
        SessionError::RotationConflict => {
            AppError::Conflict("Session was refreshed concurrently; retry".into()).into_response()
        }
        SessionError::ExchangeUnavailable | SessionError::RotationStorageFailed => {
            AppError::ServiceUnavailable("Temporary failure; try again".into()).into_response()
        }
        SessionError::Storage(err) => AppError::InternalServerError(err).into_response(),
        other => {
            // Fail-secure: the wrapper is dead weight from here on, so clear
            // it. Revoked and missing sessions surface identically to avoid
            // a session-existence oracle.
            tracing::debug!(error = %other, "session rotation rejected");
            let response =
                AppError::Unauthorized("Invalid or expired session".into()).into_response();
            with_set_cookie(response, &build_clear_cookie(state.config.cookie_options()))
        }
    }
}

fn with_set_cookie(mut response: Response, cookie: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}
