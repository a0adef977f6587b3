use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::services::identity::ProviderError;
use crate::state::AppState;
use crate::types::UserId;

/// Identity attached to a request after access-token verification.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Verifies the bearer access token with the identity provider and attaches
/// the resolved user to the request.
pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id = state
        .provider
        .verify_access_token(&token)
        .await
        .map_err(|err| match err {
            ProviderError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        })?;

    request
        .extensions_mut()
        .insert(AuthenticatedUser { user_id });
    Ok(next.run(request).await)
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let space_idx = header.find(' ')?;
    let (scheme, rest) = header.split_at(space_idx);
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(rest.trim_start().to_string())
    } else {
        None
    }
}
