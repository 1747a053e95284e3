//! Workspace session authentication.
//!
//! Session issuance is an external concern; this middleware only resolves a
//! bearer token to its workspace through the workspace store and stamps the
//! result into the request context.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
};

pub async fn require_workspace(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let token = bearer_token(&request)
        .ok_or_else(|| ApiError::unauthorized("missing bearer session token"))?;

    let workspace_id = state
        .workspaces
        .find_session_workspace(&token)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::unauthorized("session token is invalid or expired"))?;

    let context = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();

    request.extensions_mut().insert(RequestContext {
        workspace_id: Some(workspace_id),
        ..context
    });

    Ok(next.run(request).await)
}

fn bearer_token(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
