use crate::error::ApiError;
use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hangar_orchestrator::{parse_roles, Actor, Role};

const USER_HEADERS: [&str; 3] = ["x-hangar-user", "x-forwarded-user", "x-user"];
const ROLES_HEADER: &str = "x-user-roles";

/// Auth middleware - builds the request's [`Actor`] from proxy headers
///
/// An authenticating proxy in front of hangar-api sets `X-Hangar-User` (or
/// the oauth2-proxy `X-Forwarded-User`); `x-user` is accepted for local
/// development. Roles come from a comma-separated `x-user-roles` header and
/// default to `member`.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, Response> {
    let actor = actor_from_headers(req.headers())?;

    req.extensions_mut().insert(actor);

    Ok(next.run(req).await)
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let username = USER_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StatusCode::UNAUTHORIZED.into_response())?;

    let roles = match headers.get(ROLES_HEADER).and_then(|h| h.to_str().ok()) {
        Some(value) => parse_roles(value).map_err(|e| ApiError::from(e).into_response())?,
        None => Vec::new(),
    };
    let roles = if roles.is_empty() {
        vec![Role::Member]
    } else {
        roles
    };

    Ok(Actor::new(username, roles))
}
