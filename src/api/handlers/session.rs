//! Session endpoints for cookie and bearer auth.

use crate::{
    api::{
        events::{SessionEvent, SessionEvents},
        handlers::{error_response, ErrorBody},
        routes::{HttpMethod, RouteFamily, RouteRegistry},
    },
    store::SessionStore,
};
use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::error;
use utoipa::ToSchema;

pub const SESSION_COOKIE_NAME: &str = "registra_session";
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 12 * 60 * 60;

/// Attributes of the session cookie handed out at confirmation.
#[derive(Clone, Debug)]
pub struct CookieConfig {
    ttl: Duration,
    secure: bool,
}

impl CookieConfig {
    #[must_use]
    pub fn new(ttl: Duration, secure: bool) -> Self {
        Self { ttl, secure }
    }

    /// Secure cookies only when the application home is served over HTTPS.
    #[must_use]
    pub fn for_home_url(home_url: &str, ttl: Duration) -> Self {
        Self::new(ttl, home_url.starts_with("https://"))
    }

    /// Build a `HttpOnly` cookie for the session token.
    ///
    /// # Errors
    /// Returns an error if the token contains bytes not allowed in a header.
    pub fn session_cookie(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let ttl_seconds = self.ttl.as_secs();
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    fn clear_session_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie =
            format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SessionUser {
    pub username: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SessionResponse {
    pub results: SessionUser,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionRoutes;

impl RouteFamily for SessionRoutes {
    fn name(&self) -> &'static str {
        "session"
    }

    fn stage(&self, registry: &mut RouteRegistry) {
        registry
            .register(HttpMethod::Get, "/session", session)
            .register(HttpMethod::Post, "/logout", logout);
    }
}

#[utoipa::path(
    get,
    path = "/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session"),
        (status = 500, description = "Session lookup failed", body = ErrorBody)
    ),
    tag = "session"
)]
pub async fn session(
    headers: HeaderMap,
    sessions: Extension<Arc<dyn SessionStore>>,
) -> Response {
    // Missing cookies are treated as "no session".
    let Some(token) = extract_session_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    match sessions.lookup(&token).await {
        Ok(Some(record)) => {
            let response = SessionResponse {
                results: SessionUser {
                    username: record.username,
                    email: record.email,
                },
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to lookup session: {err:#}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SessionLookupError",
                "Failed to lookup session",
            )
        }
    }
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "session"
)]
pub async fn logout(
    headers: HeaderMap,
    sessions: Extension<Arc<dyn SessionStore>>,
    events: Extension<SessionEvents>,
    cookies: Extension<CookieConfig>,
) -> Response {
    if let Some(token) = extract_session_token(&headers) {
        match sessions.destroy(&token).await {
            Ok(Some(record)) => {
                events.publish(SessionEvent::Destroyed {
                    username: record.username,
                });
            }
            Ok(None) => (),
            Err(err) => error!("Failed to delete session: {err:#}"),
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = cookies.clear_session_cookie() {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
            .then(|| val.trim().to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
