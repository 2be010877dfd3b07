//! Endpoint families and helpers shared by their handlers.
//!
//! Every family implements [`crate::api::routes::RouteFamily`]; failures are
//! rendered through [`error_response`] so clients always see the same
//! `{error:{message,name,code}}` shape.

pub mod health;
pub mod registration;
pub mod session;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    pub name: String,
    pub code: u16,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

pub(crate) fn error_response(status: StatusCode, name: &str, message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            message: message.to_string(),
            name: name.to_string(),
            code: status.as_u16(),
        },
    };
    (status, Json(body)).into_response()
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

const USERNAME_MIN_LENGTH: usize = 3;
const USERNAME_MAX_LENGTH: usize = 32;

pub(crate) fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Usernames end up as a path segment of the confirmation link, so only
/// lowercase ASCII letters, digits, `_` and `-` are accepted.
pub(crate) fn valid_username(username: &str) -> bool {
    if !(USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&username.len()) {
        return false;
    }
    Regex::new(r"^[a-z0-9][a-z0-9_-]*$").is_ok_and(|re| re.is_match(username))
}

/// Lightweight email sanity check on already-normalized input.
pub(crate) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}
