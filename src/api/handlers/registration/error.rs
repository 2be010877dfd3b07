use crate::api::handlers::error_response;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Request fields checked for presence, in checking order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    /// The request carried no usable JSON body at all.
    Body,
    Email,
    Username,
    Password,
    RecaptchaResponse,
}

impl Field {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Body => "No data received",
            Self::Email => "No email given",
            Self::Username => "No username received",
            Self::Password => "No password given",
            Self::RecaptchaResponse => "No reCAPTCHA response given",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{field}")]
    InvalidParameters { field: Field },
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Invalid username")]
    InvalidUsername,
    #[error("reCAPTCHA verification failed")]
    VerificationFailed,
    #[error("Username is already taken")]
    DuplicateUser,
    #[error("No pending registration for this user")]
    UnknownRegistration,
    #[error("Invalid registration key")]
    InvalidRegistrationKey,
    #[error("Failed to save session")]
    SessionPersistence,
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl RegistrationError {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvalidParameters { .. } => "InvalidParametersError",
            Self::InvalidEmail => "InvalidEmailError",
            Self::InvalidUsername => "InvalidUsernameError",
            Self::VerificationFailed => "VerificationFailedError",
            Self::DuplicateUser => "DuplicateUserError",
            Self::UnknownRegistration => "UnknownRegistrationError",
            Self::InvalidRegistrationKey => "InvalidRegistrationKeyError",
            Self::SessionPersistence => "SessionPersistenceError",
            Self::Internal(_) => "InternalError",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParameters { .. }
            | Self::InvalidEmail
            | Self::InvalidUsername
            | Self::VerificationFailed
            | Self::InvalidRegistrationKey => StatusCode::BAD_REQUEST,
            Self::DuplicateUser => StatusCode::CONFLICT,
            Self::UnknownRegistration => StatusCode::NOT_FOUND,
            Self::SessionPersistence | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        if let Self::Internal(source) = &self {
            // Only the generic message reaches the client.
            error!("Registration failed: {source:#}");
        }
        error_response(self.status(), self.name(), &self.to_string())
    }
}
