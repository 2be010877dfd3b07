//! Registration endpoint family.
//!
//! - `POST /register-user` submits credentials and stores a pending account.
//! - `GET /confirm-user-registration/:username/:registrationKey` promotes it
//!   and binds a session, answering with a redirect to the application home.
//!
//! Both handlers run the workflow on a spawned task: a client that hangs up
//! early drops the handler future, not the half-finished registration.

pub mod error;
pub mod types;
mod utils;
pub mod workflow;

pub use self::error::{Field, RegistrationError};
pub use self::types::{
    RegisterUserPayload, RegisterUserRequest, RegisterUserResponse, RegisteredUser,
};
pub use self::workflow::{Confirmation, Registration, RegistrationConfig, RegistrationWorkflow};

use crate::api::{
    handlers::{session::CookieConfig, ErrorBody},
    routes::{HttpMethod, RouteFamily, RouteRegistry},
};
use anyhow::anyhow;
use axum::{
    extract::{Extension, Path},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{error, instrument};

pub const REGISTER_USER_PATH: &str = "/register-user";
pub const CONFIRM_USER_REGISTRATION_PATH: &str =
    "/confirm-user-registration/:username/:registrationKey";

#[derive(Clone, Copy, Debug, Default)]
pub struct RegistrationRoutes;

impl RouteFamily for RegistrationRoutes {
    fn name(&self) -> &'static str {
        "registration"
    }

    fn stage(&self, registry: &mut RouteRegistry) {
        registry
            .register(HttpMethod::Post, REGISTER_USER_PATH, register_user)
            .register(
                HttpMethod::Get,
                CONFIRM_USER_REGISTRATION_PATH,
                confirm_user_registration,
            );
    }
}

#[utoipa::path(
    post,
    path = "/register-user",
    request_body = RegisterUserRequest,
    responses (
        (status = 201, description = "Pending account created, confirmation link sent", body = RegisterUserResponse),
        (status = 400, description = "Missing field, invalid email or username, or failed reCAPTCHA verification", body = ErrorBody),
        (status = 409, description = "Username is already taken", body = ErrorBody),
        (status = 500, description = "Internal error", body = ErrorBody),
    ),
    tag = "registration"
)]
#[instrument(skip_all)]
pub async fn register_user(
    workflow: Extension<Arc<RegistrationWorkflow>>,
    payload: Option<Json<RegisterUserPayload>>,
) -> Response {
    let Some(Json(payload)) = payload else {
        return RegistrationError::InvalidParameters { field: Field::Body }.into_response();
    };

    let workflow = workflow.0.clone();
    let task = tokio::spawn(async move { workflow.register(payload.into_request()).await });

    match task.await {
        Ok(Ok(registration)) => {
            let body = RegisterUserResponse {
                results: RegisteredUser {
                    email: registration.email,
                    username: registration.username,
                },
            };
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Ok(Err(err)) => err.into_response(),
        Err(err) => {
            RegistrationError::Internal(anyhow!("registration task failed: {err}")).into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/confirm-user-registration/{username}/{registrationKey}",
    params(
        ("username" = String, Path, description = "Username chosen at registration"),
        ("registrationKey" = String, Path, description = "Key from the confirmation email"),
    ),
    responses (
        (status = 303, description = "Account confirmed, session cookie set, redirect to home"),
        (status = 400, description = "Registration key does not match", body = ErrorBody),
        (status = 404, description = "No pending registration for the username", body = ErrorBody),
        (status = 500, description = "Session could not be saved; the link stays valid", body = ErrorBody),
    ),
    tag = "registration"
)]
#[instrument(skip_all)]
pub async fn confirm_user_registration(
    Path((username, registration_key)): Path<(String, String)>,
    workflow: Extension<Arc<RegistrationWorkflow>>,
    cookies: Extension<CookieConfig>,
) -> Response {
    let workflow = workflow.0.clone();
    let home_url = workflow.config().home_url().to_string();
    let task = tokio::spawn(async move { workflow.confirm(&username, &registration_key).await });

    let confirmation = match task.await {
        Ok(Ok(confirmation)) => confirmation,
        Ok(Err(err)) => return err.into_response(),
        Err(err) => {
            return RegistrationError::Internal(anyhow!("confirmation task failed: {err}"))
                .into_response()
        }
    };

    let cookie = match cookies.session_cookie(confirmation.session.token().expose_secret()) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return RegistrationError::SessionPersistence.into_response();
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    (headers, Redirect::to(&home_url)).into_response()
}
