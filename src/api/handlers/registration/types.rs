//! Request/response types for the registration endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Submitted registration fields. Presence is checked by the workflow, so
/// every field is optional at the wire level.
#[derive(ToSchema, Deserialize, Default, Clone)]
pub struct RegisterUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "reCaptchaResponse")]
    pub re_captcha_response: Option<String>,
}

impl std::fmt::Debug for RegisterUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterUserRequest")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

/// Accepts both `{params:{...}}` and a flat body.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum RegisterUserPayload {
    Wrapped { params: RegisterUserRequest },
    Flat(RegisterUserRequest),
}

impl RegisterUserPayload {
    #[must_use]
    pub fn into_request(self) -> RegisterUserRequest {
        match self {
            Self::Wrapped { params } => params,
            Self::Flat(request) => request,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RegisteredUser {
    pub email: String,
    pub username: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RegisterUserResponse {
    pub results: RegisteredUser,
}
