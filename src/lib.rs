//! # Registra (account registration service)
//!
//! `registra` turns an unauthenticated visitor's submitted credentials into a
//! confirmed, session-bound account.
//!
//! ## Registration lifecycle
//!
//! - **Submission:** `POST /register-user` validates the payload, checks the
//!   reCAPTCHA response with the verification service and stores a *pending*
//!   account. The confirmation link is mailed to the submitted address.
//! - **Confirmation:** `GET /confirm-user-registration/:username/:registrationKey`
//!   promotes the pending record into the permanent account set, binds a session
//!   and redirects to the application home.
//!
//! A username lives in at most one of {pending, confirmed} at any time and
//! promotion is atomic: concurrent confirmations for the same record have a
//! single winner.
//!
//! ## Routing
//!
//! Endpoint families (registration, session, health) stage their routes on a
//! [`api::routes::RouteRegistry`] and install them on a shared
//! [`api::routes::Dispatcher`]. Colliding routes and double-mounted families
//! abort startup.

pub mod api;
pub mod cli;
pub mod recaptcha;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
