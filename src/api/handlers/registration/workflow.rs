//! Two-phase registration: submit (pending) then confirm (account + session).
//!
//! Submission walks `Received -> Validated -> Verified -> Pending`; each step
//! returns early with its [`RegistrationError`], so a failed step leaves no
//! side effects behind. Confirmation promotes the pending record and binds a
//! session before anything is reported back.

use super::{
    error::{Field, RegistrationError},
    types::RegisterUserRequest,
    utils::hash_credential,
};
use crate::{
    api::{
        email::{build_confirm_url, ConfirmationEmail, Mailer},
        events::{SessionEvent, SessionEvents},
        handlers::{normalize_email, normalize_username, valid_email, valid_username},
    },
    recaptcha::CaptchaVerifier,
    store::{
        generate_token, hash_token, now_unix, AccountRecord, AccountStore, PendingAccount,
        SessionHandle, SessionStore, StoreError,
    },
};
use anyhow::anyhow;
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};

pub const DEFAULT_PENDING_TTL_SECONDS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct RegistrationConfig {
    public_base_url: String,
    home_url: String,
    pending_ttl: Duration,
}

impl RegistrationConfig {
    #[must_use]
    pub fn new(public_base_url: String, home_url: String) -> Self {
        Self {
            public_base_url,
            home_url,
            pending_ttl: Duration::from_secs(DEFAULT_PENDING_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    /// Where a confirmed user is redirected.
    #[must_use]
    pub fn home_url(&self) -> &str {
        &self.home_url
    }

    #[must_use]
    pub fn pending_ttl(&self) -> Duration {
        self.pending_ttl
    }
}

/// Result of a successful submission.
pub struct Registration {
    pub email: String,
    pub username: String,
    registration_key: SecretString,
}

impl Registration {
    /// The raw key mailed to the user; only its digest is stored.
    #[must_use]
    pub fn registration_key(&self) -> &SecretString {
        &self.registration_key
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Result of a successful confirmation.
#[derive(Debug)]
pub struct Confirmation {
    pub username: String,
    pub email: String,
    pub session: SessionHandle,
}

struct Submission {
    email: String,
    username: String,
    password: SecretString,
    recaptcha_response: String,
}

pub struct RegistrationWorkflow {
    verifier: Arc<dyn CaptchaVerifier>,
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    mailer: Arc<dyn Mailer>,
    events: SessionEvents,
    config: RegistrationConfig,
}

impl RegistrationWorkflow {
    #[must_use]
    pub fn new(
        verifier: Arc<dyn CaptchaVerifier>,
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn Mailer>,
        events: SessionEvents,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            verifier,
            accounts,
            sessions,
            mailer,
            events,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Validate, verify and store a pending account, then mail the link.
    ///
    /// # Errors
    /// The [`RegistrationError`] of the first step that failed.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        request: RegisterUserRequest,
    ) -> Result<Registration, RegistrationError> {
        let submission = validate(request)?;
        self.verify(&submission).await?;
        let registration = self.create_pending(submission).await?;
        self.send_confirmation(&registration).await;
        Ok(registration)
    }

    /// Promote the pending account and bind a session to it.
    ///
    /// # Errors
    /// [`RegistrationError::UnknownRegistration`] or
    /// [`RegistrationError::InvalidRegistrationKey`] from the store,
    /// [`RegistrationError::SessionPersistence`] when the session cannot be
    /// saved; the account is then returned to the pending set so the same
    /// link can be retried.
    #[instrument(skip(self, registration_key))]
    pub async fn confirm(
        &self,
        username: &str,
        registration_key: &str,
    ) -> Result<Confirmation, RegistrationError> {
        let account = self
            .accounts
            .promote(username, registration_key)
            .await
            .map_err(|err| match err {
                StoreError::UnknownRegistration => RegistrationError::UnknownRegistration,
                StoreError::InvalidKey => RegistrationError::InvalidRegistrationKey,
                StoreError::Duplicate => {
                    RegistrationError::Internal(anyhow!("account already confirmed"))
                }
                StoreError::Backend(err) => RegistrationError::Internal(err),
            })?;

        let session = match self.sessions.bind(&account.username, &account.email).await {
            Ok(session) => session,
            Err(err) => {
                error!("Failed to save session for {}: {err:#}", account.username);
                self.restore_pending(account, registration_key).await;
                return Err(RegistrationError::SessionPersistence);
            }
        };

        self.events.publish(SessionEvent::Bound {
            username: account.username.clone(),
            email: account.email.clone(),
        });
        info!(username = %account.username, "registration confirmed");

        Ok(Confirmation {
            username: account.username,
            email: account.email,
            session,
        })
    }

    async fn restore_pending(&self, account: AccountRecord, registration_key: &str) {
        let (created_at, expires_at) = self.pending_window();
        let username = account.username.clone();
        let pending = PendingAccount {
            username: account.username,
            email: account.email,
            credential_hash: account.credential_hash,
            registration_key_hash: hash_token(registration_key),
            created_at,
            expires_at,
        };

        match self.accounts.demote(pending).await {
            Ok(()) => warn!(username = %username, "confirmation rolled back to pending"),
            Err(err) => error!(
                username = %username,
                "Failed to restore pending registration: {err:#}"
            ),
        }
    }

    fn pending_window(&self) -> (i64, i64) {
        let created_at = now_unix();
        let ttl = i64::try_from(self.config.pending_ttl.as_secs()).unwrap_or(i64::MAX);
        (created_at, created_at.saturating_add(ttl))
    }

    async fn verify(&self, submission: &Submission) -> Result<(), RegistrationError> {
        self.verifier
            .verify(&submission.recaptcha_response)
            .await
            .map_err(|err| {
                warn!("reCAPTCHA verification failed: {err}");
                RegistrationError::VerificationFailed
            })
    }

    async fn create_pending(
        &self,
        submission: Submission,
    ) -> Result<Registration, RegistrationError> {
        let Submission {
            email,
            username,
            password,
            ..
        } = submission;

        let registration_key = generate_token().map_err(RegistrationError::Internal)?;
        let credential_hash = hash_credential(password)
            .await
            .map_err(RegistrationError::Internal)?;

        let (created_at, expires_at) = self.pending_window();
        let pending = PendingAccount {
            username: username.clone(),
            email: email.clone(),
            credential_hash,
            registration_key_hash: hash_token(&registration_key),
            created_at,
            expires_at,
        };

        self.accounts.create(pending).await.map_err(|err| match err {
            StoreError::Duplicate => RegistrationError::DuplicateUser,
            StoreError::Backend(err) => RegistrationError::Internal(err),
            other => RegistrationError::Internal(anyhow!("unexpected store error: {other}")),
        })?;
        info!(username = %username, "pending account created");

        Ok(Registration {
            email,
            username,
            registration_key: SecretString::from(registration_key),
        })
    }

    /// Delivery failures are logged; the pending record stays in place.
    async fn send_confirmation(&self, registration: &Registration) {
        let confirm_url = match build_confirm_url(
            &self.config.public_base_url,
            &registration.username,
            registration.registration_key.expose_secret(),
        ) {
            Ok(url) => url,
            Err(err) => {
                error!("Failed to build confirmation link: {err:#}");
                return;
            }
        };

        let message = ConfirmationEmail {
            to_email: registration.email.clone(),
            username: registration.username.clone(),
            confirm_url,
        };
        if let Err(err) = self.mailer.send(&message).await {
            error!(
                username = %registration.username,
                "Failed to send confirmation email: {err:#}"
            );
        }
    }
}

fn required(value: Option<String>, field: Field) -> Result<String, RegistrationError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RegistrationError::InvalidParameters { field }),
    }
}

/// Presence checks in fixed order, then the email and username shapes.
fn validate(request: RegisterUserRequest) -> Result<Submission, RegistrationError> {
    let email = required(request.email, Field::Email)?;
    let username = required(request.username, Field::Username)?;
    let password = required(request.password, Field::Password)?;
    let recaptcha_response = required(request.re_captcha_response, Field::RecaptchaResponse)?;

    let email = normalize_email(&email);
    if !valid_email(&email) {
        return Err(RegistrationError::InvalidEmail);
    }

    let username = normalize_username(&username);
    if !valid_username(&username) {
        return Err(RegistrationError::InvalidUsername);
    }

    Ok(Submission {
        email,
        username,
        password: SecretString::from(password),
        recaptcha_response: recaptcha_response.trim().to_string(),
    })
}
