//! Confirmation email delivery.
//!
//! The registration workflow hands a [`ConfirmationEmail`] to a [`Mailer`]
//! once the pending account is stored. The default [`LogMailer`] only logs the
//! message; deployments plug in a real transport behind the same trait.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

#[derive(Clone)]
pub struct ConfirmationEmail {
    pub to_email: String,
    pub username: String,
    pub confirm_url: String,
}

impl std::fmt::Debug for ConfirmationEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationEmail")
            .field("to_email", &self.to_email)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Email delivery abstraction used by the registration workflow.
///
/// Awaited on the request task; implementations must not block.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a message or return an error so the caller can log it.
    async fn send(&self, message: &ConfirmationEmail) -> Result<()>;
}

/// Local dev mailer that logs instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &ConfirmationEmail) -> Result<()> {
        info!(
            to_email = %message.to_email,
            username = %message.username,
            "confirmation email send stub"
        );
        debug!(confirm_url = %message.confirm_url, "confirmation link");
        Ok(())
    }
}

/// Build the link mailed to the user; `base` is the public API origin.
///
/// # Errors
/// Returns an error if `base` is not an absolute URL that can carry a path.
pub(crate) fn build_confirm_url(
    base: &str,
    username: &str,
    registration_key: &str,
) -> Result<String> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid public base URL: {base}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow!("Public base URL cannot be a base: {base}"))?
        .pop_if_empty()
        .extend(["confirm-user-registration", username, registration_key]);
    Ok(url.into())
}
