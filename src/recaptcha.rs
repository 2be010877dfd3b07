//! reCAPTCHA verification gateway.
//!
//! The gateway makes exactly one outbound call per token: the token and the
//! server-held secret are sent as query parameters to the `siteverify`
//! endpoint, the whole body is read and the `success` flag decides the
//! outcome. Tokens are single-use, so there is no retry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

pub const DEFAULT_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("no reCAPTCHA response given")]
    InvalidParameters,
    #[error("verification rejected ({})", .codes.join(", "))]
    Rejected { codes: Vec<String> },
    #[error("verification service unavailable: {0}")]
    TransportFailure(String),
}

/// Human-interaction proof check performed before any account is created.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Verify a client-supplied response token.
    ///
    /// # Errors
    /// Returns [`VerificationError`] when the token is empty, rejected, or the
    /// verification service cannot be reached.
    async fn verify(&self, token: &str) -> Result<(), VerificationError>;
}

#[derive(Deserialize, Debug)]
struct SiteVerifyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct RecaptchaGateway {
    client: Client,
    verify_url: Url,
    secret: SecretString,
}

impl RecaptchaGateway {
    /// Build a gateway whose outbound call is bounded by `timeout`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(verify_url: &str, secret: SecretString, timeout: Duration) -> Result<Self> {
        let verify_url = Url::parse(verify_url)
            .with_context(|| format!("Invalid reCAPTCHA verify URL: {verify_url}"))?;

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build reCAPTCHA HTTP client")?;

        Ok(Self {
            client,
            verify_url,
            secret,
        })
    }

    #[must_use]
    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }
}

impl std::fmt::Debug for RecaptchaGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecaptchaGateway")
            .field("verify_url", &self.verify_url.as_str())
            .field("secret", &"***")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaGateway {
    #[instrument(skip_all, fields(verify_url = %self.verify_url))]
    async fn verify(&self, token: &str) -> Result<(), VerificationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(VerificationError::InvalidParameters);
        }

        // reqwest errors embed the request URL, which carries the secret.
        let response = self
            .client
            .post(self.verify_url.clone())
            .header(ACCEPT, "application/json")
            .query(&[("response", token), ("secret", self.secret.expose_secret())])
            .send()
            .await
            .map_err(|err| {
                let err = err.without_url();
                warn!("reCAPTCHA request failed: {err}");
                VerificationError::TransportFailure(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("reCAPTCHA verification returned {status}");
            return Err(VerificationError::TransportFailure(format!(
                "unexpected status {status}"
            )));
        }

        let body = response.bytes().await.map_err(|err| {
            let err = err.without_url();
            warn!("Failed to read reCAPTCHA response: {err}");
            VerificationError::TransportFailure(err.to_string())
        })?;

        let Ok(parsed) = serde_json::from_slice::<SiteVerifyResponse>(&body) else {
            warn!("Malformed reCAPTCHA response body");
            return Err(VerificationError::Rejected {
                codes: vec!["malformed-response".to_string()],
            });
        };

        if parsed.success {
            debug!("reCAPTCHA verification succeeded");
            Ok(())
        } else {
            debug!(codes = ?parsed.error_codes, "reCAPTCHA verification rejected");
            Err(VerificationError::Rejected {
                codes: parsed.error_codes,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VERIFY_PATH: &str = "/recaptcha/api/siteverify";

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn gateway(server: &MockServer, timeout: Duration) -> Result<RecaptchaGateway> {
        RecaptchaGateway::new(
            &format!("{}{VERIFY_PATH}", server.uri()),
            SecretString::from("s3cret".to_string()),
            timeout,
        )
    }

    #[tokio::test]
    async fn verify_accepts_successful_response() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(VERIFY_PATH))
            .and(query_param("response", "widget-token"))
            .and(query_param("secret", "s3cret"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway(&server, Duration::from_secs(5))?;
        assert!(gateway.verify("widget-token").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_failed_flag_with_codes() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(VERIFY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error-codes": ["invalid-input-response"]
            })))
            .mount(&server)
            .await;

        let gateway = gateway(&server, Duration::from_secs(5))?;
        match gateway.verify("used-token").await {
            Err(VerificationError::Rejected { codes }) => {
                assert_eq!(codes, vec!["invalid-input-response".to_string()]);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_malformed_body() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(VERIFY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let gateway = gateway(&server, Duration::from_secs(5))?;
        assert!(matches!(
            gateway.verify("token").await,
            Err(VerificationError::Rejected { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn verify_reports_server_errors_as_transport_failure() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(VERIFY_PATH))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let gateway = gateway(&server, Duration::from_secs(5))?;
        assert!(matches!(
            gateway.verify("token").await,
            Err(VerificationError::TransportFailure(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn verify_times_out_as_transport_failure() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(VERIFY_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let gateway = gateway(&server, Duration::from_millis(50))?;
        match gateway.verify("token").await {
            Err(VerificationError::TransportFailure(message)) => {
                assert!(!message.contains("s3cret"));
            }
            other => panic!("expected transport failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_empty_token_without_calling_out() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(0)
            .mount(&server)
            .await;

        let gateway = gateway(&server, Duration::from_secs(5))?;
        assert!(matches!(
            gateway.verify("   ").await,
            Err(VerificationError::InvalidParameters)
        ));
        Ok(())
    }

    #[test]
    fn debug_output_hides_secret() -> Result<()> {
        let gateway = RecaptchaGateway::new(
            DEFAULT_VERIFY_URL,
            SecretString::from("s3cret".to_string()),
            Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        )?;
        let debug = format!("{gateway:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("siteverify"));
        Ok(())
    }

    #[test]
    fn new_rejects_invalid_url() {
        let result = RecaptchaGateway::new(
            "not a url",
            SecretString::from("s3cret".to_string()),
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }
}
