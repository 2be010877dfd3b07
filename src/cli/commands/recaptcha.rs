use crate::recaptcha::{DEFAULT_TIMEOUT_SECONDS, DEFAULT_VERIFY_URL};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_RECAPTCHA_SECRET: &str = "recaptcha-secret";
pub const ARG_RECAPTCHA_VERIFY_URL: &str = "recaptcha-verify-url";
pub const ARG_RECAPTCHA_TIMEOUT_SECONDS: &str = "recaptcha-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub secret: SecretString,
    pub verify_url: String,
    pub timeout_seconds: u64,
}

impl Options {
    /// Parse reCAPTCHA arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret is missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = match matches.get_one::<String>(ARG_RECAPTCHA_SECRET).cloned() {
            Some(value) if !value.trim().is_empty() => SecretString::from(value),
            _ => anyhow::bail!("missing required argument: --{ARG_RECAPTCHA_SECRET}"),
        };

        let verify_url = matches
            .get_one::<String>(ARG_RECAPTCHA_VERIFY_URL)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_VERIFY_URL.to_string());

        let timeout_seconds = matches
            .get_one::<u64>(ARG_RECAPTCHA_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        Ok(Self {
            secret,
            verify_url,
            timeout_seconds,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RECAPTCHA_SECRET)
                .long(ARG_RECAPTCHA_SECRET)
                .help("Server-side reCAPTCHA secret")
                .env("REGISTRA_RECAPTCHA_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_RECAPTCHA_VERIFY_URL)
                .long(ARG_RECAPTCHA_VERIFY_URL)
                .help("reCAPTCHA siteverify endpoint")
                .env("REGISTRA_RECAPTCHA_VERIFY_URL")
                .default_value(DEFAULT_VERIFY_URL),
        )
        .arg(
            Arg::new(ARG_RECAPTCHA_TIMEOUT_SECONDS)
                .long(ARG_RECAPTCHA_TIMEOUT_SECONDS)
                .help("Timeout for the reCAPTCHA verification call in seconds")
                .env("REGISTRA_RECAPTCHA_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("registra"))
    }

    #[test]
    fn secret_is_required() {
        temp_env::with_vars([("REGISTRA_RECAPTCHA_SECRET", None::<&str>)], || {
            let matches = command().get_matches_from(vec!["registra"]);
            let result = Options::parse(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err
                    .to_string()
                    .contains("missing required argument: --recaptcha-secret"));
            }
        });
    }

    #[test]
    fn defaults_apply() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("REGISTRA_RECAPTCHA_SECRET", Some("s3cret")),
                ("REGISTRA_RECAPTCHA_VERIFY_URL", None),
                ("REGISTRA_RECAPTCHA_TIMEOUT_SECONDS", None),
            ],
            || {
                let matches = command().get_matches_from(vec!["registra"]);
                let options = Options::parse(&matches)?;
                assert_eq!(options.secret.expose_secret(), "s3cret");
                assert_eq!(options.verify_url, DEFAULT_VERIFY_URL);
                assert_eq!(options.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
                Ok(())
            },
        )
    }

    #[test]
    fn debug_hides_secret() -> anyhow::Result<()> {
        let matches = command().try_get_matches_from(vec![
            "registra",
            "--recaptcha-secret",
            "s3cret",
            "--recaptcha-timeout-seconds",
            "3",
        ])?;
        let options = Options::parse(&matches)?;
        assert_eq!(options.timeout_seconds, 3);
        assert!(!format!("{options:?}").contains("s3cret"));
        Ok(())
    }
}
