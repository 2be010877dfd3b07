//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action to run, currently always the API
//! server with its full configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{recaptcha, registration};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty());

    let recaptcha_opts = recaptcha::Options::parse(matches)?;
    let registration_opts = registration::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        recaptcha_secret: recaptcha_opts.secret,
        recaptcha_verify_url: recaptcha_opts.verify_url,
        recaptcha_timeout_seconds: recaptcha_opts.timeout_seconds,
        public_base_url: registration_opts.public_base_url,
        home_url: registration_opts.home_url,
        pending_ttl_seconds: registration_opts.pending_ttl_seconds,
        session_ttl_seconds: registration_opts.session_ttl_seconds,
    }))
}
