use crate::api::handlers::{
    registration::workflow::DEFAULT_PENDING_TTL_SECONDS, session::DEFAULT_SESSION_TTL_SECONDS,
};
use clap::{Arg, ArgMatches, Command};

pub const ARG_PUBLIC_BASE_URL: &str = "public-base-url";
pub const ARG_HOME_URL: &str = "home-url";
pub const ARG_PENDING_TTL_SECONDS: &str = "pending-ttl-seconds";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub public_base_url: String,
    pub home_url: String,
    pub pending_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
}

impl Options {
    /// Parse registration arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a URL argument is empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            public_base_url: get_non_empty(ARG_PUBLIC_BASE_URL)?,
            home_url: get_non_empty(ARG_HOME_URL)?,
            pending_ttl_seconds: matches
                .get_one::<u64>(ARG_PENDING_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_PENDING_TTL_SECONDS),
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUBLIC_BASE_URL)
                .long(ARG_PUBLIC_BASE_URL)
                .help("Public base URL of this API, used in confirmation links")
                .env("REGISTRA_PUBLIC_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_HOME_URL)
                .long(ARG_HOME_URL)
                .help("Application home users are redirected to after confirmation")
                .env("REGISTRA_HOME_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_PENDING_TTL_SECONDS)
                .long(ARG_PENDING_TTL_SECONDS)
                .help("Lifetime of an unconfirmed registration in seconds")
                .env("REGISTRA_PENDING_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds")
                .env("REGISTRA_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64)),
        )
}
