//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::security;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let security_opts = security::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        security: security_opts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_required() {
        temp_env::with_vars(
            [
                ("GATEHOUSE_PUBLIC_URL", None::<&str>),
                (
                    "GATEHOUSE_DSN",
                    Some("postgres://user@localhost:5432/gatehouse"),
                ),
                (
                    "GATEHOUSE_ENCRYPTION_KEY",
                    Some("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
                ),
            ],
            || {
                let command = crate::cli::commands::new();
                let result = command.try_get_matches_from(vec!["gatehouse"]);
                // clap enforces the argument itself
                assert!(result.is_err());
            },
        );
    }

    #[test]
    fn dispatches_server_action() {
        let command = crate::cli::commands::new();
        let matches = command.get_matches_from(vec![
            "gatehouse",
            "--port",
            "9090",
            "--dsn",
            "postgres://localhost/gatehouse",
            "--public-url",
            "https://stories.example",
            "--encryption-key",
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
        ]);
        let action = handler(&matches).expect("handler should succeed");
        let Action::Server(args) = action;
        assert_eq!(args.port, 9090);
        assert_eq!(args.dsn, "postgres://localhost/gatehouse");
        assert_eq!(args.security.public_base_url, "https://stories.example");
    }
}
