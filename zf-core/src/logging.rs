//! Logging setup.
//!
//! Every zfnet binary calls [`setup`] once at startup so output looks the same everywhere.
//! `RUST_LOG` takes precedence over the verbosity passed on the command line.

use tracing_subscriber::EnvFilter;

use crate::errors::{
    anyhow,
    EmptyResult,
};

/// Build the filter used by [`setup`]: `RUST_LOG` if set, otherwise `verbosity`.
#[must_use]
pub fn env_filter(verbosity: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity))
}

/// Install the global `tracing` subscriber. Logs go to stderr so stdout stays free for results.
///
/// # Errors
///
/// Fails if a global subscriber has already been installed.
pub fn setup(verbosity: &str) -> EmptyResult {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("could not install log subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::info("info")]
    #[case::module("zf_sim=debug,warn")]
    fn test_env_filter_accepts_directives(#[case] verbosity: &str) {
        // RUST_LOG may be set in CI; either way a filter must come back
        let filter = env_filter(verbosity);
        assert!(!filter.to_string().is_empty());
    }
}
