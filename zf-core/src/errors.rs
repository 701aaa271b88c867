//! Error aliases shared across the workspace.
//!
//! Library crates define their own `thiserror` enums; binaries funnel everything into
//! [`anyhow::Error`] and report the full cause chain once, on the way out.

pub use anyhow::{
    anyhow,
    bail,
    ensure,
    Context,
};
use tracing::error;

/// Result type for operations that only signal success or failure.
pub type EmptyResult = anyhow::Result<()>;

/// Flatten an error and all of its sources into a single `a: b: c` line.
#[must_use]
pub fn chain_message(err: &anyhow::Error) -> String {
    err.chain().map(ToString::to_string).collect::<Vec<_>>().join(": ")
}

/// Log an error (with its cause chain) at `error` level.
pub fn log_chain(err: &anyhow::Error) {
    error!("{}", chain_message(err));
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tracing_test::traced_test;

    use super::*;

    #[rstest]
    fn test_chain_message_includes_context() {
        let err = anyhow!("population went negative").context("trajectory 3 failed");
        assert_eq!(chain_message(&err), "trajectory 3 failed: population went negative");
    }

    #[rstest]
    #[traced_test]
    fn test_log_chain_emits_error() {
        let err = anyhow!("no edges").context("bad network");
        log_chain(&err);
        assert!(logs_contain("bad network: no edges"));
    }
}
