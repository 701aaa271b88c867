#![deny(
    clippy::nursery,
    clippy::pedantic,
    missing_docs,
    clippy::missing_docs_in_private_items,
)]
//! # zf-core – shared plumbing for the zfnet workspace
//!
//! Holds the pieces every zfnet binary needs before it does anything interesting: a single
//! [`tracing`] subscriber setup ([`logging::setup`]) and the error aliases/re-exports used at
//! binary boundaries ([`errors`]).

pub mod errors;
pub mod logging;

/// Convenience re-exports for binaries.
pub mod prelude {
    pub use crate::errors::*;
}
