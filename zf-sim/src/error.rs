//! Errors raised while building or evaluating a network.
//!
//! Every variant is fatal for the call that produced it and is returned before the network is
//! touched, so a failed construction never leaves half-linked nodes or edges behind. Running out
//! of propensity during a simulation is *not* an error; see
//! [`Termination::Absorbed`](crate::simulation::Termination::Absorbed).

use thiserror::Error;

/// Failures of network construction and kinetic evaluation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum NetworkError {
    /// An edge would break the regulatory wiring rules (for example a transposable element used as
    /// a regulator, or a zinc finger wired to its target without a heterochromatin unit).
    #[error("invalid topology at {label}: {reason}")]
    InvalidTopology {
        /// Label of the offending node.
        label: String,
        /// What rule was broken.
        reason: String,
    },

    /// An edge list referenced a label that has neither a node nor a type map entry.
    #[error("node {0:?} has no entry in the node type map")]
    MissingNode(String),

    /// The Hill function was evaluated on an edge whose source has no regulatory mode.
    #[error("edge {source_label} -> {target_label} starts at a node with no regulatory mode")]
    InvalidEdge {
        /// Label of the edge source.
        source_label: String,
        /// Label of the edge target.
        target_label: String,
    },

    /// A node label is already taken, or the type map disagrees with an existing node.
    #[error("a node labelled {0:?} already exists with a different definition")]
    DuplicateLabel(String),

    /// A kinetic or generator parameter is out of range.
    #[error("{name} = {value} is invalid: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f64,
        /// Accepted range.
        reason: &'static str,
    },

    /// A node or edge handle does not belong to this network.
    #[error("no node or edge with index {0} in this network")]
    UnknownHandle(usize),
}

/// Result alias used throughout the crate.
pub type Result<T, E = NetworkError> = std::result::Result<T, E>;

/// Reject negative, NaN and infinite rate constants.
pub(crate) fn check_rate(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(NetworkError::InvalidParameter { name, value, reason: "must be finite and non-negative" })
    }
}

/// Reject non-positive, NaN and infinite Hill parameters.
pub(crate) fn check_positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(NetworkError::InvalidParameter { name, value, reason: "must be finite and positive" })
    }
}

/// Reject probabilities outside `[0, 1]`.
pub(crate) fn check_probability(name: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(NetworkError::InvalidParameter { name, value, reason: "must lie in [0, 1]" })
    }
}
