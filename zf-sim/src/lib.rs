#![deny(
    // Strict on purpose: anything we decide to live with gets an inline allow so reviewers can find it.
    clippy::nursery,
    clippy::pedantic,
    missing_docs,
    clippy::missing_docs_in_private_items,
)]
// Network, Result and friends are exported under their short names; the module prefix adds nothing.
#![allow(clippy::module_name_repetitions)]

//! # zf-sim – stochastic simulation of zinc-finger gene regulatory networks
//!
//! zf-sim models a genome as a typed regulatory network of transcription factors (TF), KRAB
//! zinc-finger repressors (ZF) and transposable elements (TE). Zinc fingers never touch their
//! targets directly: each ZF → target link runs through its own heterochromatin unit (Het), an
//! intermediate species whose abundance represses the target.
//!
//! ## Pipeline overview
//! 1. Model ([`model`]) – nodes, Hill-function edges and the wiring rules of a [`Network`].
//! 2. Construction ([`builder`]) – networks from labelled edge lists, or random rewiring of an
//!    existing set of TF/ZF/TE nodes ([`NetworkBuilder::generate_random`],
//!    [`NetworkBuilder::generate_biased`]).
//! 3. Kinetics ([`propensity`]) – production and degradation propensities of every node.
//! 4. Simulation ([`simulation`]) – an exact Gillespie simulator recording populations on an
//!    integer tick grid, with scheduled perturbations and sequential or rayon-parallel replicates.
//!
//! Construction and simulation entry points carry [`tracing`] spans.

pub mod builder;
pub mod error;
pub mod model;
pub mod propensity;
pub mod sampling;
pub mod simulation;

pub use builder::{
    BuilderConfig,
    NetworkBuilder,
};
pub use error::{
    NetworkError,
    Result,
};
pub use model::{
    Edge,
    EdgeId,
    Kinetics,
    KineticsMut,
    Mode,
    Network,
    Node,
    NodeId,
    NodeType,
};
pub use simulation::{
    force_transcription_factors,
    CancellationToken,
    Ensemble,
    GillespieSimulator,
    Schedule,
    SimState,
    SimulationConfig,
    Termination,
    Trajectory,
};
