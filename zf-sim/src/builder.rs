//! Network construction from edge lists and random generators.
//!
//! Every regulatory link goes through the same two rules: a transcription factor regulates its
//! target directly, while a zinc finger is routed through a freshly created heterochromatin unit
//! (`ZF → Het → target`). Construction is all-or-nothing: inputs are validated before the network
//! is touched.
use std::collections::HashMap;

use derive_setters::Setters;
use itertools::Itertools;
use rand::Rng;
use tracing::{
    debug,
    info,
    instrument,
};

use crate::error::{
    check_positive,
    check_probability,
    NetworkError,
    Result,
};
use crate::model::{
    Edge,
    Kinetics,
    Network,
    NodeId,
    NodeType,
};

/// TF → ZF and TF → TE inclusion probability used by [`NetworkBuilder::generate_biased`].
pub const BIASED_TF_PROBABILITY: f64 = 0.75;

/// Mean number of ZF → TE links per zinc finger used by [`NetworkBuilder::generate_biased`].
pub const BIASED_TE_TARGETS_PER_ZF: f64 = 2.0;

/// Default parameters for everything a builder creates.
#[derive(Clone, Copy, Debug, PartialEq, Setters)]
#[setters(prefix = "with_")]
pub struct BuilderConfig {
    /// Kinetics of TF, ZF and TE nodes created from an edge list.
    pub node: Kinetics,
    /// Hill parameters of edges leaving a TF or a ZF.
    pub edge: Edge,
    /// Kinetics of each heterochromatin unit.
    pub heterochromatin: Kinetics,
    /// Hill parameters of the edge leaving a heterochromatin unit.
    pub heterochromatin_edge: Edge,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            node: Kinetics::default(),
            edge: Edge::default(),
            heterochromatin: Kinetics::new(0, 0.1, 0.01),
            heterochromatin_edge: Edge::default(),
        }
    }
}

impl BuilderConfig {
    /// Validate every default before anything is built with it.
    fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.heterochromatin.validate()?;
        for edge in [self.edge, self.heterochromatin_edge] {
            check_positive("k", edge.k)?;
            check_positive("n", edge.n)?;
        }
        Ok(())
    }
}

/// Builds networks and (re)wires their topology.
#[derive(Clone, Debug, Default)]
pub struct NetworkBuilder {
    /// Parameters applied to created nodes and edges.
    config: BuilderConfig,
}

impl NetworkBuilder {
    /// Builder using `config` for every node and edge it creates.
    #[must_use]
    pub const fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    /// Parameters in use.
    #[must_use]
    pub const fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Build a network from `(source, target)` label pairs.
    ///
    /// Every label must appear in `types`. A zinc-finger source gets a new heterochromatin unit
    /// per pair, even when the same pair is listed twice.
    ///
    /// # Errors
    ///
    /// See [`NetworkBuilder::extend_from_edge_list`].
    pub fn from_edge_list<S: AsRef<str>>(
        &self,
        edges: &[(S, S)],
        types: &HashMap<String, NodeType>,
    ) -> Result<Network> {
        let mut network = Network::new();
        self.extend_from_edge_list(&mut network, edges, types)?;
        Ok(network)
    }

    /// Add the nodes and links described by `(source, target)` label pairs to `network`.
    ///
    /// Labels already in the network reuse the existing node; new labels take their type from
    /// `types` and their kinetics from [`BuilderConfig::node`].
    ///
    /// # Errors
    ///
    /// - [`NetworkError::MissingNode`] for a new label absent from `types`
    /// - [`NetworkError::DuplicateLabel`] when `types` contradicts an existing node
    /// - [`NetworkError::InvalidTopology`] for a source that is not a TF or ZF, or a label typed
    ///   as heterochromatin (those are only created implicitly)
    /// - [`NetworkError::InvalidParameter`] for invalid builder defaults
    ///
    /// The network is unchanged whenever an error is returned.
    #[instrument(level = "debug", skip_all, fields(pairs = edges.len()))]
    pub fn extend_from_edge_list<S: AsRef<str>>(
        &self,
        network: &mut Network,
        edges: &[(S, S)],
        types: &HashMap<String, NodeType>,
    ) -> Result<()> {
        self.config.validate()?;

        let resolve = |label: &str| -> Result<NodeType> {
            let declared = types.get(label).copied();
            let node_type = match (network.node_by_label(label), declared) {
                (Some(node), Some(t)) if t != node.node_type() => {
                    return Err(NetworkError::DuplicateLabel(label.to_owned()));
                },
                (Some(node), _) => node.node_type(),
                (None, Some(t)) => t,
                (None, None) => return Err(NetworkError::MissingNode(label.to_owned())),
            };
            if node_type == NodeType::HeterochromatinUnit {
                return Err(NetworkError::InvalidTopology {
                    label: label.to_owned(),
                    reason: "heterochromatin units cannot be named in an edge list".into(),
                });
            }
            Ok(node_type)
        };

        let mut plan = Vec::with_capacity(edges.len());
        for (source, target) in edges {
            let (source, target) = (source.as_ref(), target.as_ref());
            let source_type = resolve(source)?;
            let target_type = resolve(target)?;
            if !matches!(source_type, NodeType::TranscriptionFactor | NodeType::ZincFingerRepressor) {
                return Err(NetworkError::InvalidTopology {
                    label: source.to_owned(),
                    reason: format!("a {source_type} node cannot regulate {target}"),
                });
            }
            plan.push(((source, source_type), (target, target_type)));
        }

        for ((source, source_type), (target, target_type)) in plan {
            let source = self.get_or_insert(network, source, source_type)?;
            let target = self.get_or_insert(network, target, target_type)?;
            self.connect(network, source, target)?;
        }
        debug!(nodes = network.node_count(), edges = network.edge_count(), "edge list applied");
        Ok(())
    }

    /// Existing node with `label`, or a new one of `node_type`.
    fn get_or_insert(&self, network: &mut Network, label: &str, node_type: NodeType) -> Result<NodeId> {
        match network.id_of(label) {
            Some(id) => Ok(id),
            None => network.add_node(label, node_type, self.config.node),
        }
    }

    /// Rewire `network` at random: each ordered pair (source in TF ∪ ZF, target in ZF ∪ TE) is
    /// linked independently with probability `p`.
    ///
    /// All edges and heterochromatin units are removed first, so repeated calls never accumulate
    /// topology.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidParameter`] if `p` is outside `[0, 1]` or the builder defaults are
    /// invalid; the network is unchanged in that case.
    #[instrument(
        skip(self, network, rng),
        fields(
            tfs = network.transcription_factors().len(),
            zfs = network.zinc_fingers().len(),
            tes = network.transposable_elements().len(),
        )
    )]
    pub fn generate_random<R: Rng + ?Sized>(&self, network: &mut Network, p: f64, rng: &mut R) -> Result<()> {
        check_probability("p", p)?;
        self.generate_with(network, rng, |_, _| p)
    }

    /// Rewire `network` with type-dependent probabilities: TF → ZF and TF → TE with
    /// [`BIASED_TF_PROBABILITY`], ZF → ZF with `1 / #ZF` and ZF → TE with `2 / #TE` (at most 1).
    ///
    /// Resets topology first, like [`NetworkBuilder::generate_random`].
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidParameter`] if the builder defaults are invalid.
    #[instrument(
        skip(self, network, rng),
        fields(
            tfs = network.transcription_factors().len(),
            zfs = network.zinc_fingers().len(),
            tes = network.transposable_elements().len(),
        )
    )]
    pub fn generate_biased<R: Rng + ?Sized>(&self, network: &mut Network, rng: &mut R) -> Result<()> {
        #[allow(clippy::cast_precision_loss)]
        let (n_zfs, n_tes) = (network.zinc_fingers().len() as f64, network.transposable_elements().len() as f64);
        self.generate_with(network, rng, |source, target| match (source, target) {
            (NodeType::TranscriptionFactor, _) => BIASED_TF_PROBABILITY,
            (_, NodeType::ZincFingerRepressor) => 1.0 / n_zfs,
            _ => (BIASED_TE_TARGETS_PER_ZF / n_tes).min(1.0),
        })
    }

    /// Reset topology, then link each candidate pair with probability `probability(source, target)`.
    fn generate_with<R, F>(&self, network: &mut Network, rng: &mut R, probability: F) -> Result<()>
    where
        R: Rng + ?Sized,
        F: Fn(NodeType, NodeType) -> f64,
    {
        self.config.validate()?;
        network.reset_topology();

        let sources: Vec<_> = network.transcription_factors().iter().chain(network.zinc_fingers()).copied().collect();
        let targets: Vec<_> = network.zinc_fingers().iter().chain(network.transposable_elements()).copied().collect();
        let type_of = |network: &Network, id: NodeId| network.node(id).map(|node| node.node_type());

        let mut linked = 0usize;
        for (source, target) in sources.into_iter().cartesian_product(targets) {
            let (Some(source_type), Some(target_type)) = (type_of(network, source), type_of(network, target)) else {
                continue;
            };
            if rng.gen::<f64>() < probability(source_type, target_type) {
                self.connect(network, source, target)?;
                linked += 1;
            }
        }
        info!(links = linked, heterochromatin = network.heterochromatin().len(), "network generated");
        Ok(())
    }

    /// Link `source` to `target` directly for a TF, or through a new heterochromatin unit for a ZF.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidTopology`] if `source` is neither a TF nor a ZF, and any error of
    /// [`Network::add_edge`].
    pub fn connect(&self, network: &mut Network, source: NodeId, target: NodeId) -> Result<()> {
        let source_node = network.node(source).ok_or(NetworkError::UnknownHandle(source.index()))?;
        let Edge { k, n } = self.config.edge;
        match source_node.node_type() {
            NodeType::TranscriptionFactor => {
                network.add_edge(source, target, k, n)?;
            },
            NodeType::ZincFingerRepressor => {
                if !network.node(target).is_some_and(|t| t.node_type() != NodeType::HeterochromatinUnit) {
                    return Err(NetworkError::InvalidTopology {
                        label: source_node.label().to_owned(),
                        reason: "zinc fingers need a non-heterochromatin target".into(),
                    });
                }
                let het = network.insert_heterochromatin(self.config.heterochromatin);
                let het_edge = self.config.heterochromatin_edge;
                network.add_edge(source, het, k, n)?;
                network.add_edge(het, target, het_edge.k, het_edge.n)?;
            },
            other => {
                return Err(NetworkError::InvalidTopology {
                    label: source_node.label().to_owned(),
                    reason: format!("a {other} node cannot regulate other nodes"),
                });
            },
        }
        Ok(())
    }
}
