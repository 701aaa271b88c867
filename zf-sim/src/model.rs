//! Graph model for zinc-finger regulatory networks.
//!
//! A [`Network`] owns every [`Node`] and [`Edge`] in a single [`StableDiGraph`]. Adjacency is the
//! graph's own: an edge exists once and both of its endpoints refer to it by [`EdgeId`], so a
//! change to `k` or `n` made through the source's outgoing list is the same change seen from the
//! target's incoming list.
//!
//! Nodes are also registered in four per-type collections. Their concatenation in the order
//! transcription factors, zinc fingers, heterochromatin units, transposable elements is the
//! [`NodeOrder`](crate::propensity::NodeOrder) used to index propensities and recorded
//! populations.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use derive_setters::Setters;
use petgraph::graph::DiGraph;
use petgraph::stable_graph::{
    EdgeIndex,
    NodeIndex,
    StableDiGraph,
};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

use crate::error::{
    check_positive,
    check_rate,
    NetworkError,
    Result,
};

/// Handle to a node in a [`Network`].
pub type NodeId = NodeIndex;

/// Handle to an edge in a [`Network`].
pub type EdgeId = EdgeIndex;

/// Biological role of a node. Fixed when the node is created.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    /// Autonomously expressed activator; its inputs never affect its own production.
    TranscriptionFactor,
    /// KRAB zinc-finger protein; represses its targets through a heterochromatin unit.
    ZincFingerRepressor,
    /// Transposable element; regulated, never regulating.
    TransposableElement,
    /// Implicit, dimensionless unit of heterochromatin between a zinc finger and its target.
    HeterochromatinUnit,
}

impl NodeType {
    /// Regulatory mode implied by the type.
    #[must_use]
    pub const fn mode(self) -> Mode {
        match self {
            // A zinc finger is a repressor overall but "activates" its heterochromatin unit
            Self::TranscriptionFactor | Self::ZincFingerRepressor => Mode::Activator,
            Self::HeterochromatinUnit => Mode::Repressor,
            Self::TransposableElement => Mode::Inert,
        }
    }

    /// Short code used in generated labels and accepted by [`FromStr`].
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::TranscriptionFactor => "TF",
            Self::ZincFingerRepressor => "ZF",
            Self::TransposableElement => "TE",
            Self::HeterochromatinUnit => "Het",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "TF" => Ok(Self::TranscriptionFactor),
            "ZF" => Ok(Self::ZincFingerRepressor),
            "TE" => Ok(Self::TransposableElement),
            "Het" => Ok(Self::HeterochromatinUnit),
            other => Err(format!("unknown node type code {other:?} (expected TF, ZF, TE or Het)")),
        }
    }
}

/// How a node acts on the targets of its outgoing edges.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Output rises with the regulator's population.
    Activator,
    /// Output falls with the regulator's population.
    Repressor,
    /// No regulatory effect; Hill evaluation on such an edge is an error.
    Inert,
}

/// Initial population and rate constants of a node.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[setters(prefix = "with_")]
pub struct Kinetics {
    /// Initial molecule count.
    pub population: u64,
    /// Production-rate constant β.
    pub beta: f64,
    /// Degradation-rate constant γ.
    pub gamma: f64,
}

impl Default for Kinetics {
    fn default() -> Self {
        Self { population: 0, beta: 1.0, gamma: 0.1 }
    }
}

impl Kinetics {
    /// Build a parameter set.
    #[must_use]
    pub const fn new(population: u64, beta: f64, gamma: f64) -> Self {
        Self { population, beta, gamma }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        check_rate("beta", self.beta)?;
        check_rate("gamma", self.gamma)
    }
}

/// A gene, transposable element or heterochromatin unit.
///
/// Label and type are fixed at creation; population and rate constants are what simulations and
/// perturbations change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Node {
    /// Unique name.
    label: String,
    /// Biological role.
    node_type: NodeType,
    /// Current molecule count.
    pub population: u64,
    /// Production-rate constant β.
    pub beta: f64,
    /// Degradation-rate constant γ.
    pub gamma: f64,
}

impl Node {
    /// Create a node from its kinetics.
    fn new(label: String, node_type: NodeType, kinetics: Kinetics) -> Self {
        Self {
            label,
            node_type,
            population: kinetics.population,
            beta: kinetics.beta,
            gamma: kinetics.gamma,
        }
    }

    /// Unique label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Biological role.
    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Regulatory mode, always consistent with [`Node::node_type`].
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.node_type.mode()
    }
}

/// Hill parameters of a regulatory edge. Endpoints live in the owning graph.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[setters(prefix = "with_")]
pub struct Edge {
    /// Activation threshold: regulator population at half-maximal effect.
    pub k: f64,
    /// Cooperativity (Hill coefficient).
    pub n: f64,
}

impl Default for Edge {
    fn default() -> Self {
        Self { k: 1.0, n: 2.0 }
    }
}

/// Kind of interaction in the collapsed [`Network::regulatory_graph`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize)]
pub enum Regulation {
    /// Direct transcription-factor activation.
    Activation,
    /// Zinc-finger repression through a heterochromatin unit.
    Repression,
}

/// Population of every node at one instant, keyed by node handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PopulationSnapshot(HashMap<NodeId, u64>);

impl PopulationSnapshot {
    /// Population recorded for `node`, if it was part of the snapshot.
    #[must_use]
    pub fn get(&self, node: NodeId) -> Option<u64> {
        self.0.get(&node).copied()
    }

    /// Number of nodes captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no node was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Typed regulatory network.
#[derive(Clone, Debug, Default)]
pub struct Network {
    /// Owns node and edge payloads; edges are only ever removed all at once, so edge indices
    /// follow insertion order.
    graph: StableDiGraph<Node, Edge>,
    /// Label → handle, for lookup and duplicate detection.
    labels: HashMap<String, NodeId>,
    /// Transcription factors in creation order.
    tfs: Vec<NodeId>,
    /// Zinc-finger repressors in creation order.
    zfs: Vec<NodeId>,
    /// Heterochromatin units in creation order.
    hets: Vec<NodeId>,
    /// Transposable elements in creation order.
    tes: Vec<NodeId>,
    /// Every edge in creation order.
    edges: Vec<EdgeId>,
}

impl Network {
    /// Empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Network with `n_tfs` transcription factors, `n_zfs` zinc fingers and `n_tes` transposable
    /// elements labelled `TF_i`, `ZF_i` and `TE_i`, default kinetics and no edges.
    #[must_use]
    pub fn with_counts(n_tfs: usize, n_zfs: usize, n_tes: usize) -> Self {
        let mut network = Self::new();
        for (node_type, count) in [
            (NodeType::TranscriptionFactor, n_tfs),
            (NodeType::ZincFingerRepressor, n_zfs),
            (NodeType::TransposableElement, n_tes),
        ] {
            for i in 0..count {
                network.insert_node(format!("{}_{i}", node_type.code()), node_type, Kinetics::default());
            }
        }
        network
    }

    /// Add a node.
    ///
    /// # Errors
    ///
    /// [`NetworkError::DuplicateLabel`] if the label is taken, [`NetworkError::InvalidParameter`]
    /// for negative or non-finite rates.
    pub fn add_node(&mut self, label: impl Into<String>, node_type: NodeType, kinetics: Kinetics) -> Result<NodeId> {
        let label = label.into();
        if self.labels.contains_key(&label) {
            return Err(NetworkError::DuplicateLabel(label));
        }
        kinetics.validate()?;
        Ok(self.insert_node(label, node_type, kinetics))
    }

    /// Insert a node whose label is known to be free and whose kinetics are known to be valid.
    fn insert_node(&mut self, label: String, node_type: NodeType, kinetics: Kinetics) -> NodeId {
        let id = self.graph.add_node(Node::new(label.clone(), node_type, kinetics));
        self.labels.insert(label, id);
        match node_type {
            NodeType::TranscriptionFactor => self.tfs.push(id),
            NodeType::ZincFingerRepressor => self.zfs.push(id),
            NodeType::HeterochromatinUnit => self.hets.push(id),
            NodeType::TransposableElement => self.tes.push(id),
        }
        id
    }

    /// Create a fresh heterochromatin unit labelled `Het_i`.
    pub(crate) fn insert_heterochromatin(&mut self, kinetics: Kinetics) -> NodeId {
        let label = (self.hets.len()..)
            .map(|i| format!("Het_{i}"))
            .find(|label| !self.labels.contains_key(label))
            .unwrap_or_default();
        self.insert_node(label, NodeType::HeterochromatinUnit, kinetics)
    }

    /// Link `source → target` with threshold `k` and cooperativity `n`.
    ///
    /// The edge appears in the source's outgoing and the target's incoming edges together; nothing
    /// is linked if validation fails.
    ///
    /// # Errors
    ///
    /// [`NetworkError::UnknownHandle`] for a foreign node, [`NetworkError::InvalidParameter`] if
    /// `k` or `n` is not positive.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, k: f64, n: f64) -> Result<EdgeId> {
        for node in [source, target] {
            if !self.graph.contains_node(node) {
                return Err(NetworkError::UnknownHandle(node.index()));
            }
        }
        check_positive("k", k)?;
        check_positive("n", n)?;

        let id = self.graph.add_edge(source, target, Edge { k, n });
        self.edges.push(id);
        Ok(id)
    }

    /// Remove every edge and heterochromatin unit, keeping the TF, ZF and TE nodes.
    pub fn reset_topology(&mut self) {
        self.graph.clear_edges();
        self.edges.clear();
        for het in self.hets.drain(..) {
            if let Some(node) = self.graph.remove_node(het) {
                self.labels.remove(&node.label);
            }
        }
        debug!(nodes = self.graph.node_count(), "topology reset");
    }

    /// Node payload.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node_weight(id)
    }

    /// Mutable node payload.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.graph.node_weight_mut(id)
    }

    /// Handle of the node with `label`.
    #[must_use]
    pub fn id_of(&self, label: &str) -> Option<NodeId> {
        self.labels.get(label).copied()
    }

    /// Node with `label`.
    #[must_use]
    pub fn node_by_label(&self, label: &str) -> Option<&Node> {
        self.id_of(label).and_then(|id| self.node(id))
    }

    /// Mutable node with `label`.
    pub fn node_by_label_mut(&mut self, label: &str) -> Option<&mut Node> {
        self.id_of(label).and_then(move |id| self.node_mut(id))
    }

    /// Edge payload.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.graph.edge_weight(id)
    }

    /// Mutable edge payload.
    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.graph.edge_weight_mut(id)
    }

    /// `(source, target)` of an edge.
    #[must_use]
    pub fn endpoints(&self, id: EdgeId) -> Option<(NodeId, NodeId)> {
        self.graph.edge_endpoints(id)
    }

    /// Edges in one direction, in creation order.
    fn adjacent(&self, id: NodeId, direction: Direction) -> Vec<EdgeId> {
        let mut edges: Vec<_> = self.graph.edges_directed(id, direction).map(|e| e.id()).collect();
        edges.sort_unstable();
        edges
    }

    /// Edges regulating `id`, in creation order.
    #[must_use]
    pub fn incoming(&self, id: NodeId) -> Vec<EdgeId> {
        self.adjacent(id, Direction::Incoming)
    }

    /// Edges regulated by `id`, in creation order.
    #[must_use]
    pub fn outgoing(&self, id: NodeId) -> Vec<EdgeId> {
        self.adjacent(id, Direction::Outgoing)
    }

    /// Number of incoming plus outgoing edges.
    #[must_use]
    pub fn degree(&self, id: NodeId) -> usize {
        self.graph.edges_directed(id, Direction::Incoming).count()
            + self.graph.edges_directed(id, Direction::Outgoing).count()
    }

    /// Transcription factors in creation order.
    #[must_use]
    pub fn transcription_factors(&self) -> &[NodeId] {
        &self.tfs
    }

    /// Zinc-finger repressors in creation order.
    #[must_use]
    pub fn zinc_fingers(&self) -> &[NodeId] {
        &self.zfs
    }

    /// Heterochromatin units in creation order.
    #[must_use]
    pub fn heterochromatin(&self) -> &[NodeId] {
        &self.hets
    }

    /// Transposable elements in creation order.
    #[must_use]
    pub fn transposable_elements(&self) -> &[NodeId] {
        &self.tes
    }

    /// Every edge in creation order.
    #[must_use]
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// Nodes in propensity order: TFs, ZFs, heterochromatin, TEs.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.tfs.iter().chain(&self.zfs).chain(&self.hets).chain(&self.tes).copied()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Hill response of `edge`'s target to its source's current population.
    ///
    /// Activators give `β·x^n / (k^n + x^n)`, repressors `β / (1 + (x/k)^n)`, with `β` taken from
    /// the target and `x` the source population. The activator form is evaluated as
    /// `β / (1 + (k/x)^n)` so very large populations saturate instead of overflowing.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidEdge`] when the source is [`Mode::Inert`],
    /// [`NetworkError::UnknownHandle`] for a foreign edge.
    pub fn hill(&self, edge: EdgeId) -> Result<f64> {
        let (source, target) = self.endpoints(edge).ok_or(NetworkError::UnknownHandle(edge.index()))?;
        let params = &self.graph[edge];
        let regulator = &self.graph[source];
        let beta = self.graph[target].beta;
        #[allow(clippy::cast_precision_loss)]
        let x = regulator.population as f64;

        match regulator.mode() {
            Mode::Activator if regulator.population == 0 => Ok(0.0),
            Mode::Activator => Ok(beta / (1.0 + (params.k / x).powf(params.n))),
            Mode::Repressor => Ok(beta / (1.0 + (x / params.k).powf(params.n))),
            Mode::Inert => Err(NetworkError::InvalidEdge {
                source_label: regulator.label.clone(),
                target_label: self.graph[target].label.clone(),
            }),
        }
    }

    /// Check the wiring rules. Transposable elements never regulate. Zinc fingers reach their
    /// targets only through heterochromatin. Each heterochromatin unit has exactly one zinc-finger
    /// input and exactly one non-heterochromatin target; transcription factors may regulate it too.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidTopology`] naming the first offending node.
    pub fn check_topology(&self) -> Result<()> {
        let invalid = |id: NodeId, reason: String| NetworkError::InvalidTopology {
            label: self.graph[id].label.clone(),
            reason,
        };

        for &edge in &self.edges {
            let Some((source, target)) = self.endpoints(edge) else { continue };
            let target_type = self.graph[target].node_type;
            match (self.graph[source].node_type, target_type) {
                (NodeType::TransposableElement, _) => {
                    return Err(invalid(source, "transposable elements cannot regulate other nodes".into()));
                },
                (NodeType::ZincFingerRepressor, t) if t != NodeType::HeterochromatinUnit => {
                    return Err(invalid(source, format!("zinc finger wired directly to a {t} node")));
                },
                (NodeType::HeterochromatinUnit, NodeType::HeterochromatinUnit) => {
                    return Err(invalid(source, "heterochromatin unit wired to another heterochromatin unit".into()));
                },
                _ => (),
            }
        }

        for &het in &self.hets {
            let repressors = self
                .graph
                .edges_directed(het, Direction::Incoming)
                .filter(|e| self.graph[e.source()].node_type == NodeType::ZincFingerRepressor)
                .count();
            let outputs = self.graph.edges_directed(het, Direction::Outgoing).count();
            if repressors != 1 || outputs != 1 {
                return Err(invalid(
                    het,
                    format!("heterochromatin unit has {repressors} zinc-finger inputs and {outputs} outputs"),
                ));
            }
        }
        Ok(())
    }

    /// Capture every node's population.
    #[must_use]
    pub fn snapshot(&self) -> PopulationSnapshot {
        PopulationSnapshot(self.graph.node_indices().map(|id| (id, self.graph[id].population)).collect())
    }

    /// Reset populations from `snapshot`; rate constants and topology are left alone.
    ///
    /// # Errors
    ///
    /// [`NetworkError::UnknownHandle`] if the snapshot names a node this network does not have.
    /// Nothing is written in that case.
    pub fn restore(&mut self, snapshot: &PopulationSnapshot) -> Result<()> {
        if let Some(missing) = snapshot.0.keys().find(|id| !self.graph.contains_node(**id)) {
            return Err(NetworkError::UnknownHandle(missing.index()));
        }
        for (&id, &population) in &snapshot.0 {
            self.graph[id].population = population;
        }
        Ok(())
    }

    /// View that can change populations and rate constants but not topology.
    pub fn kinetics_mut(&mut self) -> KineticsMut<'_> {
        KineticsMut { network: self }
    }

    /// Gene-level summary: TF, ZF and TE nodes, with each ZF → heterochromatin → target path
    /// collapsed into a single [`Regulation::Repression`] edge.
    #[must_use]
    pub fn regulatory_graph(&self) -> DiGraph<String, Regulation> {
        let mut graph = DiGraph::new();
        let index: HashMap<NodeId, _> = self
            .tfs
            .iter()
            .chain(&self.zfs)
            .chain(&self.tes)
            .map(|&id| (id, graph.add_node(self.graph[id].label.clone())))
            .collect();

        for &tf in &self.tfs {
            for edge in self.outgoing(tf) {
                if let Some(&target) = self.endpoints(edge).and_then(|(_, t)| index.get(&t)) {
                    graph.add_edge(index[&tf], target, Regulation::Activation);
                }
            }
        }
        for &zf in &self.zfs {
            for to_het in self.outgoing(zf) {
                let Some((_, het)) = self.endpoints(to_het) else { continue };
                for from_het in self.outgoing(het) {
                    if let Some(&target) = self.endpoints(from_het).and_then(|(_, t)| index.get(&t)) {
                        graph.add_edge(index[&zf], target, Regulation::Repression);
                    }
                }
            }
        }
        graph
    }
}

/// Lists unconnected nodes, then one `source<TAB>target` line per edge.
impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.ordered_nodes() {
            if self.degree(id) == 0 {
                writeln!(f, "{}", self.graph[id].label)?;
            }
        }
        for &edge in &self.edges {
            if let Some((source, target)) = self.endpoints(edge) {
                writeln!(f, "{}\t{}", self.graph[source].label, self.graph[target].label)?;
            }
        }
        Ok(())
    }
}

/// Mutable access to populations and rate constants of a [`Network`] whose topology must stay
/// fixed, such as one being simulated.
#[derive(Debug)]
pub struct KineticsMut<'a> {
    /// The network being adjusted.
    network: &'a mut Network,
}

impl KineticsMut<'_> {
    /// Read-only view of the whole network.
    #[must_use]
    pub fn network(&self) -> &Network {
        self.network
    }

    /// Mutable node payload.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.network.node_mut(id)
    }

    /// Mutable node with `label`.
    pub fn node_by_label_mut(&mut self, label: &str) -> Option<&mut Node> {
        self.network.node_by_label_mut(label)
    }

    /// Mutable edge parameters.
    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.network.edge_mut(id)
    }

    /// Apply `f` to every transcription factor.
    pub fn for_each_transcription_factor(&mut self, mut f: impl FnMut(&mut Node)) {
        let Network { graph, tfs, .. } = &mut *self.network;
        for &id in tfs.iter() {
            f(&mut graph[id]);
        }
    }
}
