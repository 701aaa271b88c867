//! Reaction propensities.
//!
//! Each node `i` in [`NodeOrder`] owns two reactions: production (`2i`, +1 molecule) and
//! degradation (`2i + 1`, −1 molecule). The order and the per-node input edges are captured once
//! from the network, so a simulation only re-reads populations and rates on each update.
use tracing::instrument;

use crate::error::{
    NetworkError,
    Result,
};
use crate::model::{
    EdgeId,
    Network,
    NodeId,
    NodeType,
};

/// Fixed node indexing: transcription factors, zinc fingers, heterochromatin units, transposable
/// elements, each in creation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeOrder(Vec<NodeId>);

impl NodeOrder {
    /// Capture the current order of `network`.
    #[must_use]
    pub fn of(network: &Network) -> Self {
        Self(network.ordered_nodes().collect())
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a network without nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Node at position `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied()
    }

    /// Position of `node`.
    #[must_use]
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.0.iter().position(|&id| id == node)
    }

    /// Nodes in order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }

    /// Labels in order, as used for output columns.
    #[must_use]
    pub fn labels(&self, network: &Network) -> Vec<String> {
        self.iter()
            .filter_map(|id| network.node(id))
            .map(|node| node.label().to_owned())
            .collect()
    }
}

/// What a single reaction does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reaction {
    /// Position of the affected node in [`NodeOrder`].
    pub node: usize,
    /// Change in that node's population, +1 or −1.
    pub change: i8,
}

/// Stoichiometry of the `2 × nodes` reactions. Stored implicitly: reaction `r` touches node
/// `r / 2` only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventTable {
    /// Number of nodes.
    nodes: usize,
}

impl EventTable {
    /// Table for `nodes` nodes.
    #[must_use]
    pub const fn new(nodes: usize) -> Self {
        Self { nodes }
    }

    /// Number of reactions.
    #[must_use]
    pub const fn len(&self) -> usize {
        2 * self.nodes
    }

    /// True when there are no reactions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes == 0
    }

    /// Effect of `reaction`, or `None` past the end of the table.
    #[must_use]
    pub const fn reaction(&self, reaction: usize) -> Option<Reaction> {
        if reaction >= self.len() {
            return None;
        }
        let change = if reaction % 2 == 0 { 1 } else { -1 };
        Some(Reaction { node: reaction / 2, change })
    }

    /// Dense entry: change applied to `node` by `reaction`.
    #[must_use]
    pub const fn entry(&self, reaction: usize, node: usize) -> i8 {
        match self.reaction(reaction) {
            Some(r) if r.node == node => r.change,
            _ => 0,
        }
    }
}

/// Per-node data read on every update.
#[derive(Clone, Debug)]
struct Slot {
    /// The node.
    id: NodeId,
    /// Whether inputs are ignored (transcription factors).
    constitutive: bool,
    /// Incoming edges, multiplied together for production.
    inputs: Vec<EdgeId>,
}

/// Computes the propensity vector of a network with fixed topology.
#[derive(Clone, Debug)]
pub struct PropensityEngine {
    /// Node indexing.
    order: NodeOrder,
    /// Reaction effects.
    events: EventTable,
    /// Captured inputs, parallel to `order`.
    slots: Vec<Slot>,
    /// Latest values, length `2 × nodes`.
    propensities: Vec<f64>,
}

impl PropensityEngine {
    /// Capture `network`'s order and inputs and compute the initial propensities.
    ///
    /// # Errors
    ///
    /// Any error of [`Network::hill`], e.g. [`NetworkError::InvalidEdge`] for an edge leaving a
    /// transposable element.
    #[instrument(level = "debug", skip_all, fields(nodes = network.node_count(), edges = network.edge_count()))]
    pub fn new(network: &Network) -> Result<Self> {
        let order = NodeOrder::of(network);
        let slots = order
            .iter()
            .map(|id| Slot {
                id,
                constitutive: network.node(id).is_some_and(|n| n.node_type() == NodeType::TranscriptionFactor),
                inputs: network.incoming(id),
            })
            .collect();
        let events = EventTable::new(order.len());
        let mut engine = Self { propensities: vec![0.0; events.len()], order, events, slots };
        engine.update(network)?;
        Ok(engine)
    }

    /// Recompute every propensity from the current populations and rates.
    ///
    /// # Errors
    ///
    /// [`NetworkError::UnknownHandle`] if `network` is not the one this engine was built from, and
    /// any error of [`Network::hill`].
    pub fn update(&mut self, network: &Network) -> Result<&[f64]> {
        for (i, slot) in self.slots.iter().enumerate() {
            let node = network.node(slot.id).ok_or(NetworkError::UnknownHandle(slot.id.index()))?;
            let production = if slot.constitutive {
                node.beta
            } else if slot.inputs.is_empty() {
                0.0
            } else {
                slot.inputs.iter().try_fold(1.0, |acc, &edge| Ok::<_, NetworkError>(acc * network.hill(edge)?))?
            };
            #[allow(clippy::cast_precision_loss)]
            let degradation = node.gamma * node.population as f64;

            self.propensities[2 * i] = production;
            self.propensities[2 * i + 1] = degradation;
        }
        Ok(&self.propensities)
    }

    /// Latest propensities.
    #[must_use]
    pub fn propensities(&self) -> &[f64] {
        &self.propensities
    }

    /// Sum of the latest propensities.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.propensities.iter().sum()
    }

    /// Node indexing.
    #[must_use]
    pub const fn order(&self) -> &NodeOrder {
        &self.order
    }

    /// Reaction effects.
    #[must_use]
    pub const fn events(&self) -> &EventTable {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::*;

    use super::*;
    use crate::builder::NetworkBuilder;
    use crate::model::Kinetics;

    /// `A (TF) → B (ZF)`, `A → C (TE)`, `B → Het → C`, with hand-picked kinetics.
    #[fixture]
    fn abc() -> Network {
        let types: HashMap<String, NodeType> = [
            ("A".to_owned(), NodeType::TranscriptionFactor),
            ("B".to_owned(), NodeType::ZincFingerRepressor),
            ("C".to_owned(), NodeType::TransposableElement),
        ]
        .into();
        let mut network = NetworkBuilder::default()
            .from_edge_list(&[("A", "B"), ("A", "C"), ("B", "C")], &types)
            .unwrap();

        for (label, kinetics) in [
            ("A", Kinetics::new(1, 10.0, 5.0)),
            ("B", Kinetics::new(0, 10.0, 1.0)),
            ("C", Kinetics::new(1, 2.0, 1.0)),
        ] {
            let node = network.node_by_label_mut(label).unwrap();
            node.population = kinetics.population;
            node.beta = kinetics.beta;
            node.gamma = kinetics.gamma;
        }
        let het = network.heterochromatin()[0];
        let het = network.node_mut(het).unwrap();
        het.beta = 1.0;
        het.gamma = 1.0;
        network
    }

    #[rstest]
    fn test_propensities_match_hand_computation(abc: Network) {
        let engine = PropensityEngine::new(&abc).unwrap();
        assert_eq!(engine.propensities(), [10.0, 5.0, 5.0, 0.0, 0.0, 0.0, 2.0, 1.0]);
        assert_eq!(engine.total(), 23.0);
    }

    #[rstest]
    fn test_update_sees_changed_rates(mut abc: Network) {
        let mut engine = PropensityEngine::new(&abc).unwrap();
        let tf = abc.node_by_label_mut("A").unwrap();
        tf.population = 2;
        tf.beta = 5.0;
        tf.gamma = 2.5;

        let propensities = engine.update(&abc).unwrap();
        assert_eq!(propensities.len(), 8);
        assert_eq!(propensities[0], 5.0);
        assert_eq!(propensities[1], 5.0);
    }

    #[rstest]
    fn test_order_is_tf_zf_het_te(abc: Network) {
        let order = NodeOrder::of(&abc);
        assert_eq!(order.labels(&abc), ["A", "B", "Het_0", "C"]);
        assert_eq!(order.position(abc.id_of("C").unwrap()), Some(3));
    }

    #[rstest]
    fn test_degradation_is_exact(mut abc: Network) {
        let c = abc.node_by_label_mut("C").unwrap();
        c.population = 123_456_789;
        c.gamma = 0.37;
        let engine = PropensityEngine::new(&abc).unwrap();
        assert_eq!(engine.propensities()[7], 0.37 * 123_456_789.0);
    }

    #[rstest]
    fn test_node_without_inputs_has_no_production() {
        let mut network = Network::new();
        network.add_node("lonely", NodeType::TransposableElement, Kinetics::new(4, 3.0, 0.5)).unwrap();
        let engine = PropensityEngine::new(&network).unwrap();
        assert_eq!(engine.propensities(), [0.0, 2.0]);
    }

    #[rstest]
    fn test_inert_regulator_rejected() {
        let mut network = Network::with_counts(0, 0, 2);
        let (te0, te1) = (network.id_of("TE_0").unwrap(), network.id_of("TE_1").unwrap());
        network.add_edge(te0, te1, 1.0, 2.0).unwrap();

        assert!(matches!(PropensityEngine::new(&network), Err(NetworkError::InvalidEdge { .. })));
    }

    #[rstest]
    #[case(0, Some(Reaction { node: 0, change: 1 }))]
    #[case(5, Some(Reaction { node: 2, change: -1 }))]
    #[case(8, None)]
    fn test_event_table(#[case] reaction: usize, #[case] expected: Option<Reaction>) {
        let table = EventTable::new(4);
        assert_eq!(table.len(), 8);
        assert_eq!(table.reaction(reaction), expected);
    }

    #[rstest]
    fn test_event_table_is_one_hot() {
        let table = EventTable::new(3);
        for reaction in 0..table.len() {
            let row: Vec<_> = (0..3).map(|node| table.entry(reaction, node)).collect();
            assert_eq!(row.iter().filter(|&&c| c != 0).count(), 1);
            assert_eq!(row[reaction / 2], if reaction % 2 == 0 { 1 } else { -1 });
        }
    }
}
