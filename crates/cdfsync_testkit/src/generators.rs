//! Property-based test generators using proptest.
//!
//! The main strategy produces layered DAGs: every node links to the next
//! layer, so depth equals the layer count, plus random cross links to any
//! deeper layer.

use crate::fixtures::content;
use cdfsync_protocol::{Cdf, EntityUuid};
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::{BTreeMap, BTreeSet};

/// Strategy for generating entity uuids.
pub fn entity_uuid_strategy() -> impl Strategy<Value = EntityUuid> {
    prop::array::uniform16(any::<u8>()).prop_map(EntityUuid::from_bytes)
}

/// A generated dependency graph.
#[derive(Debug, Clone)]
pub struct LayeredGraph {
    /// Node uuids by layer, roots first.
    pub layers: Vec<Vec<EntityUuid>>,
    /// Outgoing edges per node.
    pub edges: BTreeMap<EntityUuid, BTreeSet<EntityUuid>>,
}

impl LayeredGraph {
    /// Returns the root layer.
    pub fn roots(&self) -> &[EntityUuid] {
        &self.layers[0]
    }

    /// Returns every node.
    pub fn nodes(&self) -> impl Iterator<Item = &EntityUuid> {
        self.layers.iter().flatten()
    }

    /// Returns the transitive closure of `seeds`, seeds included.
    pub fn closure(&self, seeds: &[EntityUuid]) -> BTreeSet<EntityUuid> {
        let mut seen: BTreeSet<EntityUuid> = BTreeSet::new();
        let mut stack: Vec<EntityUuid> = seeds.to_vec();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                if let Some(targets) = self.edges.get(&node) {
                    stack.extend(targets.iter().copied());
                }
            }
        }
        seen
    }

    /// Builds one CDF per node, all owned by `origin`.
    pub fn to_cdfs(&self, origin: EntityUuid) -> Vec<Cdf> {
        self.nodes()
            .map(|node| {
                let deps: Vec<EntityUuid> = self
                    .edges
                    .get(node)
                    .map(|targets| targets.iter().copied().collect())
                    .unwrap_or_default();
                content(*node, origin, &deps)
            })
            .collect()
    }
}

fn node_uuid(layer: usize, position: usize) -> EntityUuid {
    let mut bytes = [0u8; 16];
    bytes[0] = 0xA0;
    bytes[1] = layer as u8;
    bytes[2] = position as u8;
    EntityUuid::from_bytes(bytes)
}

fn build_graph(widths: &[usize], links: &[(Index, Index, Index)]) -> LayeredGraph {
    let layers: Vec<Vec<EntityUuid>> = widths
        .iter()
        .enumerate()
        .map(|(layer, width)| (0..*width).map(|p| node_uuid(layer, p)).collect())
        .collect();
    let mut edges: BTreeMap<EntityUuid, BTreeSet<EntityUuid>> = BTreeMap::new();

    for layer in 0..layers.len() - 1 {
        let next = &layers[layer + 1];
        for (position, node) in layers[layer].iter().enumerate() {
            edges
                .entry(*node)
                .or_default()
                .insert(next[position % next.len()]);
        }
    }

    let sources: Vec<(usize, EntityUuid)> = layers[..layers.len() - 1]
        .iter()
        .enumerate()
        .flat_map(|(layer, nodes)| nodes.iter().map(move |node| (layer, *node)))
        .collect();
    for (from, depth, to) in links {
        let (layer, node) = sources[from.index(sources.len())];
        let deeper = layers.len() - layer - 1;
        let target_layer = &layers[layer + 1 + depth.index(deeper)];
        let target = target_layer[to.index(target_layer.len())];
        edges.entry(node).or_default().insert(target);
    }

    LayeredGraph { layers, edges }
}

/// Strategy for layered DAGs with `min_depth..=max_depth` layers of up to
/// `max_width` nodes each.
pub fn layered_graph_strategy(
    min_depth: usize,
    max_depth: usize,
    max_width: usize,
) -> impl Strategy<Value = LayeredGraph> {
    let min_depth = min_depth.max(2);
    prop::collection::vec(1..=max_width.max(1), min_depth..=max_depth.max(min_depth))
        .prop_flat_map(|widths| {
            let total: usize = widths.iter().sum();
            (
                Just(widths),
                prop::collection::vec(
                    (any::<Index>(), any::<Index>(), any::<Index>()),
                    0..=total * 2,
                ),
            )
        })
        .prop_map(|(widths, links)| build_graph(&widths, &links))
}

/// A layered graph with one non-root node withheld from the hub.
#[derive(Debug, Clone)]
pub struct GraphWithHole {
    /// The full graph.
    pub graph: LayeredGraph,
    /// The node the hub cannot produce.
    pub withheld: EntityUuid,
}

/// Strategy for graphs missing exactly one non-root node.
pub fn graph_with_hole_strategy() -> impl Strategy<Value = GraphWithHole> {
    (layered_graph_strategy(3, 5, 4), any::<Index>()).prop_map(|(graph, pick)| {
        let candidates: Vec<EntityUuid> = graph.layers[1..].iter().flatten().copied().collect();
        let withheld = candidates[pick.index(candidates.len())];
        GraphWithHole { graph, withheld }
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn graphs_are_deep_and_acyclic(graph in layered_graph_strategy(3, 5, 4)) {
            prop_assert!(graph.layers.len() >= 3);
            // Every edge points strictly deeper.
            let layer_of: BTreeMap<EntityUuid, usize> = graph
                .layers
                .iter()
                .enumerate()
                .flat_map(|(l, nodes)| nodes.iter().map(move |n| (*n, l)))
                .collect();
            for (from, targets) in &graph.edges {
                for to in targets {
                    prop_assert!(layer_of[to] > layer_of[from]);
                }
            }
            // A root reaches the last layer.
            let closure = graph.closure(&graph.roots()[..1]);
            prop_assert!(graph.layers.last().unwrap().iter().any(|n| closure.contains(n)));
        }

        #[test]
        fn hole_is_never_a_root(case in graph_with_hole_strategy()) {
            prop_assert!(!case.graph.roots().contains(&case.withheld));
        }
    }
}
