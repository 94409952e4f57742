use oag_graph::{Distance, DistanceKind, HubLabel, NodeId};

use super::{Edges, min_successor_distance};
use crate::PolicyInputs;

/// A site may call every function entry at least as far from the sink as its
/// nearest real target. One edge per permitted entry.
pub(crate) fn numeric_naive(inputs: &PolicyInputs<'_>, kind: DistanceKind) -> Edges {
    let oracle = inputs.distance(kind);
    let mut edges = Vec::new();
    for &site in inputs.call_sites() {
        let min = min_successor_distance(inputs, oracle, site);
        edges.extend(
            oracle
                .entries_at_least(min)
                .map(|entry| (NodeId::Addr(site), NodeId::Addr(entry))),
        );
    }
    edges
}

/// Same permitted targets as [`numeric_naive`], routed through one hub per
/// distance bin.
pub(crate) fn numeric_hub(inputs: &PolicyInputs<'_>, kind: DistanceKind) -> Edges {
    let oracle = inputs.distance(kind);
    let mut edges = Vec::new();
    for &site in inputs.call_sites() {
        let min = min_successor_distance(inputs, oracle, site);
        edges.extend(
            oracle
                .bins_at_least(min)
                .map(|(dist, _)| (NodeId::Addr(site), hub(dist))),
        );
    }
    for (&dist, members) in oracle.bins() {
        edges.extend(
            members
                .iter()
                .map(|&entry| (hub(dist), NodeId::Addr(entry))),
        );
    }
    edges
}

const fn hub(dist: Distance) -> NodeId {
    NodeId::Virtual(HubLabel::Distance(dist))
}
