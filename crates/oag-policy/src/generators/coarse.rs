use oag_graph::{GraphView, HubLabel, NodeId};

use super::Edges;
use crate::PolicyInputs;

pub(crate) const fn baseline() -> Edges {
    Vec::new()
}

/// Every indirect call may reach every function entry.
pub(crate) fn set_of_functions(inputs: &PolicyInputs<'_>) -> Edges {
    let hub = NodeId::Virtual(HubLabel::Functions);
    let mut entries: Vec<u64> = inputs.functions().iter().copied().collect();
    entries.sort_unstable();

    inputs
        .call_sites()
        .iter()
        .map(|&site| (NodeId::Addr(site), hub))
        .chain(entries.into_iter().map(|entry| (hub, NodeId::Addr(entry))))
        .collect()
}

/// Every indirect call may reach every block.
pub(crate) fn no_cfi(inputs: &PolicyInputs<'_>) -> Edges {
    let cfg = inputs.cfg();
    inputs
        .call_sites()
        .iter()
        .map(|&site| (NodeId::Addr(site), NodeId::AnyHub))
        .chain(
            cfg.nodes()
                .filter(|node| !node.is_sink())
                .map(|node| (NodeId::AnyHub, node)),
        )
        .collect()
}
