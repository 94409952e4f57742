//! Policy view: the base graph plus one policy's derived edges.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::{Cfg, GraphError, GraphView, NodeId, Result, TransferKind};

/// Read-only layering of extra edges over a [`Cfg`].
///
/// Hub nodes (`any`, `virtual*`) exist only here. The base graph is never
/// modified, so any number of overlays can share it.
#[derive(Debug)]
pub struct Overlay<'g> {
    base: &'g Cfg,
    extra_succ: FxHashMap<NodeId, Vec<NodeId>>,
    extra_pred: FxHashMap<NodeId, Vec<NodeId>>,
    hubs: Vec<NodeId>,
    extra_edges: usize,
}

impl<'g> Overlay<'g> {
    /// Layer `edges` over `base`.
    ///
    /// Edges already in the base graph and repeated edges are dropped. Fails on
    /// an edge touching the sink or a block missing from the base graph.
    pub fn new<I>(base: &'g Cfg, edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = (NodeId, NodeId)>,
    {
        let mut extra_succ: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        let mut extra_pred: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        let mut hubs: FxHashSet<NodeId> = FxHashSet::default();
        let mut seen: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();

        for (from, to) in edges {
            if from.is_sink() || to.is_sink() {
                return Err(GraphError::SinkEdge { from, to });
            }
            for node in [from, to] {
                if node.is_hub() {
                    hubs.insert(node);
                } else if !base.contains(node) {
                    return Err(GraphError::DanglingEdge {
                        from,
                        to,
                        missing: node,
                    });
                }
            }
            if base.edge(from, to).is_some() || !seen.insert((from, to)) {
                continue;
            }
            extra_succ.entry(from).or_default().push(to);
            extra_pred.entry(to).or_default().push(from);
        }

        let mut hubs: Vec<NodeId> = hubs.into_iter().collect();
        hubs.sort_unstable();
        debug!(edges = seen.len(), hubs = hubs.len(), "overlay built");

        Ok(Self {
            base,
            extra_succ,
            extra_pred,
            hubs,
            extra_edges: seen.len(),
        })
    }

    pub const fn base(&self) -> &'g Cfg {
        self.base
    }

    /// Hub nodes introduced by this overlay, sorted.
    pub fn hubs(&self) -> &[NodeId] {
        &self.hubs
    }

    /// Number of derived edges.
    pub const fn extra_edge_count(&self) -> usize {
        self.extra_edges
    }

    /// Derived successors of `node` only.
    pub fn extra_successors(&self, node: NodeId) -> &[NodeId] {
        self.extra_succ.get(&node).map_or(&[][..], Vec::as_slice)
    }
}

impl GraphView for Overlay<'_> {
    fn contains(&self, node: NodeId) -> bool {
        self.base.contains(node) || (node.is_hub() && self.hubs.binary_search(&node).is_ok())
    }

    fn node_count(&self) -> usize {
        self.base.node_count() + self.hubs.len()
    }

    fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.base.nodes().chain(self.hubs.iter().copied())
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.base
            .successors(node)
            .chain(self.extra_successors(node).iter().copied())
    }

    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.base.predecessors(node).chain(
            self.extra_pred
                .get(&node)
                .map_or(&[][..], Vec::as_slice)
                .iter()
                .copied(),
        )
    }

    fn instr_count(&self, node: NodeId) -> u64 {
        self.base.instr_count(node)
    }

    fn edge_kind(&self, from: NodeId, to: NodeId) -> Option<TransferKind> {
        self.base.edge_kind(from, to)
    }

    fn out_degree(&self, node: NodeId) -> usize {
        self.base.out_degree(node) + self.extra_successors(node).len()
    }

    fn in_degree(&self, node: NodeId) -> usize {
        self.base.in_degree(node) + self.extra_pred.get(&node).map_or(0, Vec::len)
    }
}
