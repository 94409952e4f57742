//! Ground-truth control flow graph.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::{Block, EdgeAttrs, GraphError, NodeId, Result, TransferKind};

/// Read-only graph access shared by the base graph and policy overlays.
pub trait GraphView {
    /// Check whether a node exists.
    fn contains(&self, node: NodeId) -> bool;

    /// Number of nodes, hubs and sink included.
    fn node_count(&self) -> usize;

    /// All nodes, in no particular order.
    fn nodes(&self) -> impl Iterator<Item = NodeId> + '_;

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;

    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;

    /// Instruction count of a block; zero for the sink and hubs.
    fn instr_count(&self, node: NodeId) -> u64;

    /// Ground-truth kind of an edge. `None` for derived edges and non-edges.
    fn edge_kind(&self, from: NodeId, to: NodeId) -> Option<TransferKind>;

    fn out_degree(&self, node: NodeId) -> usize {
        self.successors(node).count()
    }

    fn in_degree(&self, node: NodeId) -> usize {
        self.predecessors(node).count()
    }
}

/// Control flow graph of basic blocks plus the sink.
#[derive(Clone, Debug, Default)]
pub struct Cfg {
    blocks: FxHashMap<u64, Block>,
    /// Successors map: node -> (successor -> edge attributes).
    successors: FxHashMap<NodeId, FxHashMap<NodeId, EdgeAttrs>>,
    /// Predecessors map: node -> set of predecessors.
    predecessors: FxHashMap<NodeId, FxHashSet<NodeId>>,
    edge_count: usize,
    sink_attached: bool,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block, replacing the attributes of an existing one.
    pub fn add_block(&mut self, addr: u64, block: Block) -> Option<Block> {
        self.blocks.insert(addr, block)
    }

    /// Add a ground-truth edge between two existing blocks.
    ///
    /// A self-loop on a `rep` block is recorded as `jump_direct`.
    pub fn add_edge(&mut self, from: u64, to: u64, mut attrs: EdgeAttrs) -> Result<()> {
        let (from_id, to_id) = (NodeId::Addr(from), NodeId::Addr(to));
        for (addr, id) in [(from, from_id), (to, to_id)] {
            if !self.blocks.contains_key(&addr) {
                return Err(GraphError::DanglingEdge {
                    from: from_id,
                    to: to_id,
                    missing: id,
                });
            }
        }

        // TODO: check whether rep self-loops should be dropped rather than reclassified.
        if from == to && self.blocks[&from].ends_with(TransferKind::Rep) {
            trace!(block = %from_id, kind = %attrs.kind, "rep self-loop reclassified");
            attrs.kind = TransferKind::JumpDirect;
        }

        self.insert_edge(from_id, to_id, attrs);
        Ok(())
    }

    fn insert_edge(&mut self, from: NodeId, to: NodeId, attrs: EdgeAttrs) {
        if self
            .successors
            .entry(from)
            .or_default()
            .insert(to, attrs)
            .is_none()
        {
            self.edge_count += 1;
        }
        self.predecessors.entry(to).or_default().insert(from);
    }

    /// Add the sink and an edge to it from every syscall block.
    ///
    /// Returns the number of sink edges.
    pub fn attach_sink(&mut self) -> Result<usize> {
        if self.sink_attached {
            return Err(GraphError::SinkAlreadyAttached);
        }
        self.sink_attached = true;

        let mut gates: Vec<u64> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.ends_with(TransferKind::Syscall))
            .map(|(&addr, _)| addr)
            .collect();
        gates.sort_unstable();

        for &gate in &gates {
            self.insert_edge(
                NodeId::Addr(gate),
                NodeId::Sink,
                EdgeAttrs::new(TransferKind::Syscall),
            );
        }

        debug!(gates = gates.len(), "sink attached");
        Ok(gates.len())
    }

    pub const fn has_sink(&self) -> bool {
        self.sink_attached
    }

    pub fn block(&self, addr: u64) -> Option<&Block> {
        self.blocks.get(&addr)
    }

    pub fn blocks(&self) -> impl Iterator<Item = (u64, &Block)> + '_ {
        self.blocks.iter().map(|(&addr, block)| (addr, block))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub const fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&EdgeAttrs> {
        self.successors.get(&from)?.get(&to)
    }

    /// Outgoing edges of a node with their attributes.
    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = (NodeId, &EdgeAttrs)> + '_ {
        self.successors
            .get(&node)
            .into_iter()
            .flat_map(|succs| succs.iter().map(|(&to, attrs)| (to, attrs)))
    }

    /// Blocks ending in an indirect call, sorted by address.
    pub fn indirect_call_sites(&self) -> Vec<u64> {
        let mut sites: Vec<u64> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.ends_with(TransferKind::CallIndirect))
            .map(|(&addr, _)| addr)
            .collect();
        sites.sort_unstable();
        sites
    }
}

impl GraphView for Cfg {
    fn contains(&self, node: NodeId) -> bool {
        match node {
            NodeId::Addr(addr) => self.blocks.contains_key(&addr),
            NodeId::Sink => self.sink_attached,
            NodeId::AnyHub | NodeId::Virtual(_) => false,
        }
    }

    fn node_count(&self) -> usize {
        self.blocks.len() + usize::from(self.sink_attached)
    }

    fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.blocks
            .keys()
            .map(|&addr| NodeId::Addr(addr))
            .chain(self.sink_attached.then_some(NodeId::Sink))
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.successors
            .get(&node)
            .into_iter()
            .flat_map(|succs| succs.keys().copied())
    }

    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.predecessors
            .get(&node)
            .into_iter()
            .flat_map(|preds| preds.iter().copied())
    }

    fn instr_count(&self, node: NodeId) -> u64 {
        node.addr()
            .and_then(|addr| self.blocks.get(&addr))
            .map_or(0, |block| block.instr_count)
    }

    fn edge_kind(&self, from: NodeId, to: NodeId) -> Option<TransferKind> {
        self.edge(from, to).map(|attrs| attrs.kind)
    }

    fn out_degree(&self, node: NodeId) -> usize {
        self.successors.get(&node).map_or(0, FxHashMap::len)
    }

    fn in_degree(&self, node: NodeId) -> usize {
        self.predecessors.get(&node).map_or(0, FxHashSet::len)
    }
}

/// Bulk loader: every block is added before any edge is checked.
#[derive(Debug, Default)]
pub struct CfgBuilder {
    cfg: Cfg,
    edges: Vec<(u64, u64, EdgeAttrs)>,
}

impl CfgBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, addr: u64, block: Block) -> &mut Self {
        self.cfg.add_block(addr, block);
        self
    }

    pub fn add_edge(&mut self, from: u64, to: u64, attrs: EdgeAttrs) -> &mut Self {
        self.edges.push((from, to, attrs));
        self
    }

    /// Resolve all edges. Fails on the first dangling endpoint.
    pub fn build(self) -> Result<Cfg> {
        let Self { mut cfg, edges } = self;
        for (from, to, attrs) in edges {
            cfg.add_edge(from, to, attrs)?;
        }
        debug!(
            blocks = cfg.block_count(),
            edges = cfg.edge_count(),
            "graph built"
        );
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: TransferKind) -> Block {
        Block::new(4, 1).with_terminator(kind)
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut cfg = Cfg::new();
        cfg.add_block(0x10, block(TransferKind::Misc));
        let err = cfg
            .add_edge(0x10, 0x20, EdgeAttrs::new(TransferKind::Follow))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingEdge {
                from: NodeId::Addr(0x10),
                to: NodeId::Addr(0x20),
                missing: NodeId::Addr(0x20),
            }
        );
    }

    #[test]
    fn test_builder_defers_edges() {
        let mut builder = CfgBuilder::new();
        builder.add_edge(0x10, 0x20, EdgeAttrs::new(TransferKind::Follow));
        builder.add_block(0x10, block(TransferKind::Misc));
        builder.add_block(0x20, block(TransferKind::Ret));
        let cfg = builder.build().unwrap();
        assert_eq!(cfg.edge_count(), 1);
        assert_eq!(
            cfg.successors(NodeId::Addr(0x10)).collect::<Vec<_>>(),
            vec![NodeId::Addr(0x20)]
        );
        assert_eq!(
            cfg.predecessors(NodeId::Addr(0x20)).collect::<Vec<_>>(),
            vec![NodeId::Addr(0x10)]
        );
    }

    #[test]
    fn test_attach_sink() {
        let mut cfg = Cfg::new();
        cfg.add_block(0x10, block(TransferKind::Syscall));
        cfg.add_block(0x20, block(TransferKind::Syscall));
        cfg.add_block(0x30, block(TransferKind::Ret));
        assert_eq!(cfg.attach_sink(), Ok(2));
        assert_eq!(cfg.node_count(), 4);
        assert_eq!(cfg.in_degree(NodeId::Sink), 2);
        assert_eq!(cfg.out_degree(NodeId::Sink), 0);
        assert_eq!(cfg.attach_sink(), Err(GraphError::SinkAlreadyAttached));
    }

    #[test]
    fn test_rep_self_loop_reclassified() {
        let mut cfg = Cfg::new();
        cfg.add_block(0x10, block(TransferKind::Rep));
        cfg.add_edge(0x10, 0x10, EdgeAttrs::new(TransferKind::Follow))
            .unwrap();
        assert_eq!(
            cfg.edge_kind(NodeId::Addr(0x10), NodeId::Addr(0x10)),
            Some(TransferKind::JumpDirect)
        );
    }

    #[test]
    fn test_indirect_call_sites_sorted() {
        let mut cfg = Cfg::new();
        cfg.add_block(0x30, block(TransferKind::CallIndirect));
        cfg.add_block(0x10, block(TransferKind::CallIndirect));
        cfg.add_block(0x20, block(TransferKind::CallDirect));
        assert_eq!(cfg.indirect_call_sites(), vec![0x10, 0x30]);
    }
}
