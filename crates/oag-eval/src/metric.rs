//! Per-call-site complexity and distance metrics.

use std::sync::OnceLock;

use oag_graph::reach::{ancestors, descendants_filtered};
use oag_graph::{Distance, DistanceKind, DistanceOracle, GraphView, NodeId};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use tracing::{debug, info_span};

use crate::{EvalError, Result};

/// Largest descendant subgraph explored per call site.
pub const DESCENDANT_NODE_CAP: usize = 25_000;

/// Call sites per worker thread.
pub const SITES_PER_WORKER: usize = 20;

/// Metrics of one indirect call site.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRecord {
    pub site: u64,
    pub block_distance: Distance,
    pub instr_distance: Distance,
    /// McCabe complexity of the site's subgraph. `None` if it cannot reach the sink.
    pub mccabe: Option<i64>,
    pub block_dist_div_mccabe: f64,
    pub block_dist_div_log_mccabe: f64,
    pub instr_dist_div_mccabe: f64,
    pub instr_dist_div_log_mccabe: f64,
}

impl MetricRecord {
    #[allow(clippy::cast_precision_loss)]
    fn new(site: u64, block: Distance, instr: Distance, mccabe: Option<i64>) -> Self {
        let div = |dist: Distance, scale: fn(f64) -> f64| match (dist, mccabe) {
            (Distance::Finite(d), Some(m)) => d as f64 / scale(m as f64),
            _ => f64::INFINITY,
        };
        let linear = |m: f64| m;
        let log = |m: f64| m.ln_1p();
        Self {
            site,
            block_distance: block,
            instr_distance: instr,
            mccabe,
            block_dist_div_mccabe: div(block, linear),
            block_dist_div_log_mccabe: div(block, log),
            instr_dist_div_mccabe: div(instr, linear),
            instr_dist_div_log_mccabe: div(instr, log),
        }
    }
}

/// McCabe complexity `E - N + 2` of the subgraph induced by `nodes`.
///
/// Every hub inside counts as the full bipartite mesh it stands for: its
/// `in + out` edges and the hub itself are replaced by `in * out` edges.
pub fn mccabe<G: GraphView>(view: &G, nodes: &FxHashSet<NodeId>) -> i64 {
    let mut edges: i64 = 0;
    let mut hub_adjust: i64 = 0;
    for &node in nodes {
        let out = count(view.successors(node).filter(|succ| nodes.contains(succ)));
        edges += out;
        if node.is_hub() {
            let inc = count(view.predecessors(node).filter(|pred| nodes.contains(pred)));
            hub_adjust += -out - inc + 1 + out * inc;
        }
    }
    edges - count(nodes.iter()) + 2 + hub_adjust
}

fn count<I: Iterator>(iter: I) -> i64 {
    i64::try_from(iter.count()).unwrap_or(i64::MAX)
}

/// Subgraph selection between a call site and the sink.
#[derive(Debug)]
pub struct Intersector<'v, G> {
    view: &'v G,
    ancestors: FxHashSet<NodeId>,
    node_cap: usize,
    any_complexity: OnceLock<i64>,
}

impl<'v, G: GraphView> Intersector<'v, G> {
    pub fn new(view: &'v G, sink: NodeId, node_cap: usize) -> Self {
        let ancestors = {
            let _span = info_span!("sink_ancestors").entered();
            ancestors(view, sink)
        };
        debug!(ancestors = ancestors.len(), "sink ancestors collected");
        Self {
            view,
            ancestors,
            node_cap,
            any_complexity: OnceLock::new(),
        }
    }

    pub const fn ancestors(&self) -> &FxHashSet<NodeId> {
        &self.ancestors
    }

    /// Descendants of `node` that are also sink ancestors, up to the node cap.
    pub fn subgraph(&self, node: NodeId) -> FxHashSet<NodeId> {
        let nodes = descendants_filtered(self.view, node, Some(self.node_cap), |n| {
            self.ancestors.contains(&n)
        });
        if nodes.len() >= self.node_cap {
            debug!(node = %node, cap = self.node_cap, "subgraph truncated");
        }
        nodes
    }

    /// Complexity of the subgraph induced by all sink ancestors, computed once.
    pub fn any_complexity(&self) -> i64 {
        *self
            .any_complexity
            .get_or_init(|| mccabe(self.view, &self.ancestors))
    }
}

/// Number of worker threads for `sites` call sites.
pub fn worker_count(sites: usize, max_workers: usize) -> usize {
    num_cpus::get()
        .min(max_workers)
        .min(sites / SITES_PER_WORKER)
        .max(1)
}

/// Metric computation over one policy view.
#[derive(Debug)]
pub struct MetricEngine<'v, G> {
    view: &'v G,
    block: DistanceOracle,
    instr: DistanceOracle,
    intersector: Intersector<'v, G>,
}

impl<'v, G: GraphView + Sync> MetricEngine<'v, G> {
    /// Recompute both distances and the sink ancestors over `view`.
    pub fn new(view: &'v G, sink: NodeId, node_cap: usize) -> Result<Self> {
        let none = FxHashSet::default();
        let block = DistanceOracle::compute(view, sink, DistanceKind::Block, &none)?;
        let instr = DistanceOracle::compute(view, sink, DistanceKind::Instruction, &none)?;
        let intersector = Intersector::new(view, sink, node_cap);
        Ok(Self {
            view,
            block,
            instr,
            intersector,
        })
    }

    /// Metrics of one call site.
    pub fn site_metrics(&self, site: u64) -> Result<MetricRecord> {
        let node = NodeId::Addr(site);
        if !self.view.contains(node) {
            return Err(EvalError::UnknownSite(site));
        }
        let block = self.block.distance(node);
        let mccabe = if self.view.successors(node).any(|succ| succ == NodeId::AnyHub) {
            Some(self.intersector.any_complexity())
        } else if block.is_finite() {
            Some(mccabe(self.view, &self.intersector.subgraph(node)))
        } else {
            None
        };
        Ok(MetricRecord::new(
            site,
            block,
            self.instr.distance(node),
            mccabe,
        ))
    }

    /// Metrics of every site on a dedicated pool, sorted by site.
    ///
    /// `on_done` runs once per finished site, from worker threads. The first
    /// error aborts the run.
    pub fn compute<F>(&self, sites: &[u64], max_workers: usize, on_done: F) -> Result<Vec<MetricRecord>>
    where
        F: Fn(&MetricRecord) + Sync,
    {
        let workers = worker_count(sites.len(), max_workers);
        let _span = info_span!("metrics", sites = sites.len(), workers).entered();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("oag-metric-{i}"))
            .build()?;

        let mut records = pool.install(|| {
            sites
                .par_iter()
                .map(|&site| {
                    let record = self.site_metrics(site)?;
                    on_done(&record);
                    Ok(record)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        records.sort_unstable_by_key(|record| record.site);
        Ok(records)
    }

    pub const fn distance(&self, kind: DistanceKind) -> &DistanceOracle {
        match kind {
            DistanceKind::Block => &self.block,
            DistanceKind::Instruction => &self.instr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oag_graph::{Block, Cfg, EdgeAttrs, Overlay, TransferKind};

    fn jump() -> EdgeAttrs {
        EdgeAttrs::new(TransferKind::JumpDirect)
    }

    /// 1 -> 2, 1 -> 3, 2 -> 4, 3 -> 4, 4 -> 1 (gate 4), plus an unreachable call site 9.
    fn diamond() -> Cfg {
        let mut cfg = Cfg::new();
        for addr in 1..=4 {
            let mut block = Block::new(4, 2);
            if addr == 4 {
                block = block.with_terminator(TransferKind::Syscall);
            }
            cfg.add_block(addr, block);
        }
        cfg.add_block(9, Block::new(4, 1).with_terminator(TransferKind::CallIndirect));
        for (from, to) in [(1, 2), (1, 3), (2, 4), (3, 4), (4, 1)] {
            cfg.add_edge(from, to, jump()).unwrap();
        }
        cfg
    }

    fn set(nodes: &[NodeId]) -> FxHashSet<NodeId> {
        nodes.iter().copied().collect()
    }

    #[test]
    fn test_mccabe_plain() {
        let cfg = diamond();
        let nodes = set(&[1, 2, 3, 4].map(NodeId::Addr));
        assert_eq!(mccabe(&cfg, &nodes), 5 - 4 + 2);
    }

    #[test]
    fn test_mccabe_hub() {
        let mut cfg = diamond();
        cfg.attach_sink().unwrap();
        let hub = NodeId::AnyHub;
        let overlay = Overlay::new(
            &cfg,
            [
                (NodeId::Addr(9), hub),
                (NodeId::Addr(1), hub),
                (hub, NodeId::Addr(2)),
                (hub, NodeId::Addr(3)),
                (hub, NodeId::Addr(4)),
            ],
        )
        .unwrap();
        let nodes = set(&[NodeId::Addr(1), NodeId::Addr(9), hub, NodeId::Addr(2)]);
        // Edges 1->2, 9->any, 1->any, any->2: 4 - 4 + 2 = 2.
        // Hub with in 2, out 1: -1 - 2 + 1 + 2 = 0.
        assert_eq!(mccabe(&overlay, &nodes), 2);
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(0, 8), 1);
        assert_eq!(worker_count(19, 8), 1);
        assert_eq!(worker_count(10_000, 1), 1);
        assert!(worker_count(10_000, 64) <= num_cpus::get());
    }

    #[test]
    fn test_site_metrics() {
        let mut cfg = diamond();
        cfg.attach_sink().unwrap();
        let engine = MetricEngine::new(&cfg, NodeId::Sink, DESCENDANT_NODE_CAP).unwrap();
        let records = engine.compute(&[9, 1], 4, |_| {}).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.site, 1);
        assert_eq!(first.block_distance, Distance::Finite(2));
        assert_eq!(first.instr_distance, Distance::Finite(4));
        // 1,2,3,4,target with 6 edges: 6 - 5 + 2.
        assert_eq!(first.mccabe, Some(3));
        assert!((first.block_dist_div_mccabe - 2.0 / 3.0).abs() < 1e-12);
        assert!((first.instr_dist_div_log_mccabe - 4.0 / 4f64.ln()).abs() < 1e-12);

        let unreachable = &records[1];
        assert_eq!(unreachable.site, 9);
        assert_eq!(unreachable.block_distance, Distance::Infinite);
        assert_eq!(unreachable.mccabe, None);
        assert!(unreachable.block_dist_div_mccabe.is_infinite());

        assert!(matches!(
            engine.site_metrics(0x77),
            Err(EvalError::UnknownSite(0x77))
        ));
    }

    #[test]
    fn test_any_uses_all_ancestors() {
        let mut cfg = diamond();
        cfg.attach_sink().unwrap();
        let overlay = Overlay::new(
            &cfg,
            [
                (NodeId::Addr(9), NodeId::AnyHub),
                (NodeId::AnyHub, NodeId::Addr(1)),
                (NodeId::AnyHub, NodeId::Addr(2)),
            ],
        )
        .unwrap();
        let engine = MetricEngine::new(&overlay, NodeId::Sink, DESCENDANT_NODE_CAP).unwrap();
        let record = engine.site_metrics(9).unwrap();
        let all = engine.intersector.ancestors().clone();
        assert!(all.contains(&NodeId::AnyHub));
        assert_eq!(record.mccabe, Some(mccabe(&overlay, &all)));
        assert_eq!(record.block_distance, Distance::Finite(2));
    }
}
