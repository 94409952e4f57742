//! Single-sink shortest distances.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace_span};

use crate::{GraphError, GraphView, NodeId, Result};

/// Distance to the sink. `Infinite` sorts after every finite value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Distance {
    Finite(u64),
    Infinite,
}

impl Distance {
    pub const ZERO: Self = Self::Finite(0);

    pub const fn is_finite(self) -> bool {
        matches!(self, Self::Finite(_))
    }

    pub const fn finite(self) -> Option<u64> {
        match self {
            Self::Finite(d) => Some(d),
            Self::Infinite => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(self) -> f64 {
        match self {
            Self::Finite(d) => d as f64,
            Self::Infinite => f64::INFINITY,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(d) => write!(f, "{d}"),
            Self::Infinite => f.write_str("inf"),
        }
    }
}

/// Edge weighting used for distances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DistanceKind {
    /// One per edge.
    Block,
    /// Instruction count of the destination block.
    Instruction,
}

impl DistanceKind {
    /// Weight of any edge into `dest`. Edges into the sink or a hub are free.
    pub fn weight<G: GraphView>(self, view: &G, dest: NodeId) -> u64 {
        if dest.is_sink() || dest.is_hub() {
            return 0;
        }
        match self {
            Self::Block => 1,
            Self::Instruction => view.instr_count(dest),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Instruction => "instr",
        }
    }
}

/// Distances of every node to the sink, plus function entries binned by distance.
#[derive(Clone, Debug)]
pub struct DistanceOracle {
    kind: DistanceKind,
    distances: FxHashMap<NodeId, u64>,
    /// Distance -> sorted function entries at exactly that distance.
    bins: BTreeMap<Distance, Vec<u64>>,
}

impl DistanceOracle {
    /// Backward Dijkstra from `sink` over `view`.
    pub fn compute<G: GraphView>(
        view: &G,
        sink: NodeId,
        kind: DistanceKind,
        entries: &FxHashSet<u64>,
    ) -> Result<Self> {
        if !view.contains(sink) {
            return Err(GraphError::MissingNode(sink));
        }
        let _span = trace_span!("distances", kind = kind.as_str()).entered();

        let mut distances: FxHashMap<NodeId, u64> = FxHashMap::default();
        let mut heap = BinaryHeap::new();
        distances.insert(sink, 0);
        heap.push(Reverse((0, sink)));

        while let Some(Reverse((dist, node))) = heap.pop() {
            if distances.get(&node).is_some_and(|&best| dist > best) {
                continue;
            }
            let weight = kind.weight(view, node);
            let next = dist.saturating_add(weight);
            for pred in view.predecessors(node) {
                let better = distances.get(&pred).is_none_or(|&best| next < best);
                if better {
                    distances.insert(pred, next);
                    heap.push(Reverse((next, pred)));
                }
            }
        }

        let mut bins: BTreeMap<Distance, Vec<u64>> = BTreeMap::new();
        for &entry in entries {
            let dist = distances
                .get(&NodeId::Addr(entry))
                .map_or(Distance::Infinite, |&d| Distance::Finite(d));
            bins.entry(dist).or_default().push(entry);
        }
        for members in bins.values_mut() {
            members.sort_unstable();
        }

        debug!(
            kind = kind.as_str(),
            reachable = distances.len(),
            bins = bins.len(),
            "distances computed"
        );
        Ok(Self {
            kind,
            distances,
            bins,
        })
    }

    pub const fn kind(&self) -> DistanceKind {
        self.kind
    }

    pub fn distance(&self, node: NodeId) -> Distance {
        self.distances
            .get(&node)
            .map_or(Distance::Infinite, |&d| Distance::Finite(d))
    }

    pub const fn bins(&self) -> &BTreeMap<Distance, Vec<u64>> {
        &self.bins
    }

    /// Bins at distance `min` or farther, nearest first.
    pub fn bins_at_least(&self, min: Distance) -> impl Iterator<Item = (Distance, &[u64])> + '_ {
        self.bins
            .range(min..)
            .map(|(&d, members)| (d, members.as_slice()))
    }

    /// Function entries at distance `min` or farther.
    pub fn entries_at_least(&self, min: Distance) -> impl Iterator<Item = u64> + '_ {
        self.bins_at_least(min)
            .flat_map(|(_, members)| members.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, Cfg, EdgeAttrs, TransferKind};

    /// 1 -> 2 -> 3(syscall) -> target, 4 isolated, 1 -> 3 shortcut.
    fn graph() -> Cfg {
        let mut cfg = Cfg::new();
        cfg.add_block(1, Block::new(4, 2));
        cfg.add_block(2, Block::new(4, 10));
        cfg.add_block(3, Block::new(4, 3).with_terminator(TransferKind::Syscall));
        cfg.add_block(4, Block::new(4, 1));
        for (from, to) in [(1, 2), (2, 3), (1, 3)] {
            cfg.add_edge(from, to, EdgeAttrs::new(TransferKind::JumpDirect))
                .unwrap();
        }
        cfg.attach_sink().unwrap();
        cfg
    }

    fn entries(addrs: &[u64]) -> FxHashSet<u64> {
        addrs.iter().copied().collect()
    }

    #[test]
    fn test_block_distance() {
        let cfg = graph();
        let oracle =
            DistanceOracle::compute(&cfg, NodeId::Sink, DistanceKind::Block, &entries(&[1, 4]))
                .unwrap();
        assert_eq!(oracle.distance(NodeId::Sink), Distance::ZERO);
        assert_eq!(oracle.distance(NodeId::Addr(3)), Distance::Finite(0));
        assert_eq!(oracle.distance(NodeId::Addr(2)), Distance::Finite(1));
        assert_eq!(oracle.distance(NodeId::Addr(1)), Distance::Finite(1));
        assert_eq!(oracle.distance(NodeId::Addr(4)), Distance::Infinite);
    }

    #[test]
    fn test_instruction_distance() {
        let cfg = graph();
        let oracle = DistanceOracle::compute(
            &cfg,
            NodeId::Sink,
            DistanceKind::Instruction,
            &FxHashSet::default(),
        )
        .unwrap();
        assert_eq!(oracle.distance(NodeId::Addr(3)), Distance::Finite(0));
        assert_eq!(oracle.distance(NodeId::Addr(2)), Distance::Finite(3));
        // Direct edge to 3 beats the detour through 2.
        assert_eq!(oracle.distance(NodeId::Addr(1)), Distance::Finite(3));
    }

    #[test]
    fn test_monotone_along_edges() {
        let cfg = graph();
        for kind in [DistanceKind::Block, DistanceKind::Instruction] {
            let oracle =
                DistanceOracle::compute(&cfg, NodeId::Sink, kind, &FxHashSet::default()).unwrap();
            for node in cfg.nodes() {
                for succ in cfg.successors(node) {
                    let (Distance::Finite(d), Distance::Finite(s)) =
                        (oracle.distance(node), oracle.distance(succ))
                    else {
                        continue;
                    };
                    assert!(d <= s + kind.weight(&cfg, succ));
                }
            }
        }
    }

    #[test]
    fn test_bins() {
        let cfg = graph();
        let oracle = DistanceOracle::compute(
            &cfg,
            NodeId::Sink,
            DistanceKind::Block,
            &entries(&[4, 2, 1, 3]),
        )
        .unwrap();
        let bins: Vec<_> = oracle
            .bins()
            .iter()
            .map(|(d, m)| (*d, m.clone()))
            .collect();
        assert_eq!(
            bins,
            vec![
                (Distance::Finite(0), vec![3]),
                (Distance::Finite(1), vec![1, 2]),
                (Distance::Infinite, vec![4]),
            ]
        );
        assert_eq!(
            oracle
                .entries_at_least(Distance::Finite(1))
                .collect::<Vec<_>>(),
            vec![1, 2, 4]
        );
        assert_eq!(
            oracle
                .entries_at_least(Distance::Infinite)
                .collect::<Vec<_>>(),
            vec![4]
        );
    }

    #[test]
    fn test_missing_sink() {
        let mut cfg = Cfg::new();
        cfg.add_block(1, Block::new(4, 1));
        let err = DistanceOracle::compute(
            &cfg,
            NodeId::Sink,
            DistanceKind::Block,
            &FxHashSet::default(),
        )
        .unwrap_err();
        assert_eq!(err, GraphError::MissingNode(NodeId::Sink));
    }
}
