//! Precision and soundness aggregates over call-site populations.
//!
//! - fAIR: mean over sites of `1 - |succ| / total`
//! - fAIA: mean `|succ|`
//! - iCTR: sum of `|succ|`
//! - QS: weak components of the caller/callee graph over the size of the
//!   largest component's target set

use std::collections::VecDeque;

use oag_graph::{Cfg, GraphView, NodeId, TransferKind};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Targets an indirect call site may reach under a policy view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Permitted {
    /// The site reaches the `any` hub.
    Everything,
    Targets(FxHashSet<NodeId>),
}

impl Permitted {
    /// Number of targets; `Everything` counts as the whole program.
    pub fn count(&self, total: usize) -> usize {
        match self {
            Self::Everything => total,
            Self::Targets(targets) => targets.len(),
        }
    }
}

/// Policy targets plus non-fallthrough ground-truth successors of `site`, with
/// virtual hubs expanded to their members.
pub fn permitted_successors<G: GraphView>(view: &G, site: NodeId) -> Permitted {
    let mut targets = FxHashSet::default();
    for succ in view.successors(site) {
        match succ {
            NodeId::AnyHub => return Permitted::Everything,
            NodeId::Virtual(_) => targets.extend(view.successors(succ)),
            _ if view.edge_kind(site, succ) == Some(TransferKind::Follow) => {}
            _ => {
                targets.insert(succ);
            }
        }
    }
    Permitted::Targets(targets)
}

/// Indirect call sites of `binary` (all binaries when `None`), sorted.
pub fn indirect_sites(cfg: &Cfg, binary: Option<&str>) -> Vec<u64> {
    cfg.indirect_call_sites()
        .into_iter()
        .filter(|&site| {
            binary.is_none_or(|name| {
                cfg.block(site)
                    .is_some_and(|block| block.binary.as_ref() == name)
            })
        })
        .collect()
}

/// Sites with at least one observed, non-fallthrough successor.
pub fn observed_sites(cfg: &Cfg, sites: &[u64]) -> Vec<u64> {
    sites
        .iter()
        .copied()
        .filter(|&site| {
            cfg.out_edges(NodeId::Addr(site))
                .any(|(_, attrs)| attrs.kind != TransferKind::Follow)
        })
        .collect()
}

/// Aggregates of one population. Metrics are `None` for an empty population.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PrecisionReport {
    pub sites: usize,
    pub fair: Option<f64>,
    pub faia: Option<f64>,
    pub ictr: Option<u64>,
    pub qs: Option<f64>,
}

/// Aggregates over all main-binary call sites and over the observed ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregateReport {
    pub all: PrecisionReport,
    /// Sites with ground-truth indirect targets.
    pub observed: PrecisionReport,
}

/// Aggregate a policy view over the two standard populations.
pub fn aggregate<G: GraphView>(
    view: &G,
    base: &Cfg,
    main_binary: Option<&str>,
    total: usize,
) -> AggregateReport {
    let all = indirect_sites(base, main_binary);
    let observed = observed_sites(base, &all);
    debug!(all = all.len(), observed = observed.len(), "populations selected");

    let permitted: FxHashMap<u64, Permitted> = all
        .iter()
        .map(|&site| (site, permitted_successors(view, NodeId::Addr(site))))
        .collect();

    AggregateReport {
        all: report(view, &all, &permitted, total),
        observed: report(view, &observed, &permitted, total),
    }
}

fn report<G: GraphView>(
    view: &G,
    sites: &[u64],
    permitted: &FxHashMap<u64, Permitted>,
    total: usize,
) -> PrecisionReport {
    let counts: Vec<usize> = sites
        .iter()
        .map(|site| permitted.get(site).map_or(0, |p| p.count(total)))
        .collect();
    PrecisionReport {
        sites: sites.len(),
        fair: fair(&counts, total),
        faia: faia(&counts),
        ictr: ictr(&counts),
        qs: quotient_space(view, sites, permitted, total),
    }
}

/// Mean of `1 - count / total`.
#[allow(clippy::cast_precision_loss)]
pub fn fair(counts: &[usize], total: usize) -> Option<f64> {
    if counts.is_empty() || total == 0 {
        return None;
    }
    let sum: f64 = counts
        .iter()
        .map(|&n| 1.0 - n as f64 / total as f64)
        .sum();
    Some(sum / counts.len() as f64)
}

/// Mean target count.
#[allow(clippy::cast_precision_loss)]
pub fn faia(counts: &[usize]) -> Option<f64> {
    if counts.is_empty() {
        return None;
    }
    Some(counts.iter().sum::<usize>() as f64 / counts.len() as f64)
}

/// Total target count.
pub fn ictr(counts: &[usize]) -> Option<u64> {
    if counts.is_empty() {
        return None;
    }
    Some(counts.iter().map(|&n| n as u64).sum())
}

/// Weak components of the caller/callee graph over the largest component's
/// target count. Callees are the sites' direct successors, hubs unexpanded.
#[allow(clippy::cast_precision_loss)]
pub fn quotient_space<G: GraphView>(
    view: &G,
    sites: &[u64],
    permitted: &FxHashMap<u64, Permitted>,
    total: usize,
) -> Option<f64> {
    let mut callees_of: FxHashMap<u64, Vec<NodeId>> = FxHashMap::default();
    let mut callers_of: FxHashMap<NodeId, Vec<u64>> = FxHashMap::default();
    for &site in sites {
        let caller = NodeId::Addr(site);
        for succ in view.successors(caller) {
            if view.edge_kind(caller, succ) == Some(TransferKind::Follow) {
                continue;
            }
            callees_of.entry(site).or_default().push(succ);
            callers_of.entry(succ).or_default().push(site);
        }
    }

    let mut components = 0usize;
    let mut largest = 0usize;
    let mut seen: FxHashSet<u64> = FxHashSet::default();
    let mut callers: Vec<u64> = callees_of.keys().copied().collect();
    callers.sort_unstable();

    for start in callers {
        if !seen.insert(start) {
            continue;
        }
        components += 1;

        let mut reaches_any = false;
        let mut targets: FxHashSet<NodeId> = FxHashSet::default();
        let mut visited_callees: FxHashSet<NodeId> = FxHashSet::default();
        let mut queue = VecDeque::from([start]);
        while let Some(caller) = queue.pop_front() {
            match permitted.get(&caller) {
                Some(Permitted::Everything) => reaches_any = true,
                Some(Permitted::Targets(t)) => targets.extend(t.iter().copied()),
                None => {}
            }
            for &callee in callees_of.get(&caller).into_iter().flatten() {
                if callee == NodeId::AnyHub {
                    reaches_any = true;
                }
                if !visited_callees.insert(callee) {
                    continue;
                }
                for &other in callers_of.get(&callee).into_iter().flatten() {
                    if seen.insert(other) {
                        queue.push_back(other);
                    }
                }
            }
        }
        let size = if reaches_any { total } else { targets.len() };
        largest = largest.max(size);
    }

    (components > 0 && largest > 0).then(|| components as f64 / largest as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oag_graph::{Block, EdgeAttrs, HubLabel, Overlay};

    fn call(binary: &str) -> Block {
        Block::new(4, 1)
            .with_terminator(TransferKind::CallIndirect)
            .with_binary(binary.into())
    }

    /// Sites 0x10, 0x20 (main), 0x30 (libc); functions 0x100..=0x300.
    fn program() -> Cfg {
        let mut cfg = Cfg::new();
        cfg.add_block(0x10, call("main"));
        cfg.add_block(0x20, call("main"));
        cfg.add_block(0x30, call("libc"));
        cfg.add_block(0x11, Block::new(4, 1));
        for addr in [0x100, 0x200, 0x300] {
            cfg.add_block(addr, Block::new(4, 1));
        }
        cfg.add_edge(0x10, 0x100, EdgeAttrs::new(TransferKind::CallIndirect))
            .unwrap();
        cfg.add_edge(0x10, 0x11, EdgeAttrs::new(TransferKind::Follow))
            .unwrap();
        cfg
    }

    #[test]
    fn test_fair_example() {
        let got = fair(&[10, 20], 1000).unwrap();
        assert!((got - 0.985).abs() < 1e-12);
        assert_eq!(fair(&[], 1000), None);
        assert_eq!(faia(&[10, 20]), Some(15.0));
        assert_eq!(ictr(&[10, 20]), Some(30));
        assert_eq!(ictr(&[]), None);
    }

    #[test]
    fn test_permitted_successors() {
        let cfg = program();
        let hub = NodeId::Virtual(HubLabel::Functions);
        let overlay = Overlay::new(
            &cfg,
            [
                (NodeId::Addr(0x10), hub),
                (hub, NodeId::Addr(0x200)),
                (hub, NodeId::Addr(0x300)),
                (NodeId::Addr(0x20), NodeId::AnyHub),
                (NodeId::AnyHub, NodeId::Addr(0x100)),
            ],
        )
        .unwrap();

        let expected: FxHashSet<NodeId> = [0x100, 0x200, 0x300]
            .into_iter()
            .map(NodeId::Addr)
            .collect();
        assert_eq!(
            permitted_successors(&overlay, NodeId::Addr(0x10)),
            Permitted::Targets(expected)
        );
        assert_eq!(
            permitted_successors(&overlay, NodeId::Addr(0x20)),
            Permitted::Everything
        );
        assert_eq!(Permitted::Everything.count(7), 7);
    }

    #[test]
    fn test_populations() {
        let cfg = program();
        assert_eq!(indirect_sites(&cfg, Some("main")), vec![0x10, 0x20]);
        assert_eq!(indirect_sites(&cfg, None), vec![0x10, 0x20, 0x30]);
        assert_eq!(observed_sites(&cfg, &[0x10, 0x20]), vec![0x10]);
    }

    #[test]
    fn test_aggregate_baseline() {
        let cfg = program();
        let report = aggregate(&cfg, &cfg, Some("main"), 100);
        assert_eq!(report.all.sites, 2);
        assert_eq!(report.observed.sites, 1);
        assert_eq!(report.all.ictr, Some(1));
        assert_eq!(report.observed.faia, Some(1.0));
        // One component {0x10 -> 0x100} with one target.
        assert_eq!(report.all.qs, Some(1.0));
        assert!((report.observed.fair.unwrap() - 0.99).abs() < 1e-12);
    }

    #[test]
    fn test_quotient_space_merges_shared_callees() {
        let cfg = program();
        let overlay = Overlay::new(
            &cfg,
            [
                (NodeId::Addr(0x20), NodeId::Addr(0x100)),
                (NodeId::Addr(0x30), NodeId::Addr(0x300)),
            ],
        )
        .unwrap();
        let report = aggregate(&overlay, &cfg, None, 100);
        // {0x10, 0x20} share 0x100; {0x30} alone. Largest target set has 1 node.
        assert_eq!(report.all.qs, Some(2.0));

        let empty = aggregate(&cfg, &cfg, Some("missing"), 100);
        assert_eq!(empty.all, PrecisionReport::default());
    }
}
