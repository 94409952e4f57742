//! Evaluation pipeline - merged CFG → policy edges → metrics and aggregates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;

use oag_eval::{AggregateReport, MetricEngine, MetricRecord, aggregate};
use oag_graph::reach::{PathVerdict, ancestors, ancestors_excluding, filter_paths_bfs};
use oag_graph::{Cfg, GraphView, NodeId, Overlay};
use oag_policy::{
    CallSiteSignatures, EdgeSet, Policy, PolicyCache, PolicyError, PolicyInputs, SignatureTable,
};
use rustc_hash::FxHashSet;
use tracing::{error, info, info_span, warn};

use crate::io::{
    LoadedCfg, MetricEntry, OutEdgeProps, PathsReport, load_cfg, write_edges_csv,
};
use crate::{EvalConfig, Error, Result};

/// Provenance and kind recorded for policy edges.
const POLICY_EDGE_TAG: &str = "oa";

/// A loaded program with its sink attached, plus the optional tables.
#[derive(Debug)]
pub struct Session {
    cfg: Cfg,
    functions: BTreeMap<u64, String>,
    signatures: Option<SignatureTable>,
    call_site_signatures: Option<CallSiteSignatures>,
    config: EvalConfig,
}

/// Outcome of a `generate` run.
#[derive(Debug, Default)]
pub struct GenerateReport {
    /// Policy, output file, edge count.
    pub written: Vec<(Policy, PathBuf, usize)>,
    /// Policies that could not be generated, e.g. for lack of a table.
    pub failed: Vec<(Policy, PolicyError)>,
}

impl Session {
    /// Load a merged CFG and attach the sink.
    pub fn load(path: &Path, config: EvalConfig) -> Result<Self> {
        Self::new(load_cfg(path)?, config)
    }

    pub fn new(loaded: LoadedCfg, config: EvalConfig) -> Result<Self> {
        let LoadedCfg { mut cfg, functions } = loaded;
        let gates = cfg.attach_sink()?;
        if gates == 0 {
            warn!("no syscall blocks: every distance is infinite");
        }
        Ok(Self {
            cfg,
            functions,
            signatures: None,
            call_site_signatures: None,
            config,
        })
    }

    #[must_use]
    pub fn with_signatures(mut self, table: SignatureTable) -> Self {
        self.signatures = Some(table);
        self
    }

    #[must_use]
    pub fn with_call_site_signatures(mut self, table: CallSiteSignatures) -> Self {
        self.call_site_signatures = Some(table);
        self
    }

    pub const fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub const fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub const fn functions(&self) -> &BTreeMap<u64, String> {
        &self.functions
    }

    /// Program size for fAIR and `any`.
    pub fn total_size(&self) -> usize {
        self.config
            .total_size
            .unwrap_or_else(|| self.cfg.block_count())
    }

    fn policy_inputs(&self) -> Result<PolicyInputs<'_>> {
        let mut inputs = PolicyInputs::new(&self.cfg, self.functions.keys().copied())?;
        if let Some(table) = &self.signatures {
            inputs = inputs.with_signatures(table.clone());
        }
        if let Some(table) = &self.call_site_signatures {
            inputs = inputs.with_call_site_signatures(table.clone());
        }
        Ok(inputs)
    }

    /// Generate `policies` and write each edge set to `<out_dir>/<policy>.csv`.
    ///
    /// A policy missing one of its tables is reported in
    /// [`GenerateReport::failed`]; any other error aborts the run.
    pub fn generate(&self, policies: &[Policy], out_dir: &Path) -> Result<GenerateReport> {
        let _span = info_span!("generate", policies = policies.len()).entered();
        let inputs = self.policy_inputs()?;
        let mut cache = PolicyCache::new(&inputs);
        let mut report = GenerateReport::default();

        let mut requested: Vec<Policy> = policies.to_vec();
        requested.sort_unstable();
        requested.dedup();

        let mut ready = Vec::new();
        for policy in requested {
            match cache.edges(policy) {
                Ok(_) => ready.push(policy),
                Err(err @ PolicyError::MissingTable { .. }) => {
                    error!(%policy, error = %err, "policy skipped");
                    report.failed.push((policy, err));
                }
                Err(err) => return Err(err.into()),
            }
        }
        cache.diagnostics().report();

        let mut resolved: Vec<(Policy, EdgeSet)> = Vec::with_capacity(ready.len());
        for policy in ready {
            resolved.push((policy, cache.take(policy)?));
        }

        std::fs::create_dir_all(out_dir)?;
        report.written = write_policies(&resolved, out_dir)?;
        Ok(report)
    }

    /// Base graph plus `edges`.
    pub fn overlay<I>(&self, edges: I) -> Result<Overlay<'_>>
    where
        I: IntoIterator<Item = (NodeId, NodeId)>,
    {
        Ok(Overlay::new(&self.cfg, edges)?)
    }

    /// Per-site metrics of every indirect call site under `view`.
    pub fn metrics<F>(&self, view: &Overlay<'_>, on_done: F) -> Result<Vec<MetricEntry>>
    where
        F: Fn(&MetricRecord) + Sync,
    {
        let sites = self.cfg.indirect_call_sites();
        let engine = MetricEngine::new(view, NodeId::Sink, self.config.node_cap)?;
        let records = engine.compute(&sites, self.config.max_workers, on_done)?;

        Ok(records
            .iter()
            .map(|record| {
                let binary = self
                    .cfg
                    .block(record.site)
                    .map_or("", |block| block.binary.as_ref());
                MetricEntry::new(record, binary, out_edge_props(view, record.site))
            })
            .collect())
    }

    /// Precision aggregates of `view` over the main-binary populations.
    pub fn aggregate(&self, view: &Overlay<'_>) -> AggregateReport {
        let _span = info_span!("aggregate").entered();
        let report = aggregate::aggregate(
            view,
            &self.cfg,
            self.config.main_binary.as_deref(),
            self.total_size(),
        );
        info!(
            sites = report.all.sites,
            observed = report.observed.sites,
            "aggregates computed"
        );
        report
    }

    /// Sink ancestors once every path from an `avoid` block to the sink,
    /// within `depth` extensions, is forbidden.
    pub fn paths(&self, avoid: &FxHashSet<u64>, depth: Option<usize>) -> PathsReport {
        let _span = info_span!("paths", avoid = avoid.len()).entered();
        let forbidden = filter_paths_bfs(
            &self.cfg,
            NodeId::Sink,
            |path| match path[0] {
                NodeId::Addr(addr) if avoid.contains(&addr) => PathVerdict::Accept,
                _ => PathVerdict::Continue,
            },
            depth,
        );
        let pruned = ancestors_excluding(&self.cfg, NodeId::Sink, &forbidden);
        let naive = ancestors(&self.cfg, NodeId::Sink);

        let mut excluded: Vec<NodeId> = naive.difference(&pruned).copied().collect();
        excluded.sort_unstable();
        PathsReport {
            forbidden_paths: forbidden.len(),
            ancestors: pruned.len(),
            naive_ancestors: naive.len(),
            excluded: excluded.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Summarize the outgoing edges of `site`; policy edges are tagged `oa`.
pub fn out_edge_props(view: &Overlay<'_>, site: u64) -> OutEdgeProps {
    let node = NodeId::Addr(site);
    let mut hows = Vec::new();
    let mut types = Vec::new();
    for succ in view.successors(node) {
        match view.base().edge(node, succ) {
            Some(attrs) => {
                hows.extend(attrs.how.iter().cloned());
                types.push(attrs.kind.as_str().to_string());
            }
            None => {
                hows.push(POLICY_EDGE_TAG.to_string());
                types.push(POLICY_EDGE_TAG.to_string());
            }
        }
    }
    for list in [&mut hows, &mut types] {
        list.sort_unstable();
        list.dedup();
    }
    OutEdgeProps { hows, types }
}

/// Write every edge set on its own scoped thread.
fn write_policies(
    resolved: &[(Policy, EdgeSet)],
    out_dir: &Path,
) -> Result<Vec<(Policy, PathBuf, usize)>> {
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(resolved.len());
        for (policy, edges) in resolved {
            let path = out_dir.join(format!("{policy}.csv"));
            let target = path.clone();
            let handle = thread::Builder::new()
                .name(format!("oag-write-{policy}"))
                .spawn_scoped(scope, move || write_edges_csv(&target, edges))?;
            handles.push((*policy, path, handle));
        }

        let mut written = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for (policy, path, handle) in handles {
            match handle.join() {
                Ok(Ok(count)) => {
                    info!(%policy, edges = count, path = %path.display(), "edges written");
                    written.push((policy, path, count));
                }
                Ok(Err(err)) => {
                    error!(%policy, error = %err, "writing edges failed");
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    first_error.get_or_insert(Error::WriterPanicked(policy));
                }
            }
        }
        first_error.map_or(Ok(written), Err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{parse_cfg, read_edges_csv};

    /// main: 0x10 calls 0x100 indirectly, falls through to 0x14; 0x100 and
    /// 0x200 are functions, 0x200 makes the syscall.
    const PROGRAM: &str = r#"{
        "blocks": {
            "0x10": {"addr": "0x10", "size": 4, "instr_sizes": [4], "fn_addrs": ["0x10"],
                     "end_insn_indir": "call_indirect", "binary_basename": "main",
                     "out_edges": [{"to": "0x100", "type": "call_indirect", "how": ["cfggrind"]},
                                   {"to": "0x14", "type": "follow", "how": ["angr"]}]},
            "0x14": {"addr": "0x14", "size": 4, "instr_sizes": [4], "fn_addrs": ["0x10"],
                     "end_insn_indir": "jump_direct", "binary_basename": "main",
                     "out_edges": [{"to": "0x200", "type": "jump_direct", "how": ["angr"]}]},
            "0x100": {"addr": "0x100", "size": 4, "instr_sizes": [4], "fn_addrs": ["0x100"],
                      "end_insn_indir": "ret", "binary_basename": "main", "out_edges": []},
            "0x200": {"addr": "0x200", "size": 8, "instr_sizes": [4, 4], "fn_addrs": ["0x200"],
                      "end_insn_indir": "syscall", "binary_basename": "main", "out_edges": []}
        },
        "functions": {"0x10": "main", "0x100": "handler", "0x200": "do_write"}
    }"#;

    fn session() -> Session {
        Session::new(parse_cfg(PROGRAM).unwrap(), EvalConfig::new().with_max_workers(2)).unwrap()
    }

    #[test]
    fn test_generate_writes_and_skips() {
        let session = session();
        let dir = tempfile::tempdir().unwrap();
        let report = session
            .generate(&[Policy::NoCfi, Policy::TypeCfi, Policy::Baseline], dir.path())
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.failed[0],
            (Policy::TypeCfi, PolicyError::MissingTable { .. })
        ));
        let counts: Vec<(Policy, usize)> = report
            .written
            .iter()
            .map(|(policy, _, count)| (*policy, *count))
            .collect();
        // no_cfi: site -> any, any -> every block but the sink (ground truth dropped).
        assert!(counts.contains(&(Policy::Baseline, 0)));
        assert!(counts.iter().any(|&(policy, n)| policy == Policy::NoCfi && n > 0));

        let edges = read_edges_csv(&dir.path().join("no_cfi.csv")).unwrap();
        assert!(edges.contains(&(NodeId::Addr(0x10), NodeId::AnyHub)));
        assert!(!edges.iter().any(|&(_, to)| to == NodeId::Sink));
    }

    #[test]
    fn test_metrics_and_aggregate_on_baseline() {
        let session = session();
        let view = session.overlay(std::iter::empty()).unwrap();
        let entries = session.metrics(&view, |_| {}).unwrap();
        assert_eq!(entries.len(), 1);

        let props = out_edge_props(&view, 0x10);
        assert_eq!(props.types, ["call_indirect", "follow"]);
        assert_eq!(props.hows, ["angr", "cfggrind"]);

        let report = session.aggregate(&view);
        assert_eq!(report.all.sites, 1);
        assert_eq!(report.observed.ictr, Some(1));
    }

    #[test]
    fn test_policy_edges_tagged() {
        let session = session();
        let view = session
            .overlay([(NodeId::Addr(0x10), NodeId::Addr(0x200))])
            .unwrap();
        let props = out_edge_props(&view, 0x10);
        assert!(props.types.contains(&"oa".to_string()));

        let report = session.aggregate(&view);
        assert_eq!(report.all.faia, Some(2.0));
    }

    #[test]
    fn test_paths_excludes_avoided_routes() {
        let session = session();
        let none = session.paths(&FxHashSet::default(), None);
        assert_eq!(none.forbidden_paths, 0);
        assert_eq!(none.ancestors, none.naive_ancestors);

        // Forbid 0x10 -> 0x14 -> 0x200 -> target, the only route from 0x10.
        let avoid: FxHashSet<u64> = [0x10].into_iter().collect();
        let report = session.paths(&avoid, None);
        assert_eq!(report.forbidden_paths, 1);
        assert_eq!(report.excluded, ["0x10"]);
    }
}
