//! Shared, precomputed inputs of every policy generator.

use oag_graph::{
    Cfg, DistanceKind, DistanceOracle, GraphError, GraphView, NodeId, TransferKind,
};
use rustc_hash::FxHashSet;
use tracing::{debug, info_span};

use crate::{CallSiteSignatures, Result, SignatureTable};

/// Graph-derived facts plus the optional signature tables.
#[derive(Debug)]
pub struct PolicyInputs<'g> {
    cfg: &'g Cfg,
    functions: FxHashSet<u64>,
    call_sites: Vec<u64>,
    block_distance: DistanceOracle,
    instr_distance: DistanceOracle,
    signatures: Option<SignatureTable>,
    call_site_signatures: Option<CallSiteSignatures>,
}

impl<'g> PolicyInputs<'g> {
    /// Precompute call sites, function entries and both distance oracles.
    ///
    /// `functions` is the function table; entries absent from the graph are
    /// dropped. The sink must already be attached.
    pub fn new<I>(cfg: &'g Cfg, functions: I) -> Result<Self>
    where
        I: IntoIterator<Item = u64>,
    {
        if !cfg.has_sink() {
            return Err(GraphError::SinkNotAttached("computing policy inputs").into());
        }
        let _span = info_span!("policy_inputs").entered();

        let functions: FxHashSet<u64> = functions
            .into_iter()
            .filter(|&addr| cfg.contains(NodeId::Addr(addr)))
            .collect();
        let call_sites = cfg.indirect_call_sites();

        let block_distance =
            DistanceOracle::compute(cfg, NodeId::Sink, DistanceKind::Block, &functions)?;
        let instr_distance =
            DistanceOracle::compute(cfg, NodeId::Sink, DistanceKind::Instruction, &functions)?;

        debug!(
            functions = functions.len(),
            call_sites = call_sites.len(),
            "policy inputs ready"
        );
        Ok(Self {
            cfg,
            functions,
            call_sites,
            block_distance,
            instr_distance,
            signatures: None,
            call_site_signatures: None,
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

    pub const fn cfg(&self) -> &'g Cfg {
        self.cfg
    }

    /// Function entries present in the graph.
    pub const fn functions(&self) -> &FxHashSet<u64> {
        &self.functions
    }

    /// Blocks ending in an indirect call, sorted.
    pub fn call_sites(&self) -> &[u64] {
        &self.call_sites
    }

    pub const fn distance(&self, kind: DistanceKind) -> &DistanceOracle {
        match kind {
            DistanceKind::Block => &self.block_distance,
            DistanceKind::Instruction => &self.instr_distance,
        }
    }

    pub const fn signatures(&self) -> Option<&SignatureTable> {
        self.signatures.as_ref()
    }

    pub const fn call_site_signatures(&self) -> Option<&CallSiteSignatures> {
        self.call_site_signatures.as_ref()
    }

    /// Compiler-observed parameter types at `site`.
    pub fn compiler_signature(&self, site: u64) -> Option<&[String]> {
        let binary = self.cfg.block(site)?.binary.as_ref();
        self.call_site_signatures.as_ref()?.get(binary, site)
    }

    /// Ground-truth successors of `site` that are not plain fallthrough.
    pub fn transfer_targets(&self, site: u64) -> impl Iterator<Item = NodeId> + '_ {
        self.cfg
            .out_edges(NodeId::Addr(site))
            .filter(|(_, attrs)| attrs.kind != TransferKind::Follow)
            .map(|(to, _)| to)
    }

    /// Ground-truth callees of `site` reached through an indirect call edge.
    pub fn indirect_callees(&self, site: u64) -> impl Iterator<Item = NodeId> + '_ {
        self.cfg
            .out_edges(NodeId::Addr(site))
            .filter(|(_, attrs)| attrs.kind == TransferKind::CallIndirect)
            .map(|(to, _)| to)
    }
}
