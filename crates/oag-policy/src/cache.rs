//! Lazily resolved, memoized policy outputs.

use oag_graph::{DistanceKind, GraphView};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{info, info_span};

use crate::generators::{self, Edges};
use crate::{
    ArgCountIndex, Diagnostics, EdgeSet, Policy, PolicyError, PolicyInputs, PltRedirects, Result,
    TableKind, TypeIndex,
};

/// Resolves each policy at most once, on first demand.
///
/// Results are final edge sets: ground-truth edges removed, every edge
/// checked against the graph. Indexes shared by several policies (PLT
/// redirects, signature indexes) are built on first use too.
#[derive(Debug)]
pub struct PolicyCache<'a> {
    inputs: &'a PolicyInputs<'a>,
    resolved: FxHashMap<Policy, EdgeSet>,
    resolving: FxHashSet<Policy>,
    redirects: Option<PltRedirects>,
    types: Option<TypeIndex>,
    arg_counts: Option<ArgCountIndex>,
    diagnostics: Diagnostics,
}

impl<'a> PolicyCache<'a> {
    pub fn new(inputs: &'a PolicyInputs<'a>) -> Self {
        Self {
            inputs,
            resolved: FxHashMap::default(),
            resolving: FxHashSet::default(),
            redirects: None,
            types: None,
            arg_counts: None,
            diagnostics: Diagnostics::new(),
        }
    }

    pub const fn inputs(&self) -> &'a PolicyInputs<'a> {
        self.inputs
    }

    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Whether `policy` was already resolved.
    pub fn is_resolved(&self, policy: Policy) -> bool {
        self.resolved.contains_key(&policy)
    }

    /// Final edge set of `policy`, computing it and its dependencies if needed.
    pub fn edges(&mut self, policy: Policy) -> Result<&EdgeSet> {
        self.resolve(policy)?;
        self.resolved
            .get(&policy)
            .ok_or(PolicyError::DependencyCycle(policy))
    }

    /// Take a resolved edge set out of the cache.
    pub fn take(&mut self, policy: Policy) -> Result<EdgeSet> {
        self.resolve(policy)?;
        self.resolved
            .remove(&policy)
            .ok_or(PolicyError::DependencyCycle(policy))
    }

    fn resolve(&mut self, policy: Policy) -> Result<()> {
        if self.resolved.contains_key(&policy) {
            return Ok(());
        }
        if !self.resolving.insert(policy) {
            return Err(PolicyError::DependencyCycle(policy));
        }
        let result = self.compute(policy);
        self.resolving.remove(&policy);

        let edges = result?;
        info!(
            %policy,
            edges = edges.len(),
            "over-approximation computed"
        );
        self.resolved.insert(policy, edges);
        Ok(())
    }

    fn compute(&mut self, policy: Policy) -> Result<EdgeSet> {
        for &dep in policy.dependencies() {
            self.resolve(dep)?;
        }
        let _span = info_span!("policy", %policy).entered();

        let raw: Edges = match policy {
            Policy::Baseline => generators::baseline(),
            Policy::NumBdCfiNaive => generators::numeric_naive(self.inputs, DistanceKind::Block),
            Policy::NumIdCfiNaive => {
                generators::numeric_naive(self.inputs, DistanceKind::Instruction)
            }
            Policy::NumBdCfi => generators::numeric_hub(self.inputs, DistanceKind::Block),
            Policy::NumIdCfi => generators::numeric_hub(self.inputs, DistanceKind::Instruction),
            Policy::TypeCfi => {
                self.require_tables(policy)?;
                self.ensure_type_index()?;
                let index = self.types.as_ref().ok_or(PolicyError::MissingTable {
                    policy,
                    table: TableKind::FunctionSignatures,
                })?;
                generators::type_cfi(self.inputs, index, &mut self.diagnostics)?
            }
            Policy::NumargCfi => {
                self.require_tables(policy)?;
                self.ensure_arg_count_index()?;
                let index = self.arg_counts.as_ref().ok_or(PolicyError::MissingTable {
                    policy,
                    table: TableKind::FunctionSignatures,
                })?;
                generators::arg_count_cfi(self.inputs, index, &mut self.diagnostics)?
            }
            Policy::NumBdTypeCfi | Policy::NumIdTypeCfi => {
                return self.intersect(policy);
            }
            Policy::SofCfi => generators::set_of_functions(self.inputs),
            Policy::NoCfi => generators::no_cfi(self.inputs),
        };
        self.finalize(policy, raw)
    }

    /// Literal intersection of the dependencies' final sets.
    fn intersect(&self, policy: Policy) -> Result<EdgeSet> {
        let mut sets = policy
            .dependencies()
            .iter()
            .map(|dep| {
                self.resolved
                    .get(dep)
                    .ok_or(PolicyError::DependencyCycle(*dep))
            });
        let Some(first) = sets.next().transpose()? else {
            return Ok(EdgeSet::default());
        };
        let mut edges = first.clone();
        for set in sets {
            let set = set?;
            edges.retain(|edge| set.contains(edge));
        }
        Ok(edges)
    }

    /// Drop ground-truth edges and check the rest against the graph.
    fn finalize(&self, policy: Policy, raw: Edges) -> Result<EdgeSet> {
        let cfg = self.inputs.cfg();
        let mut edges = EdgeSet::default();
        for (from, to) in raw {
            if cfg.edge(from, to).is_some() {
                continue;
            }
            if to.is_sink() || from.is_sink() {
                return Err(PolicyError::SinkEdge { policy, from, to });
            }
            for node in [from, to] {
                if !node.is_hub() && !cfg.contains(node) {
                    return Err(PolicyError::UnknownNode { policy, node });
                }
            }
            edges.insert((from, to));
        }
        Ok(edges)
    }

    fn require_tables(&self, policy: Policy) -> Result<()> {
        for &table in policy.required_tables() {
            let present = match table {
                TableKind::FunctionSignatures => self.inputs.signatures().is_some(),
                TableKind::CallSiteSignatures => self.inputs.call_site_signatures().is_some(),
            };
            if !present {
                return Err(PolicyError::MissingTable { policy, table });
            }
        }
        Ok(())
    }

    fn ensure_redirects(&mut self) -> Result<&PltRedirects> {
        if self.redirects.is_none() {
            self.redirects = Some(PltRedirects::derive(self.inputs.cfg())?);
        }
        Ok(self.redirects.get_or_insert_default())
    }

    fn ensure_type_index(&mut self) -> Result<()> {
        if self.types.is_some() {
            return Ok(());
        }
        let inputs = self.inputs;
        let redirects = self.ensure_redirects()?;
        if let Some(table) = inputs.signatures() {
            let index = TypeIndex::build(table, inputs.functions(), redirects);
            self.types = Some(index);
        }
        Ok(())
    }

    fn ensure_arg_count_index(&mut self) -> Result<()> {
        if self.arg_counts.is_some() {
            return Ok(());
        }
        let inputs = self.inputs;
        let redirects = self.ensure_redirects()?;
        if let Some(table) = inputs.signatures() {
            let index = ArgCountIndex::build(table, inputs.functions(), redirects);
            self.arg_counts = Some(index);
        }
        Ok(())
    }
}
