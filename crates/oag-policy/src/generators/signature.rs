use std::collections::BTreeSet;

use oag_graph::{HubLabel, NodeId};
use tracing::debug;

use super::Edges;
use crate::{
    AnomalyKind, ArgCountIndex, Diagnostics, PolicyError, PolicyInputs, Result, Signature,
    TypeIndex, UNKNOWN_ARITY, arity,
};

/// Real callees of `site` reached through an indirect call.
///
/// Each must be a function entry.
fn callees(inputs: &PolicyInputs<'_>, site: u64) -> Result<Vec<u64>> {
    inputs
        .indirect_callees(site)
        .filter_map(NodeId::addr)
        .map(|callee| {
            if inputs.functions().contains(&callee) {
                Ok(callee)
            } else {
                Err(PolicyError::CalleeNotFunction { site, callee })
            }
        })
        .collect()
}

/// Observed values disagree with a known compiler value.
fn is_anomalous<T: Ord>(observed: &BTreeSet<T>, compiler: Option<&T>) -> bool {
    compiler.is_some_and(|c| !observed.is_empty() && (observed.len() > 1 || !observed.contains(c)))
}

/// A site may call every function whose signature widens one of the
/// signatures seen at that site.
pub(crate) fn type_cfi(
    inputs: &PolicyInputs<'_>,
    index: &TypeIndex,
    diags: &mut Diagnostics,
) -> Result<Edges> {
    let mut edges = Vec::new();
    for &site in inputs.call_sites() {
        let compiler = inputs
            .compiler_signature(site)
            .map(|params| Signature::Params(params.to_vec()));

        let mut observed = BTreeSet::new();
        for callee in callees(inputs, site)? {
            let signature = index
                .signature_of(callee)
                .ok_or(PolicyError::CalleeNotFunction { site, callee })?;
            observed.insert(signature.clone());
        }

        if is_anomalous(&observed, compiler.as_ref()) {
            diags.record(site, AnomalyKind::TypeMismatch);
        }

        let mut permitted: BTreeSet<Signature> = observed;
        permitted.extend(compiler);
        let mut targets = BTreeSet::new();
        for signature in &permitted {
            targets.extend(index.functions_matching(signature));
        }
        edges.extend(
            targets
                .into_iter()
                .map(|target| (NodeId::Addr(site), NodeId::Addr(target))),
        );
    }
    diags.checked(AnomalyKind::TypeMismatch, inputs.call_sites().len());
    debug!(edges = edges.len(), "type CFI generated");
    Ok(edges)
}

/// Like [`type_cfi`] on parameter counts only, routed through one hub per count.
pub(crate) fn arg_count_cfi(
    inputs: &PolicyInputs<'_>,
    index: &ArgCountIndex,
    diags: &mut Diagnostics,
) -> Result<Edges> {
    let mut edges = Vec::new();
    let mut hubs = BTreeSet::new();
    for &site in inputs.call_sites() {
        let compiler = inputs
            .compiler_signature(site)
            .map_or(UNKNOWN_ARITY, |params| arity(params.len()));

        let observed: BTreeSet<i64> = callees(inputs, site)?
            .into_iter()
            .map(|callee| index.count_of(callee))
            .collect();

        let known = (compiler != UNKNOWN_ARITY).then_some(&compiler);
        if is_anomalous(&observed, known) {
            diags.record(site, AnomalyKind::ArgCountMismatch);
        }

        let mut permitted = observed;
        permitted.insert(compiler);
        for count in permitted {
            if index.functions_with(count).is_empty() {
                continue;
            }
            let hub = NodeId::Virtual(HubLabel::ArgCount(count));
            edges.push((NodeId::Addr(site), hub));
            hubs.insert(count);
        }
    }
    for count in hubs {
        let hub = NodeId::Virtual(HubLabel::ArgCount(count));
        edges.extend(
            index
                .functions_with(count)
                .iter()
                .map(|&target| (hub, NodeId::Addr(target))),
        );
    }
    diags.checked(AnomalyKind::ArgCountMismatch, inputs.call_sites().len());
    debug!(edges = edges.len(), "argument count CFI generated");
    Ok(edges)
}
