//! One generator per policy family. Generators only read their inputs and
//! return raw edges; ground-truth edges are filtered out by the cache.

mod coarse;
mod numeric;
mod signature;

pub(crate) use coarse::{baseline, no_cfi, set_of_functions};
pub(crate) use numeric::{numeric_hub, numeric_naive};
pub(crate) use signature::{arg_count_cfi, type_cfi};

use oag_graph::{Distance, DistanceOracle, NodeId};

use crate::PolicyInputs;

/// Raw generator output; may contain duplicates and ground-truth edges.
pub(crate) type Edges = Vec<(NodeId, NodeId)>;

/// Smallest distance among the non-fallthrough successors of `site`.
fn min_successor_distance(inputs: &PolicyInputs<'_>, oracle: &DistanceOracle, site: u64) -> Distance {
    inputs
        .transfer_targets(site)
        .map(|succ| oracle.distance(succ))
        .min()
        .unwrap_or(Distance::Infinite)
}
