//! CFI policy over-approximation generators.
//!
//! Each [`Policy`] turns the ground-truth graph into the set of extra edges the
//! policy would still allow at indirect call sites. Policies are resolved
//! lazily through a [`PolicyCache`], so intersections reuse their
//! constituents' results.

mod cache;
mod diagnostics;
mod generators;
mod inputs;
mod plt;
mod tables;

pub use cache::*;
pub use diagnostics::*;
pub use inputs::*;
pub use plt::*;
pub use tables::*;

use std::fmt;
use std::str::FromStr;

use oag_graph::{GraphError, NodeId};
use rustc_hash::FxHashSet;
use thiserror::Error;

/// Derived edges of one policy.
pub type EdgeSet = FxHashSet<(NodeId, NodeId)>;

/// Policy errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Unknown policy '{0}'")]
    UnknownPolicy(String),
    #[error("Policy {policy} needs the {table}")]
    MissingTable { policy: Policy, table: TableKind },
    #[error("Policy {policy} produced edge {from} -> {to} touching the sink")]
    SinkEdge {
        policy: Policy,
        from: NodeId,
        to: NodeId,
    },
    #[error("Policy {policy} produced an edge touching unknown node {node}")]
    UnknownNode { policy: Policy, node: NodeId },
    #[error("Dependency cycle through policy {0}")]
    DependencyCycle(Policy),
    #[error("PLT stub {stub:#x} has {count} candidate targets")]
    AmbiguousPltRedirect { stub: u64, count: usize },
    #[error("PLT stub {0:#x} does not end in an indirect jump")]
    PltNotIndirectJump(u64),
    #[error("Indirect call at {site:#x} reaches {callee:#x}, which is not a function entry")]
    CalleeNotFunction { site: u64, callee: u64 },
}

pub type Result<T> = std::result::Result<T, PolicyError>;

/// CFI policies, from no protection to the most precise intersection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Policy {
    Baseline,
    NumBdCfiNaive,
    NumIdCfiNaive,
    NumBdCfi,
    NumIdCfi,
    TypeCfi,
    NumBdTypeCfi,
    NumIdTypeCfi,
    NumargCfi,
    SofCfi,
    NoCfi,
}

impl Policy {
    pub const ALL: [Self; 11] = [
        Self::Baseline,
        Self::NumBdCfiNaive,
        Self::NumIdCfiNaive,
        Self::NumBdCfi,
        Self::NumIdCfi,
        Self::TypeCfi,
        Self::NumBdTypeCfi,
        Self::NumIdTypeCfi,
        Self::NumargCfi,
        Self::SofCfi,
        Self::NoCfi,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::NumBdCfiNaive => "num_bd_cfi_naive",
            Self::NumIdCfiNaive => "num_id_cfi_naive",
            Self::NumBdCfi => "num_bd_cfi",
            Self::NumIdCfi => "num_id_cfi",
            Self::TypeCfi => "type_cfi",
            Self::NumBdTypeCfi => "num_bd_type_cfi",
            Self::NumIdTypeCfi => "num_id_type_cfi",
            Self::NumargCfi => "numarg_cfi",
            Self::SofCfi => "sof_cfi",
            Self::NoCfi => "no_cfi",
        }
    }

    /// Policies whose output this policy is computed from.
    pub const fn dependencies(self) -> &'static [Self] {
        match self {
            Self::NumBdTypeCfi => &[Self::NumBdCfiNaive, Self::TypeCfi],
            Self::NumIdTypeCfi => &[Self::NumIdCfiNaive, Self::TypeCfi],
            _ => &[],
        }
    }

    /// Auxiliary tables this policy (or a dependency) reads.
    pub const fn required_tables(self) -> &'static [TableKind] {
        match self {
            Self::TypeCfi | Self::NumBdTypeCfi | Self::NumIdTypeCfi | Self::NumargCfi => {
                &[TableKind::FunctionSignatures, TableKind::CallSiteSignatures]
            }
            _ => &[],
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Policy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| PolicyError::UnknownPolicy(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_names_round_trip() {
        for policy in Policy::ALL {
            assert_eq!(policy.name().parse::<Policy>(), Ok(policy));
        }
        assert_eq!(
            "cfi".parse::<Policy>(),
            Err(PolicyError::UnknownPolicy("cfi".to_string()))
        );
    }

    #[test]
    fn test_dependencies_are_acyclic() {
        for policy in Policy::ALL {
            for dep in policy.dependencies() {
                assert!(dep.dependencies().is_empty());
                for table in dep.required_tables() {
                    assert!(policy.required_tables().contains(table));
                }
            }
        }
    }
}
