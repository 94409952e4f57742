//! PLT stub redirects.

use std::collections::BTreeMap;

use oag_graph::{Cfg, NodeId, TransferKind};
use tracing::debug;

use crate::{PolicyError, Result};

/// Provenance tag of edges observed at runtime.
pub const DYNAMIC_SOURCE: &str = "cfggrind";

/// PLT stub -> the function it jumps to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PltRedirects {
    targets: BTreeMap<u64, u64>,
}

impl PltRedirects {
    /// Derive redirects from the graph.
    ///
    /// Every PLT block must end in an indirect jump. A stub with no successor
    /// is skipped; with several, only the dynamically observed ones count, and
    /// exactly one must remain.
    pub fn derive(cfg: &Cfg) -> Result<Self> {
        let mut stubs: Vec<u64> = cfg
            .blocks()
            .filter(|(_, block)| block.is_plt())
            .map(|(addr, _)| addr)
            .collect();
        stubs.sort_unstable();

        let mut targets = BTreeMap::new();
        for stub in stubs {
            if !cfg
                .block(stub)
                .is_some_and(|block| block.ends_with(TransferKind::JumpIndirect))
            {
                return Err(PolicyError::PltNotIndirectJump(stub));
            }

            let mut succs: Vec<(NodeId, bool)> = cfg
                .out_edges(NodeId::Addr(stub))
                .map(|(to, attrs)| (to, attrs.observed_by(DYNAMIC_SOURCE)))
                .collect();
            if succs.is_empty() {
                continue;
            }
            if succs.len() > 1 {
                succs.retain(|&(_, observed)| observed);
            }
            let [(target, _)] = succs[..] else {
                return Err(PolicyError::AmbiguousPltRedirect {
                    stub,
                    count: succs.len(),
                });
            };
            if let Some(target) = target.addr() {
                targets.insert(stub, target);
            }
        }

        debug!(redirects = targets.len(), "PLT redirects derived");
        Ok(Self { targets })
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        Self {
            targets: pairs.into_iter().collect(),
        }
    }

    pub fn target(&self, stub: u64) -> Option<u64> {
        self.targets.get(&stub).copied()
    }

    /// (stub, target) pairs sorted by stub.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.targets.iter().map(|(&stub, &target)| (stub, target))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oag_graph::{Block, EdgeAttrs};

    fn stub() -> Block {
        Block::new(6, 1)
            .with_terminator(TransferKind::JumpIndirect)
            .with_in_plt(true)
    }

    fn jump(how: &[&str]) -> EdgeAttrs {
        EdgeAttrs::new(TransferKind::JumpIndirect)
            .with_how(how.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn test_derive_redirects() {
        let mut cfg = Cfg::new();
        cfg.add_block(0x10, stub());
        cfg.add_block(0x20, stub());
        cfg.add_block(0x30, stub());
        cfg.add_block(0x100, Block::new(4, 1));
        cfg.add_block(0x200, Block::new(4, 1));
        cfg.add_edge(0x10, 0x100, jump(&["angr"])).unwrap();
        cfg.add_edge(0x20, 0x100, jump(&["angr"])).unwrap();
        cfg.add_edge(0x20, 0x200, jump(&["angr", DYNAMIC_SOURCE]))
            .unwrap();

        let redirects = PltRedirects::derive(&cfg).unwrap();
        assert_eq!(
            redirects.iter().collect::<Vec<_>>(),
            vec![(0x10, 0x100), (0x20, 0x200)]
        );
        assert_eq!(redirects.target(0x30), None);
    }

    #[test]
    fn test_ambiguous_redirect() {
        let mut cfg = Cfg::new();
        cfg.add_block(0x10, stub());
        cfg.add_block(0x100, Block::new(4, 1));
        cfg.add_block(0x200, Block::new(4, 1));
        cfg.add_edge(0x10, 0x100, jump(&[DYNAMIC_SOURCE])).unwrap();
        cfg.add_edge(0x10, 0x200, jump(&[DYNAMIC_SOURCE])).unwrap();
        assert_eq!(
            PltRedirects::derive(&cfg),
            Err(PolicyError::AmbiguousPltRedirect {
                stub: 0x10,
                count: 2,
            })
        );
    }

    #[test]
    fn test_plt_block_must_jump_indirect() {
        let mut cfg = Cfg::new();
        cfg.add_block(
            0x10,
            Block::new(6, 1)
                .with_terminator(TransferKind::JumpDirect)
                .with_in_plt(true),
        );
        assert_eq!(
            PltRedirects::derive(&cfg),
            Err(PolicyError::PltNotIndirectJump(0x10))
        );
    }
}
