//! Control flow graph model for CFI policy evaluation.
//!
//! The graph holds basic blocks keyed by address, typed control transfers
//! between them, and a single sink node that every syscall block feeds into.
//! Policy generators never write into it; their extra edges are layered on
//! top through [`Overlay`].

mod distance;
mod graph;
mod node;
mod overlay;
pub mod reach;

pub use distance::*;
pub use graph::*;
pub use node::*;
pub use overlay::*;

use thiserror::Error;

/// Graph construction and traversal errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node {0} not in graph")]
    MissingNode(NodeId),
    #[error("Edge {from} -> {to} references missing node {missing}")]
    DanglingEdge {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
    #[error("Edge {from} -> {to} touches the sink")]
    SinkEdge { from: NodeId, to: NodeId },
    #[error("Sink already attached")]
    SinkAlreadyAttached,
    #[error("Sink not attached: call attach_sink before {0}")]
    SinkNotAttached(&'static str),
    #[error("Forbidden path declared with length {declared} has {actual} nodes")]
    ForbiddenPathLength { declared: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, GraphError>;
