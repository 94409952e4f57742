//! Metrics over CFI policy views.
//!
//! [`MetricEngine`] computes per-call-site complexity and distance metrics on a
//! worker pool; [`aggregate`] reduces a view to population-level precision
//! figures.

pub mod aggregate;
mod metric;

pub use aggregate::{AggregateReport, PrecisionReport};
pub use metric::*;

use thiserror::Error;

/// Evaluation errors.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Graph error: {0}")]
    Graph(#[from] oag_graph::GraphError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Call site {0:#x} not in graph")]
    UnknownSite(u64),
}

pub type Result<T> = std::result::Result<T, EvalError>;
