//! oag - CFI policy over-approximation evaluator
//!
//! Loads a merged ground-truth CFG, generates the extra edges each CFI policy
//! permits, and measures how much room every policy leaves an attacker.
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use oag::{EvalConfig, Policy, Session};
//!
//! let session = Session::load(Path::new("cfg.json.zst"), EvalConfig::default())?;
//! let report = session.generate(&[Policy::NumBdCfi], Path::new("out"))?;
//! ```

pub mod config;
pub mod io;
mod pipeline;

pub use config::EvalConfig;
pub use pipeline::*;

pub use oag_eval::{AggregateReport, MetricRecord, PrecisionReport};
pub use oag_graph::{Cfg, GraphError, NodeId};
pub use oag_policy::{Policy, PolicyError};

use std::path::PathBuf;

use thiserror::Error;

/// Evaluator errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("Evaluation error: {0}")]
    Eval(#[from] oag_eval::EvalError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid identifier: {0}")]
    Parse(#[from] oag_graph::ParseNodeError),
    #[error("Block keyed {key} declares address {addr}")]
    AddrMismatch { key: String, addr: String },
    #[error("{path}:{line}: malformed edge '{content}'")]
    EdgeList {
        path: PathBuf,
        line: usize,
        content: String,
    },
    #[error("Malformed call-site record: {0}")]
    CallSiteRecord(String),
    #[error("Writer for policy {0} panicked")]
    WriterPanicked(Policy),
    #[error("{0} policies failed")]
    PoliciesFailed(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
