//! Metrics command.

use std::path::Path;

use oag::EvalConfig;
use oag::io::{read_edges_csv, write_metrics_json};
use tracing::{error, info};

use super::load_session;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal::{self, Progress};

/// Handle the `metrics` command.
pub fn cmd_metrics(
    cfg: &Path,
    edges: &Path,
    output: &Path,
    config: EvalConfig,
    silent: bool,
) -> i32 {
    info!(cfg = %cfg.display(), edges = %edges.display(), "computing metrics");
    let session = match load_session(cfg, config) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let result = read_edges_csv(edges).and_then(|extra| {
        let view = session.overlay(extra)?;
        let sites = session.cfg().indirect_call_sites().len() as u64;
        let progress = Progress::new(sites, "Call sites", silent);
        let entries = session.metrics(&view, |_| progress.inc())?;
        progress.finish();
        write_metrics_json(output, &entries)?;
        Ok(entries.len())
    });

    match result {
        Ok(sites) => {
            terminal::success(&format!("{sites} call sites -> {}", output.display()));
            EXIT_SUCCESS
        }
        Err(err) => {
            error!(error = %err, "metric computation failed");
            EXIT_FAILURE
        }
    }
}
