//! Aggregate command.

use std::path::Path;

use oag::EvalConfig;
use oag::io::{ProcessMap, read_edges_csv, write_aggregate_json};
use tracing::{error, info, warn};

use super::load_session;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

/// Handle the `aggregate` command.
pub fn cmd_aggregate(
    cfg: &Path,
    edges: &Path,
    output: &Path,
    map: Option<&Path>,
    main_binary: Option<&str>,
    total_size: Option<usize>,
) -> i32 {
    info!(cfg = %cfg.display(), edges = %edges.display(), "aggregating");

    let process = match map.map(ProcessMap::load).transpose() {
        Ok(process) => process,
        Err(err) => {
            error!(error = %err, "failed to load process map");
            return EXIT_FAILURE;
        }
    };

    let mut config = EvalConfig::new();
    let main_binary = main_binary.or_else(|| process.as_ref().map(ProcessMap::main_binary));
    match main_binary {
        Some(name) => config = config.with_main_binary(name),
        None => warn!("no main binary given: every call site is counted"),
    }
    if let Some(total) = total_size.or_else(|| process.as_ref().and_then(|p| p.total_exec_size)) {
        config = config.with_total_size(total);
    }

    let session = match load_session(cfg, config) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let result = read_edges_csv(edges).and_then(|extra| {
        let view = session.overlay(extra)?;
        let report = session.aggregate(&view);
        write_aggregate_json(output, &report)?;
        Ok(report)
    });

    match result {
        Ok(report) => {
            terminal::success(&format!(
                "{} call sites ({} observed) -> {}",
                report.all.sites,
                report.observed.sites,
                output.display()
            ));
            EXIT_SUCCESS
        }
        Err(err) => {
            error!(error = %err, "aggregation failed");
            EXIT_FAILURE
        }
    }
}
