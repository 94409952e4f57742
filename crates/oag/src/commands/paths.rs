//! Paths command.

use std::path::Path;

use oag::io::write_paths_json;
use oag::{EvalConfig, NodeId};
use rustc_hash::FxHashSet;
use tracing::{error, info};

use super::load_session;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

/// Handle the `paths` command.
pub fn cmd_paths(cfg: &Path, avoid: &[String], depth: Option<usize>, output: &Path) -> i32 {
    let mut blocks = FxHashSet::default();
    for raw in avoid {
        match raw.parse::<NodeId>().map(NodeId::addr) {
            Ok(Some(addr)) => {
                blocks.insert(addr);
            }
            _ => {
                error!(node = %raw, "not a block address");
                return EXIT_FAILURE;
            }
        }
    }
    info!(cfg = %cfg.display(), avoid = blocks.len(), "pruning sink ancestors");

    let session = match load_session(cfg, EvalConfig::new()) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let report = session.paths(&blocks, depth);
    if let Err(err) = write_paths_json(output, &report) {
        error!(error = %err, "failed to write report");
        return EXIT_FAILURE;
    }
    terminal::success(&format!(
        "{} of {} ancestors remain ({} forbidden paths) -> {}",
        report.ancestors,
        report.naive_ancestors,
        report.forbidden_paths,
        output.display()
    ));
    EXIT_SUCCESS
}
