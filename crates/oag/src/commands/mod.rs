//! Command implementations.
//!
//! Each submodule handles one CLI command.

mod aggregate;
mod generate;
mod metrics;
mod paths;

use std::path::Path;

use oag::{EvalConfig, Session};
use tracing::error;

use crate::cli::{Cli, Commands, EXIT_FAILURE};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Generate {
            cfg,
            output,
            policies,
            tables,
        } => generate::cmd_generate(cfg, output, policies, tables),
        Commands::Metrics {
            cfg,
            edges,
            output,
            max_workers,
            node_cap,
        } => {
            let mut config = EvalConfig::new();
            if let Some(n) = max_workers {
                config = config.with_max_workers(*n);
            }
            if let Some(n) = node_cap {
                config = config.with_node_cap(*n);
            }
            metrics::cmd_metrics(cfg, edges, output, config, cli.silent)
        }
        Commands::Aggregate {
            cfg,
            edges,
            output,
            map,
            main_binary,
            total_size,
        } => aggregate::cmd_aggregate(
            cfg,
            edges,
            output,
            map.as_deref(),
            main_binary.as_deref(),
            *total_size,
        ),
        Commands::Paths {
            cfg,
            avoid,
            depth,
            output,
        } => paths::cmd_paths(cfg, avoid, *depth, output),
    }
}

/// Load the CFG, logging the failure.
fn load_session(cfg: &Path, config: EvalConfig) -> Result<Session, i32> {
    Session::load(cfg, config).map_err(|err| {
        error!(cfg = %cfg.display(), error = %err, "failed to load CFG");
        EXIT_FAILURE
    })
}
