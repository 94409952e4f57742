//! Generate command.

use std::path::Path;

use oag::io::{CallDump, load_signatures, load_symbol_map};
use oag::{EvalConfig, Session};
use tracing::{error, info};

use super::load_session;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, PolicyArg, TableArgs, selected_policies};
use crate::terminal;

/// Handle the `generate` command.
pub fn cmd_generate(cfg: &Path, output: &Path, policies: &[PolicyArg], tables: &TableArgs) -> i32 {
    let policies = selected_policies(policies);
    info!(cfg = %cfg.display(), output = %output.display(), policies = policies.len(), "generating");

    let session = match load_session(cfg, EvalConfig::new()).and_then(|s| attach_tables(s, tables)) {
        Ok(session) => session,
        Err(code) => return code,
    };

    match session.generate(&policies, output) {
        Ok(report) => {
            for (policy, path, edges) in &report.written {
                terminal::success(&format!("{policy}: {edges} edges -> {}", path.display()));
            }
            for (policy, err) in &report.failed {
                terminal::warning(&format!("{policy}: {err}"));
            }
            if report.failed.is_empty() {
                EXIT_SUCCESS
            } else {
                error!(failed = report.failed.len(), "some policies were not generated");
                EXIT_FAILURE
            }
        }
        Err(err) => {
            error!(error = %err, "generation failed");
            terminal::error(&err.to_string());
            EXIT_FAILURE
        }
    }
}

fn attach_tables(mut session: Session, tables: &TableArgs) -> Result<Session, i32> {
    if let Some(path) = &tables.dwarf_types {
        match load_signatures(path) {
            Ok(table) => session = session.with_signatures(table),
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to load DWARF types");
                return Err(EXIT_FAILURE);
            }
        }
    }
    if let (Some(dump), Some(map)) = (&tables.fn_calls, &tables.symbol_map) {
        let joined = CallDump::load(dump).and_then(|dump| {
            let locations = load_symbol_map(map)?;
            Ok(dump.call_site_signatures(&locations))
        });
        match joined {
            Ok(table) => session = session.with_call_site_signatures(table),
            Err(err) => {
                error!(error = %err, "failed to load call-site signatures");
                return Err(EXIT_FAILURE);
            }
        }
    }
    Ok(session)
}
