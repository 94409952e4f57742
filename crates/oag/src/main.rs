//! oag CLI - CFI policy evaluator

mod cli;
mod commands;
mod terminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "oag=debug"
    } else if cli.silent {
        "oag=error"
    } else {
        "oag=info"
    };
    let mut filter = EnvFilter::from_default_env();
    for crate_name in ["oag", "oag_graph", "oag_policy", "oag_eval"] {
        let directive = default_level.replacen("oag", crate_name, 1);
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let exit_code = commands::run_command(&cli);
    std::process::exit(exit_code);
}
