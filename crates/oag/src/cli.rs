//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use oag::Policy;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "oag")]
#[command(about = "CFI policy evaluator - over-approximated CFGs, metrics and aggregates")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the extra edges of CFI policies
    Generate {
        /// Merged CFG (JSON, optionally .zst)
        #[arg(value_name = "CFG")]
        cfg: PathBuf,

        /// Output directory, one <policy>.csv per policy
        #[arg(short, long, default_value = "edges")]
        output: PathBuf,

        /// Policies to generate (default: all)
        #[arg(short, long = "policy", value_enum, value_delimiter = ',')]
        policies: Vec<PolicyArg>,

        #[command(flatten)]
        tables: TableArgs,
    },
    /// Per-call-site complexity and distance metrics of one policy
    Metrics {
        /// Merged CFG (JSON, optionally .zst)
        #[arg(value_name = "CFG")]
        cfg: PathBuf,

        /// Policy edge list written by `generate`
        #[arg(value_name = "EDGES")]
        edges: PathBuf,

        /// Output JSON file
        #[arg(short, long, default_value = "metrics.json")]
        output: PathBuf,

        /// Maximum worker threads (default: OAG_MAX_CORES or all cores)
        #[arg(short = 'j', long)]
        max_workers: Option<usize>,

        /// Largest subgraph explored per call site
        #[arg(long)]
        node_cap: Option<usize>,
    },
    /// Precision aggregates (fAIR, fAIA, iCTR, QS) of one policy
    Aggregate {
        /// Merged CFG (JSON, optionally .zst)
        #[arg(value_name = "CFG")]
        cfg: PathBuf,

        /// Policy edge list written by `generate`
        #[arg(value_name = "EDGES")]
        edges: PathBuf,

        /// Output JSON file
        #[arg(short, long, default_value = "aggregate.json")]
        output: PathBuf,

        /// Process map naming the main binary and the executable size
        #[arg(long)]
        map: Option<PathBuf>,

        /// Main binary name (overrides the process map)
        #[arg(long)]
        main_binary: Option<String>,

        /// Program size for fAIR (overrides the process map)
        #[arg(long)]
        total_size: Option<usize>,
    },
    /// Sink ancestors once the paths from given blocks are forbidden
    Paths {
        /// Merged CFG (JSON, optionally .zst)
        #[arg(value_name = "CFG")]
        cfg: PathBuf,

        /// Blocks whose paths to the sink are forbidden (hex)
        #[arg(long, value_delimiter = ',', required = true)]
        avoid: Vec<String>,

        /// Maximum path extensions (default: node count)
        #[arg(long)]
        depth: Option<usize>,

        /// Output JSON file
        #[arg(short, long, default_value = "paths.json")]
        output: PathBuf,
    },
}

/// Auxiliary tables for the signature-based policies.
#[derive(Args, Clone, Debug, Default)]
pub struct TableArgs {
    /// DWARF function types (JSON)
    #[arg(long)]
    pub dwarf_types: Option<PathBuf>,

    /// Compiler call-site dump (file or directory of .txt files)
    #[arg(long, requires = "symbol_map")]
    pub fn_calls: Option<PathBuf>,

    /// Symbolized call sites joining the dump to addresses (JSON)
    #[arg(long, requires = "fn_calls")]
    pub symbol_map: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum PolicyArg {
    /// No extra edges
    Baseline,
    /// Function entries at least as far from the sink, in blocks
    NumBdCfiNaive,
    /// Function entries at least as far from the sink, in instructions
    NumIdCfiNaive,
    /// Block-distance numeric CFI through per-distance hubs
    NumBdCfi,
    /// Instruction-distance numeric CFI through per-distance hubs
    NumIdCfi,
    /// Functions with a compatible signature
    TypeCfi,
    /// Functions with a compatible argument count
    NumargCfi,
    /// Block-distance numeric CFI intersected with type CFI
    NumBdTypeCfi,
    /// Instruction-distance numeric CFI intersected with type CFI
    NumIdTypeCfi,
    /// Any function entry
    SofCfi,
    /// Any block
    NoCfi,
}

impl From<PolicyArg> for Policy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Baseline => Self::Baseline,
            PolicyArg::NumBdCfiNaive => Self::NumBdCfiNaive,
            PolicyArg::NumIdCfiNaive => Self::NumIdCfiNaive,
            PolicyArg::NumBdCfi => Self::NumBdCfi,
            PolicyArg::NumIdCfi => Self::NumIdCfi,
            PolicyArg::TypeCfi => Self::TypeCfi,
            PolicyArg::NumargCfi => Self::NumargCfi,
            PolicyArg::NumBdTypeCfi => Self::NumBdTypeCfi,
            PolicyArg::NumIdTypeCfi => Self::NumIdTypeCfi,
            PolicyArg::SofCfi => Self::SofCfi,
            PolicyArg::NoCfi => Self::NoCfi,
        }
    }
}

/// Requested policies, or all of them when none were named.
pub fn selected_policies(args: &[PolicyArg]) -> Vec<Policy> {
    if args.is_empty() {
        Policy::ALL.to_vec()
    } else {
        args.iter().copied().map(Policy::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_policy_names_match() {
        for arg in PolicyArg::value_variants() {
            let name = arg.to_possible_value().unwrap();
            assert_eq!(name.get_name(), Policy::from(*arg).name());
        }
    }

    #[test]
    fn test_parse_generate() {
        let cli = Cli::parse_from([
            "oag",
            "generate",
            "cfg.json",
            "-p",
            "type_cfi,no_cfi",
            "--dwarf-types",
            "types.json",
        ]);
        let Commands::Generate {
            policies, tables, ..
        } = cli.command
        else {
            panic!("expected generate");
        };
        assert_eq!(
            selected_policies(&policies),
            vec![Policy::TypeCfi, Policy::NoCfi]
        );
        assert!(tables.dwarf_types.is_some());
        assert_eq!(selected_policies(&[]).len(), Policy::ALL.len());
    }
}
