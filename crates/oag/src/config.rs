//! Evaluation configuration.

use oag_eval::DESCENDANT_NODE_CAP;

/// Environment variable capping the metric worker pool.
pub const MAX_CORES_ENV: &str = "OAG_MAX_CORES";

/// Knobs shared by every subcommand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalConfig {
    /// Upper bound on metric worker threads.
    pub max_workers: usize,
    /// Largest descendant subgraph explored per call site.
    pub node_cap: usize,
    /// Binary whose call sites form the aggregate populations. `None` = all.
    pub main_binary: Option<String>,
    /// Program size used by fAIR and by `any`. `None` = block count.
    pub total_size: Option<usize>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_workers: max_workers_from_env().unwrap_or_else(num_cpus::get),
            node_cap: DESCENDANT_NODE_CAP,
            main_binary: None,
            total_size: None,
        }
    }
}

impl EvalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    #[must_use]
    pub const fn with_node_cap(mut self, node_cap: usize) -> Self {
        self.node_cap = node_cap;
        self
    }

    #[must_use]
    pub fn with_main_binary(mut self, binary: impl Into<String>) -> Self {
        self.main_binary = Some(binary.into());
        self
    }

    #[must_use]
    pub const fn with_total_size(mut self, total: usize) -> Self {
        self.total_size = Some(total);
        self
    }
}

/// Worker cap from [`MAX_CORES_ENV`], ignoring unparsable or zero values.
fn max_workers_from_env() -> Option<usize> {
    std::env::var(MAX_CORES_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|&n: &usize| n > 0)
}
