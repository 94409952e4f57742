//! Data anomaly collector.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{info, warn};

/// Kind of non-fatal data anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnomalyKind {
    /// Observed callee signatures disagree with the compiler's call-site type.
    TypeMismatch,
    /// Observed callee arities disagree with the compiler's call-site arity.
    ArgCountMismatch,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TypeMismatch => "type mismatch",
            Self::ArgCountMismatch => "argument count mismatch",
        })
    }
}

/// Totals for one anomaly kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnomalySummary {
    pub kind: AnomalyKind,
    pub anomalies: usize,
    /// Call sites checked for this kind.
    pub sites: usize,
    /// `anomalies / sites`.
    pub ratio: f64,
}

/// Anomalies keyed by (call site, kind), each logged once.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    seen: FxHashSet<(u64, AnomalyKind)>,
    checked: FxHashMap<AnomalyKind, usize>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an anomaly. Returns whether it was new.
    pub fn record(&mut self, site: u64, kind: AnomalyKind) -> bool {
        let new = self.seen.insert((site, kind));
        if new {
            warn!(site = format!("{site:#x}"), %kind, "data anomaly");
        }
        new
    }

    /// Count `sites` call sites as checked for `kind`.
    pub fn checked(&mut self, kind: AnomalyKind, sites: usize) {
        *self.checked.entry(kind).or_default() += sites;
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.seen.iter().filter(|(_, k)| *k == kind).count()
    }

    /// Anomalous sites over checked sites. `None` if nothing was checked.
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self, kind: AnomalyKind) -> Option<f64> {
        let checked = self.checked.get(&kind).copied().unwrap_or(0);
        (checked > 0).then(|| self.count(kind) as f64 / checked as f64)
    }

    /// Per-kind totals, in kind order.
    pub fn summary(&self) -> Vec<AnomalySummary> {
        let mut kinds: Vec<_> = self.checked.iter().collect();
        kinds.sort_unstable();
        kinds
            .into_iter()
            .map(|(&kind, &sites)| AnomalySummary {
                kind,
                anomalies: self.count(kind),
                sites,
                ratio: self.ratio(kind).unwrap_or(0.0),
            })
            .collect()
    }

    /// Log one summary line per checked kind.
    pub fn report(&self) {
        for entry in self.summary() {
            info!(
                kind = %entry.kind,
                anomalies = entry.anomalies,
                sites = entry.sites,
                ratio = format!("{:.4}", entry.ratio),
                "anomaly summary"
            );
        }
    }

    /// Anomalous sites of `kind`, sorted.
    pub fn sites(&self, kind: AnomalyKind) -> Vec<u64> {
        let mut sites: Vec<u64> = self
            .seen
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|&(site, _)| site)
            .collect();
        sites.sort_unstable();
        sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_once() {
        let mut diags = Diagnostics::new();
        assert_eq!(diags.ratio(AnomalyKind::TypeMismatch), None);
        diags.checked(AnomalyKind::TypeMismatch, 4);
        assert!(diags.record(0x20, AnomalyKind::TypeMismatch));
        assert!(!diags.record(0x20, AnomalyKind::TypeMismatch));
        assert!(diags.record(0x10, AnomalyKind::TypeMismatch));
        assert!(diags.record(0x10, AnomalyKind::ArgCountMismatch));
        assert_eq!(diags.count(AnomalyKind::TypeMismatch), 2);
        assert_eq!(diags.ratio(AnomalyKind::TypeMismatch), Some(0.5));
        assert_eq!(diags.sites(AnomalyKind::TypeMismatch), vec![0x10, 0x20]);

        // Arity anomalies were recorded but never checked: no summary line.
        assert_eq!(
            diags.summary(),
            vec![AnomalySummary {
                kind: AnomalyKind::TypeMismatch,
                anomalies: 2,
                sites: 4,
                ratio: 0.5,
            }]
        );
    }
}
