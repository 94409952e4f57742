//! Writers (and the edge-list reader) for derived data.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use oag_eval::{AggregateReport, MetricRecord, PrecisionReport};
use oag_graph::{Distance, NodeId};
use serde::{Serialize, Serializer};

use super::open_input;
use crate::{Error, Result};

/// Write an edge set as `from,to` lines, sorted.
///
/// Returns the number of edges written.
pub fn write_edges_csv<'e, I>(path: &Path, edges: I) -> Result<usize>
where
    I: IntoIterator<Item = &'e (NodeId, NodeId)>,
{
    let mut sorted: Vec<(NodeId, NodeId)> = edges.into_iter().copied().collect();
    sorted.sort_unstable();

    let mut out = BufWriter::new(File::create(path)?);
    for (from, to) in &sorted {
        writeln!(out, "{from},{to}")?;
    }
    out.flush()?;
    Ok(sorted.len())
}

/// Read an edge list written by [`write_edges_csv`].
pub fn read_edges_csv(path: &Path) -> Result<Vec<(NodeId, NodeId)>> {
    let reader = BufReader::new(open_input(path)?);
    let mut edges = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let malformed = || Error::EdgeList {
            path: path.to_path_buf(),
            line: index + 1,
            content: trimmed.to_string(),
        };
        let (from, to) = trimmed.split_once(',').ok_or_else(malformed)?;
        let from = from.trim().parse().map_err(|_| malformed())?;
        let to = to.trim().parse().map_err(|_| malformed())?;
        edges.push((from, to));
    }
    Ok(edges)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Non-finite values are written as the strings `Infinity` / `NaN`.
fn number<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_sign_positive() {
        serializer.serialize_str("Infinity")
    } else {
        serializer.serialize_str("-Infinity")
    }
}

fn distance<S: Serializer>(value: &Distance, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Distance::Finite(d) => serializer.serialize_u64(*d),
        Distance::Infinite => serializer.serialize_str("Infinity"),
    }
}

#[derive(Serialize)]
struct MetricValues {
    #[serde(serialize_with = "distance")]
    blockdist: Distance,
    #[serde(serialize_with = "distance")]
    instrdist: Distance,
    mccabe: Option<i64>,
    #[serde(serialize_with = "number")]
    blockdist_div_mccabe: f64,
    #[serde(serialize_with = "number")]
    blockdist_div_log_mccabe: f64,
    #[serde(serialize_with = "number")]
    instrdist_div_mccabe: f64,
    #[serde(serialize_with = "number")]
    instrdist_div_log_mccabe: f64,
}

/// Metrics of one call site plus a summary of its outgoing edges.
#[derive(Serialize)]
pub struct MetricEntry {
    addr: String,
    binary: String,
    metrics: MetricValues,
    out_edge_props: OutEdgeProps,
}

/// Provenance and kinds of a site's outgoing edges; policy edges count as `oa`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutEdgeProps {
    pub hows: Vec<String>,
    pub types: Vec<String>,
}

impl MetricEntry {
    pub fn new(record: &MetricRecord, binary: &str, out_edge_props: OutEdgeProps) -> Self {
        Self {
            addr: NodeId::Addr(record.site).to_string(),
            binary: binary.to_string(),
            metrics: MetricValues {
                blockdist: record.block_distance,
                instrdist: record.instr_distance,
                mccabe: record.mccabe,
                blockdist_div_mccabe: record.block_dist_div_mccabe,
                blockdist_div_log_mccabe: record.block_dist_div_log_mccabe,
                instrdist_div_mccabe: record.instr_dist_div_mccabe,
                instrdist_div_log_mccabe: record.instr_dist_div_log_mccabe,
            },
            out_edge_props,
        }
    }
}

struct KeyedEntries<'a>(&'a [MetricEntry]);

impl Serialize for KeyedEntries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|entry| (&entry.addr, entry)))
    }
}

/// Write metric entries as one JSON object keyed by node id, in entry order.
pub fn write_metrics_json(path: &Path, entries: &[MetricEntry]) -> Result<()> {
    write_json(path, &KeyedEntries(entries))
}

#[derive(Serialize)]
struct PopulationJson {
    #[serde(rename = "fAIR")]
    fair: Option<f64>,
    #[serde(rename = "fAIA")]
    faia: Option<f64>,
    #[serde(rename = "iCTR")]
    ictr: Option<u64>,
    #[serde(rename = "QS")]
    qs: Option<f64>,
}

impl From<&PrecisionReport> for PopulationJson {
    fn from(report: &PrecisionReport) -> Self {
        Self {
            fair: report.fair,
            faia: report.faia,
            ictr: report.ictr,
            qs: report.qs,
        }
    }
}

#[derive(Serialize)]
struct AggregateJson {
    all_blocks: PopulationJson,
    loe_blocks: PopulationJson,
    indy_size: usize,
    loeindy_size: usize,
}

/// Write an aggregate report. `loe` names the observed-sites population.
pub fn write_aggregate_json(path: &Path, report: &AggregateReport) -> Result<()> {
    write_json(
        path,
        &AggregateJson {
            all_blocks: (&report.all).into(),
            loe_blocks: (&report.observed).into(),
            indy_size: report.all.sites,
            loeindy_size: report.observed.sites,
        },
    )
}

/// Summary of a pruned-ancestor query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PathsReport {
    pub forbidden_paths: usize,
    pub ancestors: usize,
    pub naive_ancestors: usize,
    /// Ancestors lost to the forbidden paths, sorted.
    pub excluded: Vec<String>,
}

pub fn write_paths_json(path: &Path, report: &PathsReport) -> Result<()> {
    write_json(path, report)
}
