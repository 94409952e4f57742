//! Merged CFG loader.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use oag_graph::{Block, Cfg, CfgBuilder, EdgeAttrs, NodeId, TransferKind};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, info, info_span};

use super::{Hex, read_json};
use crate::{Error, Result};

#[derive(Deserialize)]
struct RawCfg {
    blocks: BTreeMap<String, RawBlock>,
    #[serde(default)]
    functions: BTreeMap<Hex, String>,
}

#[derive(Deserialize)]
struct RawBlock {
    addr: Hex,
    size: u64,
    #[serde(default)]
    instr_sizes: Vec<u64>,
    #[serde(default)]
    fake_instr_sizes: bool,
    #[serde(default)]
    fn_addrs: Vec<Hex>,
    #[serde(default)]
    found_by: Vec<String>,
    end_insn_indir: Option<String>,
    #[serde(default)]
    binary_basename: Option<String>,
    in_plt: Option<bool>,
    #[serde(default)]
    out_edges: Vec<RawEdge>,
}

#[derive(Deserialize)]
struct RawEdge {
    to: Hex,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    how: Vec<String>,
}

/// A loaded CFG and its function table.
#[derive(Debug)]
pub struct LoadedCfg {
    pub cfg: Cfg,
    /// Function entry -> name.
    pub functions: BTreeMap<u64, String>,
}

/// Load a merged CFG from JSON (optionally zstd-compressed).
pub fn load_cfg(path: &Path) -> Result<LoadedCfg> {
    let _span = info_span!("load_cfg", path = %path.display()).entered();
    let raw: RawCfg = read_json(path)?;
    let loaded = build_cfg(raw)?;
    info!(
        blocks = loaded.cfg.block_count(),
        edges = loaded.cfg.edge_count(),
        functions = loaded.functions.len(),
        "CFG loaded"
    );
    Ok(loaded)
}

/// Parse a merged CFG from an in-memory JSON document.
pub fn parse_cfg(json: &str) -> Result<LoadedCfg> {
    build_cfg(serde_json::from_str(json)?)
}

fn build_cfg(raw: RawCfg) -> Result<LoadedCfg> {
    let mut builder = CfgBuilder::new();
    let mut binaries: FxHashMap<String, Arc<str>> = FxHashMap::default();
    let mut estimated = 0usize;

    for (key, block) in raw.blocks {
        if key.parse::<NodeId>()? != NodeId::Addr(block.addr.0) {
            return Err(Error::AddrMismatch {
                key,
                addr: format!("{:#x}", block.addr.0),
            });
        }
        let addr = block.addr.0;

        let mut attrs = if block.fake_instr_sizes {
            estimated += 1;
            Block::estimated(block.size)
        } else {
            Block::new(block.size, block.instr_sizes.len() as u64)
        };
        attrs = attrs
            .with_functions(block.fn_addrs.iter().map(|h| h.0).collect())
            .with_found_by(block.found_by);
        if let Some(kind) = block.end_insn_indir {
            attrs = attrs.with_terminator(kind.parse::<TransferKind>()?);
        }
        if let Some(name) = block.binary_basename {
            let interned = binaries
                .entry(name)
                .or_insert_with_key(|name| Arc::from(name.as_str()))
                .clone();
            attrs = attrs.with_binary(interned);
        }
        if let Some(in_plt) = block.in_plt {
            attrs = attrs.with_in_plt(in_plt);
        }
        builder.add_block(addr, attrs);

        for edge in block.out_edges {
            let kind: TransferKind = edge.kind.parse()?;
            builder.add_edge(addr, edge.to.0, EdgeAttrs::new(kind).with_how(edge.how));
        }
    }

    if estimated > 0 {
        debug!(blocks = estimated, "instruction counts estimated from size");
    }
    let functions = raw
        .functions
        .into_iter()
        .map(|(addr, name)| (addr.0, name))
        .collect();
    Ok(LoadedCfg {
        cfg: builder.build()?,
        functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use oag_graph::GraphView;

    const SMALL: &str = r#"{
        "blocks": {
            "0x10": {"addr": "0x10", "size": 8, "instr_sizes": [4, 4],
                     "fn_addrs": ["0x10"], "found_by": ["angr"],
                     "end_insn_indir": "call_indirect", "binary_basename": "main",
                     "out_edges": [{"to": "0x20", "type": "call_indirect", "how": ["cfggrind"]},
                                   {"to": "0x30", "type": "follow", "how": ["angr"]}]},
            "0x20": {"addr": "0x20", "size": 10, "instr_sizes": [], "fake_instr_sizes": true,
                     "fn_addrs": ["0x20"], "found_by": [], "end_insn_indir": "syscall",
                     "binary_basename": "libc.so.6", "in_plt": false, "out_edges": []},
            "0x30": {"addr": "0x30", "size": 2, "instr_sizes": [2], "fn_addrs": [],
                     "found_by": [], "end_insn_indir": null, "binary_basename": "main",
                     "out_edges": []}
        },
        "functions": {"0x10": "main", "0x20": "write"}
    }"#;

    #[test]
    fn test_parse_cfg() {
        let loaded = parse_cfg(SMALL).unwrap();
        let cfg = &loaded.cfg;
        assert_eq!(cfg.block_count(), 3);
        assert_eq!(cfg.edge_count(), 2);

        let site = cfg.block(0x10).unwrap();
        assert_eq!(site.instr_count, 2);
        assert!(site.ends_with(TransferKind::CallIndirect));
        assert_eq!(site.binary.as_ref(), "main");

        let estimated = cfg.block(0x20).unwrap();
        assert!(estimated.instr_count_estimated);
        assert_eq!(estimated.instr_count, 2);
        assert_eq!(estimated.in_plt, Some(false));

        assert_eq!(cfg.block(0x30).unwrap().terminator, None);
        assert_eq!(
            cfg.edge_kind(NodeId::Addr(0x10), NodeId::Addr(0x30)),
            Some(TransferKind::Follow)
        );
        assert!(cfg.edge(NodeId::Addr(0x10), NodeId::Addr(0x20)).unwrap().observed_by("cfggrind"));
        assert_eq!(loaded.functions.get(&0x20).map(String::as_str), Some("write"));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let json = r#"{"blocks": {"0x10": {"addr": "0x10", "size": 4, "instr_sizes": [4],
            "end_insn_indir": null, "out_edges": [{"to": "0x99", "type": "jump_direct", "how": []}]}}}"#;
        assert!(matches!(
            parse_cfg(json),
            Err(Error::Graph(oag_graph::GraphError::DanglingEdge { .. }))
        ));
    }

    #[test]
    fn test_key_mismatch_rejected() {
        let json = r#"{"blocks": {"0x10": {"addr": "0x11", "size": 4, "end_insn_indir": null}}}"#;
        assert!(matches!(parse_cfg(json), Err(Error::AddrMismatch { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, SMALL).unwrap();
        let loaded = load_cfg(&path).unwrap();
        assert_eq!(loaded.cfg.block_count(), 3);
    }
}
