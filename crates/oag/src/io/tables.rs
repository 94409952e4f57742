//! Auxiliary tables: DWARF signatures, process map, call-site symbol map.

use std::path::Path;

use oag_policy::SignatureTable;
use serde::Deserialize;
use tracing::{debug, info_span};

use super::{Hex, read_json};
use crate::Result;

#[derive(Deserialize)]
struct DwarfFunction {
    addr: Hex,
    /// Return type first, then the parameters.
    return_parameter_types: Vec<String>,
}

/// Load DWARF function signatures. Return types are dropped.
pub fn load_signatures(path: &Path) -> Result<SignatureTable> {
    let _span = info_span!("load_signatures", path = %path.display()).entered();
    let functions: Vec<DwarfFunction> = read_json(path)?;
    let mut table = SignatureTable::new();
    for function in functions {
        table.insert_with_return(function.addr.0, function.return_parameter_types);
    }
    debug!(functions = table.len(), "signatures loaded");
    Ok(table)
}

/// Memory layout summary of the traced process.
#[derive(Clone, Debug, Deserialize)]
pub struct ProcessMap {
    pub main: MappedBinary,
    /// Bytes of executable code across all loaded binaries.
    #[serde(default)]
    pub total_exec_size: Option<usize>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MappedBinary {
    /// Path of the binary, relative to the binary directory.
    pub bpath: String,
}

impl ProcessMap {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// File name of the main binary, as recorded on CFG blocks.
    pub fn main_binary(&self) -> &str {
        Path::new(&self.main.bpath)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.main.bpath)
    }
}

/// Source location of one indirect call site.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SiteLocation {
    pub binary: String,
    pub addr: Hex,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Load the symbolized call-site map.
pub fn load_symbol_map(path: &Path) -> Result<Vec<SiteLocation>> {
    read_json(path)
}
