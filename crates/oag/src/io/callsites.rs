//! Compiler call-site dumps.
//!
//! One record per indirect call the compiler emitted:
//!
//! ```text
//! src/core/ngx_module.c:41:12 'ngx_init' >int Pointer(void) long< "call i32 %5(...)"
//! ```
//!
//! A record may wrap over several lines; it ends with the line ending in `"`.
//! Types are space separated, return type first.

use std::path::Path;
use std::sync::LazyLock;

use oag_policy::CallSiteSignatures;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::{debug, info_span};

use super::SiteLocation;
use crate::{Error, Result};

static RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<file>[^:]+):",
        r"(?:(?P<unknown>0)|(?P<line>\d+):(?P<column>\d+))",
        r"(?: @\[.+ \]+)?",
        r" '(?P<function>[^']+)'",
        r" >(?P<types>[^']+)<",
        r#" "(?P<ir>.+)"$"#,
    ))
    .expect("call-site record pattern is valid")
});

/// One compiler call-site record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    pub file: String,
    /// `None` when the compiler had no line information.
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub function: String,
    /// Return type followed by the parameter types.
    pub types: Vec<String>,
}

impl CallRecord {
    pub fn parse(record: &str) -> Result<Self> {
        let bad = || Error::CallSiteRecord(record.to_string());
        let caps = RECORD.captures(record).ok_or_else(bad)?;

        let (line, column) = if caps.name("unknown").is_some() {
            (None, None)
        } else {
            let number = |name: &str| {
                caps.name(name)
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                    .ok_or_else(bad)
            };
            (Some(number("line")?), Some(number("column")?))
        };

        let types = caps["types"].split(' ').map(normalize_type).collect();
        Ok(Self {
            file: caps["file"].to_string(),
            line,
            column,
            function: caps["function"].to_string(),
            types,
        })
    }

    /// Parameter types without the return type.
    pub fn params(&self) -> &[String] {
        self.types.get(1..).unwrap_or_default()
    }
}

/// Compiler spelling differs from DWARF for `long`.
fn normalize_type(ty: &str) -> String {
    match ty {
        "long" => "long int".to_string(),
        "Pointer(long)" => "Pointer(long int)".to_string(),
        other => other.to_string(),
    }
}

/// Split a dump into records, joining wrapped lines.
pub fn parse_call_dump(text: &str) -> Result<Vec<CallRecord>> {
    let mut records = Vec::new();
    let mut pending = String::new();
    for line in text.lines() {
        pending.push_str(line);
        if line.ends_with('"') {
            records.push(CallRecord::parse(&pending)?);
            pending.clear();
        }
    }
    Ok(records)
}

/// Call-site records keyed by source location.
#[derive(Debug, Default)]
pub struct CallDump {
    by_location: FxHashMap<(String, u32, u32), CallRecord>,
}

impl CallDump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a dump file, or every `.txt` file of a dump directory.
    pub fn load(path: &Path) -> Result<Self> {
        let _span = info_span!("load_call_dump", path = %path.display()).entered();
        let mut dump = Self::new();
        if path.is_dir() {
            let mut files: Vec<_> = std::fs::read_dir(path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<_>>()?;
            files.retain(|file| file.extension().is_some_and(|ext| ext == "txt"));
            files.sort();
            for file in files {
                dump.extend(parse_call_dump(&std::fs::read_to_string(file)?)?);
            }
        } else {
            dump.extend(parse_call_dump(&std::fs::read_to_string(path)?)?);
        }
        debug!(records = dump.len(), "call-site records loaded");
        Ok(dump)
    }

    /// Add records with a known location; later records win.
    pub fn extend(&mut self, records: impl IntoIterator<Item = CallRecord>) {
        for record in records {
            if let (Some(line), Some(column)) = (record.line, record.column) {
                self.by_location
                    .insert((record.file.clone(), line, column), record);
            }
        }
    }

    pub fn get(&self, file: &str, line: u32, column: u32) -> Option<&CallRecord> {
        self.by_location.get(&(file.to_string(), line, column))
    }

    pub fn len(&self) -> usize {
        self.by_location.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_location.is_empty()
    }

    /// Join symbolized call sites with their records.
    pub fn call_site_signatures(&self, locations: &[SiteLocation]) -> CallSiteSignatures {
        let mut table = CallSiteSignatures::new();
        let mut unmatched = 0usize;
        for location in locations {
            match self.get(&location.file, location.line, location.column) {
                Some(record) => {
                    table.insert(&location.binary, location.addr.0, record.params().to_vec());
                }
                None => unmatched += 1,
            }
        }
        debug!(matched = table.len(), unmatched, "call sites joined");
        table
    }
}
