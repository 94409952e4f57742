//! Loaders for the merged CFG and its auxiliary tables, writers for derived data.
//!
//! Every loader accepts zstd-compressed input when the path ends in `.zst`.

mod callsites;
mod cfg;
mod tables;
mod write;

pub use callsites::*;
pub use cfg::*;
pub use tables::*;
pub use write::*;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Open `path` for reading, decompressing `.zst` files on the fly.
pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    if path.extension().is_some_and(|ext| ext == "zst") {
        Ok(Box::new(zstd::stream::Decoder::with_buffer(file)?))
    } else {
        Ok(Box::new(file))
    }
}

/// Deserialize a JSON document from `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(serde_json::from_reader(open_input(path)?)?)
}

/// `0x`-prefixed hexadecimal address as found in the JSON inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct Hex(pub u64);

impl TryFrom<String> for Hex {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| format!("address '{s}' lacks 0x prefix"))?;
        u64::from_str_radix(digits, 16)
            .map(Hex)
            .map_err(|e| format!("address '{s}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_hex() {
        assert_eq!(Hex::try_from("0x1f".to_string()), Ok(Hex(0x1f)));
        assert!(Hex::try_from("1f".to_string()).is_err());
        assert!(Hex::try_from("0xzz".to_string()).is_err());
    }

    #[test]
    fn test_open_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json.zst");
        let file = File::create(&path).unwrap();
        let mut encoder = zstd::stream::Encoder::new(file, 3).unwrap();
        encoder.write_all(br#"["0x10", "0x20"]"#).unwrap();
        encoder.finish().unwrap();

        let addrs: Vec<Hex> = read_json(&path).unwrap();
        assert_eq!(addrs, vec![Hex(0x10), Hex(0x20)]);
    }
}
