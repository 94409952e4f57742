//! Node identifiers, block attributes and edge attributes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::Distance;

/// Node identifier.
///
/// Addresses sort numerically and before every symbolic node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    /// Basic block start address.
    Addr(u64),
    /// The security-relevant sink (`target`).
    Sink,
    /// "Could be anywhere" hub of the least precise policy (`any`).
    AnyHub,
    /// Synthetic per-policy hub.
    Virtual(HubLabel),
}

impl NodeId {
    pub const fn addr(self) -> Option<u64> {
        match self {
            Self::Addr(addr) => Some(addr),
            _ => None,
        }
    }

    /// Hubs are not real code: `any` and every virtual node.
    pub const fn is_hub(self) -> bool {
        matches!(self, Self::AnyHub | Self::Virtual(_))
    }

    pub const fn is_sink(self) -> bool {
        matches!(self, Self::Sink)
    }
}

impl From<u64> for NodeId {
    fn from(addr: u64) -> Self {
        Self::Addr(addr)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addr(addr) => write!(f, "0x{addr:x}"),
            Self::Sink => f.write_str("target"),
            Self::AnyHub => f.write_str("any"),
            Self::Virtual(label) => write!(f, "virtual{label}"),
        }
    }
}

/// Error parsing a node identifier or transfer kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier '{0}'")]
pub struct ParseNodeError(pub String);

impl FromStr for NodeId {
    type Err = ParseNodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseNodeError(s.to_string());
        match s {
            "target" => return Ok(Self::Sink),
            "any" => return Ok(Self::AnyHub),
            _ => {}
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16).map(Self::Addr).map_err(|_| err());
        }
        let label = s.strip_prefix("virtual").ok_or_else(err)?;
        label.parse().map(Self::Virtual).map_err(|_| err())
    }
}

/// Label of a virtual hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HubLabel {
    /// Numeric CFI bin: every function entry at this sink distance.
    Distance(Distance),
    /// Argument-count CFI class.
    ArgCount(i64),
    /// Every function entry.
    Functions,
}

impl fmt::Display for HubLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distance(Distance::Finite(d)) => write!(f, "{d:03}"),
            Self::Distance(Distance::Infinite) => f.write_str("inf"),
            Self::ArgCount(n) => write!(f, "{n:02}"),
            Self::Functions => f.write_str("function"),
        }
    }
}

impl FromStr for HubLabel {
    type Err = ParseNodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseNodeError(s.to_string());
        match s {
            "function" => Ok(Self::Functions),
            "inf" => Ok(Self::Distance(Distance::Infinite)),
            _ => {
                // Distances are padded to three digits, counts to two.
                if s.len() <= 2 || s.starts_with('-') {
                    s.parse().map(Self::ArgCount).map_err(|_| err())
                } else {
                    s.parse()
                        .map(|d| Self::Distance(Distance::Finite(d)))
                        .map_err(|_| err())
                }
            }
        }
    }
}

/// Classification of a control transfer (and of a block's last instruction).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransferKind {
    Follow,
    JumpDirect,
    JumpIndirect,
    CallDirect,
    CallIndirect,
    Rep,
    Syscall,
    Ret,
    Misc,
    Unknown,
}

impl TransferKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::JumpDirect => "jump_direct",
            Self::JumpIndirect => "jump_indirect",
            Self::CallDirect => "call_direct",
            Self::CallIndirect => "call_indirect",
            Self::Rep => "rep",
            Self::Syscall => "syscall",
            Self::Ret => "ret",
            Self::Misc => "misc",
            Self::Unknown => "unknown",
        }
    }

    pub const fn is_indirect(self) -> bool {
        matches!(self, Self::JumpIndirect | Self::CallIndirect)
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = ParseNodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "follow" => Self::Follow,
            "jump_direct" => Self::JumpDirect,
            "jump_indirect" => Self::JumpIndirect,
            "call_direct" => Self::CallDirect,
            "call_indirect" => Self::CallIndirect,
            "rep" => Self::Rep,
            "syscall" => Self::Syscall,
            "ret" => Self::Ret,
            "misc" => Self::Misc,
            "unknown" => Self::Unknown,
            _ => return Err(ParseNodeError(s.to_string())),
        })
    }
}

/// Average instruction length assumed when disassembly failed.
pub const ESTIMATED_INSTR_SIZE: u64 = 5;

/// Basic block attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Size in bytes.
    pub size: u64,
    /// Number of instructions.
    pub instr_count: u64,
    /// `instr_count` was estimated from the size.
    pub instr_count_estimated: bool,
    /// Enclosing function entries (sorted).
    pub functions: Vec<u64>,
    /// Binary or shared object the block belongs to.
    pub binary: Arc<str>,
    /// Lies in a PLT stub. `None` when the front end did not say.
    pub in_plt: Option<bool>,
    /// Last instruction classification. `None` when disassembly failed.
    pub terminator: Option<TransferKind>,
    /// Upstream sources that observed the block.
    pub found_by: Vec<String>,
}

impl Block {
    pub fn new(size: u64, instr_count: u64) -> Self {
        Self {
            size,
            instr_count,
            instr_count_estimated: false,
            functions: Vec::new(),
            binary: Arc::from(""),
            in_plt: None,
            terminator: None,
            found_by: Vec::new(),
        }
    }

    /// Block whose instructions could not be disassembled.
    pub fn estimated(size: u64) -> Self {
        Self {
            instr_count_estimated: true,
            ..Self::new(size, size / ESTIMATED_INSTR_SIZE)
        }
    }

    #[must_use]
    pub fn with_terminator(mut self, terminator: TransferKind) -> Self {
        self.terminator = Some(terminator);
        self
    }

    #[must_use]
    pub fn with_binary(mut self, binary: Arc<str>) -> Self {
        self.binary = binary;
        self
    }

    #[must_use]
    pub fn with_functions(mut self, mut functions: Vec<u64>) -> Self {
        functions.sort_unstable();
        functions.dedup();
        self.functions = functions;
        self
    }

    #[must_use]
    pub fn with_in_plt(mut self, in_plt: bool) -> Self {
        self.in_plt = Some(in_plt);
        self
    }

    #[must_use]
    pub fn with_found_by(mut self, found_by: Vec<String>) -> Self {
        self.found_by = found_by;
        self
    }

    pub fn is_plt(&self) -> bool {
        self.in_plt.unwrap_or(false)
    }

    pub fn ends_with(&self, kind: TransferKind) -> bool {
        self.terminator == Some(kind)
    }
}

/// Edge attributes of a ground-truth transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeAttrs {
    pub kind: TransferKind,
    /// Upstream sources that observed the edge.
    pub how: Vec<String>,
}

impl EdgeAttrs {
    pub const fn new(kind: TransferKind) -> Self {
        Self {
            kind,
            how: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_how(mut self, how: Vec<String>) -> Self {
        self.how = how;
        self
    }

    pub fn observed_by(&self, source: &str) -> bool {
        self.how.iter().any(|h| h == source)
    }
}
