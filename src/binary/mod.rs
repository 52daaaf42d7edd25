//! Binary containers: single compiled units (PSPLC) and packages (PSPLP).
//!
//! # Container Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Fixed header (8 bytes)                                       │
//! │   magic "PSPLC" or "PSPLP" (5) | version (1) | mode (1) | 0  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Offset header: counts and absolute offsets of every table    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Object tables, data, file-stub tables, blobs, name strings   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every numeric field is a 32-bit integer. In single-order mode it occupies
//! 4 bytes; in bi-endian mode it occupies 8: the little-endian copy followed
//! by the big-endian copy, so a reader of either order can take its copy
//! without swapping. Hashes and strings are byte sequences and are never
//! duplicated.
//!
//! - [`writer`] - field writer producing the chosen byte order(s)
//! - [`reader`] - bounds-checked field reader
//! - [`records`] - object records shared by both containers
//! - [`compiled`] - PSPLC encode/decode

pub mod compiled;
pub mod reader;
pub(crate) mod records;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::diagnostics::Where;
use crate::error::{Error, Result};

pub use reader::FieldReader;
pub use writer::{FieldWriter, Region};

pub const MAGIC_COMPILED: [u8; 5] = *b"PSPLC";
pub const MAGIC_PACKAGE: [u8; 5] = *b"PSPLP";
pub const FORMAT_VERSION: u8 = 1;
pub const FIXED_HEADER_LEN: usize = 8;

/// Alignment of packaged file blobs and of the package end.
pub const BLOB_ALIGNMENT: usize = 32;

/// Alignment of object data copies.
pub const DATA_ALIGNMENT: usize = 4;

/// One concrete byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub fn other(self) -> Self {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    pub fn encode_u32(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn decode_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "le" | "little" => Ok(ByteOrder::Little),
            "be" | "big" => Ok(ByteOrder::Big),
            other => Err(format!("unknown byte order '{other}' (expected le or be)")),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        })
    }
}

/// Storage mode of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    Big,
    /// Every numeric field stored twice, little then big.
    Bi,
}

impl Endianness {
    pub const fn native() -> Self {
        match ByteOrder::native() {
            ByteOrder::Little => Endianness::Little,
            ByteOrder::Big => Endianness::Big,
        }
    }

    pub fn single(order: ByteOrder) -> Self {
        match order {
            ByteOrder::Little => Endianness::Little,
            ByteOrder::Big => Endianness::Big,
        }
    }

    /// Byte orders present in this mode, in storage order.
    pub fn orders(self) -> &'static [ByteOrder] {
        match self {
            Endianness::Little => &[ByteOrder::Little],
            Endianness::Big => &[ByteOrder::Big],
            Endianness::Bi => &[ByteOrder::Little, ByteOrder::Big],
        }
    }

    /// Bytes one numeric field occupies.
    pub fn field_width(self) -> usize {
        4 * self.orders().len()
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Endianness::Little => 1,
            Endianness::Big => 2,
            Endianness::Bi => 3,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Endianness::Little),
            2 => Some(Endianness::Big),
            3 => Some(Endianness::Bi),
            _ => None,
        }
    }

    /// The copy a reader on this host should use.
    pub fn preferred_order(self) -> ByteOrder {
        match self {
            Endianness::Little => ByteOrder::Little,
            Endianness::Big => ByteOrder::Big,
            Endianness::Bi => ByteOrder::native(),
        }
    }
}

impl FromStr for Endianness {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bi" | "both" => Ok(Endianness::Bi),
            other => other.parse::<ByteOrder>().map(Endianness::single),
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Endianness::Little => "little",
            Endianness::Big => "big",
            Endianness::Bi => "bi",
        })
    }
}

/// Container flavor, identified by magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Compiled,
    Package,
}

impl ContainerKind {
    pub fn magic(self) -> [u8; 5] {
        match self {
            ContainerKind::Compiled => MAGIC_COMPILED,
            ContainerKind::Package => MAGIC_PACKAGE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ContainerKind::Compiled => "PSPLC",
            ContainerKind::Package => "PSPLP",
        }
    }
}

/// The 8-byte header every container starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub kind: ContainerKind,
    pub version: u8,
    pub endianness: Endianness,
}

impl FixedHeader {
    pub fn new(kind: ContainerKind, endianness: Endianness) -> Self {
        Self {
            kind,
            version: FORMAT_VERSION,
            endianness,
        }
    }

    pub fn encode(&self) -> [u8; FIXED_HEADER_LEN] {
        let mut out = [0u8; FIXED_HEADER_LEN];
        out[..5].copy_from_slice(&self.kind.magic());
        out[5] = self.version;
        out[6] = self.endianness.to_byte();
        out
    }

    pub fn decode(data: &[u8], at: &Where) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(Error::decode(at.clone(), "container", "file shorter than its header"));
        }
        let kind = if data[..5] == MAGIC_COMPILED {
            ContainerKind::Compiled
        } else if data[..5] == MAGIC_PACKAGE {
            ContainerKind::Package
        } else {
            return Err(Error::decode(at.clone(), "container", "bad magic"));
        };
        let version = data[5];
        if version != FORMAT_VERSION {
            return Err(Error::decode(
                at.clone(),
                kind.name(),
                format!("unsupported version {version} (expected {FORMAT_VERSION})"),
            ));
        }
        let endianness = Endianness::from_byte(data[6]).ok_or_else(|| {
            Error::decode(at.clone(), kind.name(), format!("invalid endianness mode {}", data[6]))
        })?;
        Ok(Self {
            kind,
            version,
            endianness,
        })
    }
}

/// Round `value` up to a multiple of `alignment`.
pub fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Convert an in-memory size or offset to a 32-bit field.
pub(crate) fn to_u32(value: usize, what: &str, at: &Where) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        Error::config(
            at.clone(),
            format!("{what} ({value}) does not fit the 32-bit container format"),
        )
    })
}
