//! Module record definition.
//!
//! Every module exports one fixed-layout record describing what it is. The
//! host reads it straight from the file bytes, before the dynamic linker ever
//! sees the module, so the layout below is an ABI and must only ever grow by
//! bumping [`LAYOUT_VERSION`].
//!
//! ```text
//! offset  size  field
//!      0     8  magic "PLUGRACK"
//!      8     4  layout version (LE)
//!     12     4  plugin id (LE, 0 = none)
//!     16    96  full type "<major>/<minor>", NUL padded
//!    112    32  module version (semver), NUL padded
//!    144    32  host requirement (semver req), NUL padded
//!    176    64  display name, NUL padded
//! ```

use std::fmt::{self, Display, Formatter};

/// Leading bytes of every record.
pub const MAGIC: [u8; 8] = *b"PLUGRACK";

/// Current record layout version.
pub const LAYOUT_VERSION: u32 = 1;

/// Name of the exported record symbol.
pub const RECORD_SYMBOL: &str = "PLUGRACK_MODULE_RECORD";

pub const FULL_TYPE_CAP: usize = 96;
pub const VERSION_CAP: usize = 32;
pub const REQUIRES_CAP: usize = 32;
pub const NAME_CAP: usize = 64;

const LAYOUT_OFFSET: usize = 8;
const PLUGIN_ID_OFFSET: usize = 12;
const FULL_TYPE_OFFSET: usize = 16;
const VERSION_OFFSET: usize = FULL_TYPE_OFFSET + FULL_TYPE_CAP;
const REQUIRES_OFFSET: usize = VERSION_OFFSET + VERSION_CAP;
const NAME_OFFSET: usize = REQUIRES_OFFSET + REQUIRES_CAP;

/// Total encoded size of a record.
pub const RECORD_LEN: usize = NAME_OFFSET + NAME_CAP;

/// Encode a record at compile time.
///
/// Panics (a compile error when used in a `static`) if a field does not fit
/// or contains a NUL byte.
pub const fn encode(
    full_type: &str,
    plugin_id: u32,
    version: &str,
    requires: &str,
    name: &str,
) -> [u8; RECORD_LEN] {
    let mut out = [0u8; RECORD_LEN];

    let mut i = 0;
    while i < MAGIC.len() {
        out[i] = MAGIC[i];
        i += 1;
    }

    out = put_u32(out, LAYOUT_OFFSET, LAYOUT_VERSION);
    out = put_u32(out, PLUGIN_ID_OFFSET, plugin_id);
    out = put_str(out, FULL_TYPE_OFFSET, FULL_TYPE_CAP, full_type);
    out = put_str(out, VERSION_OFFSET, VERSION_CAP, version);
    out = put_str(out, REQUIRES_OFFSET, REQUIRES_CAP, requires);
    out = put_str(out, NAME_OFFSET, NAME_CAP, name);
    out
}

const fn put_u32(mut out: [u8; RECORD_LEN], offset: usize, value: u32) -> [u8; RECORD_LEN] {
    let bytes = value.to_le_bytes();
    let mut i = 0;
    while i < 4 {
        out[offset + i] = bytes[i];
        i += 1;
    }
    out
}

const fn put_str(
    mut out: [u8; RECORD_LEN],
    offset: usize,
    cap: usize,
    value: &str,
) -> [u8; RECORD_LEN] {
    let bytes = value.as_bytes();
    // One byte is always left for the terminating NUL.
    if bytes.len() >= cap {
        panic!("module record field too long");
    }
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0 {
            panic!("module record field contains NUL");
        }
        out[offset + i] = bytes[i];
        i += 1;
    }
    out
}

/// Decoded module record with owned strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Declared full type, `<major>/<minor>`
    pub full_type: String,

    /// Numeric plugin identifier, 0 when the module declares none
    pub plugin_id: u32,

    /// Module version
    pub version: String,

    /// Host version requirement
    pub requires: String,

    /// Display name
    pub name: String,
}

impl ModuleRecord {
    /// Build a record in memory.
    pub fn new(full_type: impl Into<String>, plugin_id: u32) -> Self {
        let full_type = full_type.into();
        Self {
            name: full_type.clone(),
            full_type,
            plugin_id,
            version: "0.0.0".to_string(),
            requires: "*".to_string(),
        }
    }

    /// Set the module version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the host requirement.
    pub fn with_requires(mut self, requires: impl Into<String>) -> Self {
        self.requires = requires.into();
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The capability family, everything before the first `/`.
    pub fn major_type(&self) -> &str {
        self.full_type
            .split_once('/')
            .map(|(major, _)| major)
            .unwrap_or(&self.full_type)
    }

    /// The implementation name, everything after the first `/`.
    pub fn minor_type(&self) -> &str {
        self.full_type
            .split_once('/')
            .map(|(_, minor)| minor)
            .unwrap_or("")
    }

    /// Encode into the on-disk layout.
    ///
    /// # Panics
    /// Panics if a field exceeds its capacity; use [`ModuleRecord::decode`]
    /// produced values or validated input.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        encode(
            &self.full_type,
            self.plugin_id,
            &self.version,
            &self.requires,
            &self.name,
        )
    }

    /// Decode a record from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_LEN {
            return Err(RecordError::Truncated {
                expected: RECORD_LEN,
                found: bytes.len(),
            });
        }
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(RecordError::BadMagic);
        }

        let layout = read_u32(bytes, LAYOUT_OFFSET);
        if layout != LAYOUT_VERSION {
            return Err(RecordError::LayoutMismatch {
                expected: LAYOUT_VERSION,
                found: layout,
            });
        }

        let full_type = read_str(bytes, FULL_TYPE_OFFSET, FULL_TYPE_CAP, "full_type")?;
        match full_type.split_once('/') {
            Some((major, minor)) if !major.is_empty() && !minor.is_empty() => {}
            _ => return Err(RecordError::InvalidType(full_type)),
        }

        Ok(Self {
            full_type,
            plugin_id: read_u32(bytes, PLUGIN_ID_OFFSET),
            version: read_str(bytes, VERSION_OFFSET, VERSION_CAP, "version")?,
            requires: read_str(bytes, REQUIRES_OFFSET, REQUIRES_CAP, "requires")?,
            name: read_str(bytes, NAME_OFFSET, NAME_CAP, "name")?,
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_str(
    bytes: &[u8],
    offset: usize,
    cap: usize,
    field: &'static str,
) -> Result<String, RecordError> {
    let slot = &bytes[offset..offset + cap];
    let end = slot
        .iter()
        .position(|b| *b == 0)
        .ok_or(RecordError::Unterminated(field))?;
    String::from_utf8(slot[..end].to_vec()).map_err(|e| RecordError::InvalidUtf8(field, e))
}

impl Display for ModuleRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} ({})", self.name, self.version, self.full_type)?;
        if self.plugin_id != 0 {
            write!(f, " id={}", self.plugin_id)?;
        }
        Ok(())
    }
}

/// Record decoding errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordError {
    #[error("record truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("record magic not present")]
    BadMagic,

    #[error("record layout mismatch: expected {expected}, found {found}")]
    LayoutMismatch { expected: u32, found: u32 },

    #[error("record field '{0}' is not NUL terminated")]
    Unterminated(&'static str),

    #[error("invalid UTF-8 in record field '{0}': {1}")]
    InvalidUtf8(&'static str, #[source] std::string::FromUtf8Error),

    #[error("declared type '{0}' is not of the form <major>/<minor>")]
    InvalidType(String),
}
