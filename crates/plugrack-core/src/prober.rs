//! Module prober.
//!
//! Reads a candidate's declared type straight from the file bytes. The file
//! is never handed to the dynamic linker here, so none of its initializers
//! run; discovery can walk directories full of unrelated shared objects
//! without mapping any of them.

use std::io::{ErrorKind, Read};
use std::path::Path;

use plugrack_sdk::{ModuleRecord, RecordError, MAGIC, RECORD_LEN};

/// Bytes read from the file per step.
const CHUNK_LEN: usize = 64 * 1024;

/// Why a candidate was skipped.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("no module record present")]
    NotAModule,

    #[error("unreadable module record: {0}")]
    Record(#[from] RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads module records without loading modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct Prober;

impl Prober {
    pub fn new() -> Self {
        Self
    }

    /// Read the module record of `path`.
    ///
    /// The file is streamed; reading stops as soon as a record decodes.
    pub fn peek(&self, path: &Path) -> Result<ModuleRecord, ProbeError> {
        let file = std::fs::File::open(path)?;
        scan(file)
    }

    /// Whether `path` carries the platform's shared-library extension.
    pub fn is_module_file(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
    }

    /// Filename prefix filter: `checkpoint_blcr.so` and `libcheckpoint_blcr.so`
    /// both match `checkpoint`.
    pub fn matches_major(file_name: &str, major: &str) -> bool {
        file_name
            .strip_prefix("lib")
            .unwrap_or(file_name)
            .starts_with(major)
    }
}

/// Find the first magic that decodes into a record.
///
/// A magic that fails to decode is remembered and reported only if nothing
/// after it decodes either. Memory stays bounded by one chunk plus the
/// `RECORD_LEN - 1` byte tail carried between chunks, so a record split
/// across two reads is still seen whole.
fn scan<R: Read>(mut reader: R) -> Result<ModuleRecord, ProbeError> {
    let mut window: Vec<u8> = Vec::with_capacity(CHUNK_LEN + RECORD_LEN);
    let mut chunk = vec![0u8; CHUNK_LEN];
    let mut first_error = None;

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let eof = n == 0;
        window.extend_from_slice(&chunk[..n]);

        // Before EOF only offsets with a whole record behind them are tried.
        let limit = if eof {
            window.len()
        } else {
            window.len().saturating_sub(RECORD_LEN - 1)
        };

        let mut offset = 0;
        while let Some(found) = find_magic(&window[offset..]) {
            let start = offset + found;
            if start >= limit {
                break;
            }
            match ModuleRecord::decode(&window[start..]) {
                Ok(record) => return Ok(record),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
            offset = start + 1;
        }

        if eof {
            break;
        }
        window.drain(..limit);
    }

    Err(first_error.map_or(ProbeError::NotAModule, ProbeError::Record))
}

fn find_magic(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(MAGIC.len())
        .position(|window| window == MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugrack_sdk::record::encode;
    use std::io::Write;

    fn module_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn test_peek_finds_record_inside_junk() {
        let mut contents = b"\x7fELF not really an elf".to_vec();
        contents.extend_from_slice(&encode("checkpoint/blcr", 0, "1.0.0", "*", "BLCR"));
        contents.extend_from_slice(&[0xAA; 64]);

        let record = Prober::new().peek(module_file(&contents).path()).unwrap();
        assert_eq!(record.full_type, "checkpoint/blcr");
    }

    #[test]
    fn test_peek_skips_stray_magic() {
        let mut contents = b"strings: PLUGRACK_MODULE_RECORD PLUGRACK\0".to_vec();
        contents.extend_from_slice(&encode("namespace/tmpfs", 0, "1.0.0", "*", "tmpfs"));

        let record = Prober::new().peek(module_file(&contents).path()).unwrap();
        assert_eq!(record.full_type, "namespace/tmpfs");
    }

    #[test]
    fn test_peek_without_record() {
        let err = Prober::new()
            .peek(module_file(b"just some bytes").path())
            .unwrap_err();
        assert!(matches!(err, ProbeError::NotAModule));
    }

    #[test]
    fn test_peek_reports_broken_record() {
        let mut bytes = encode("checkpoint/blcr", 0, "1.0.0", "*", "BLCR");
        bytes[8] = 2;
        let err = Prober::new().peek(module_file(&bytes).path()).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Record(RecordError::LayoutMismatch { found: 2, .. })
        ));
    }

    #[test]
    fn test_peek_large_file() {
        // Well past one chunk, with nothing read beyond the record.
        let mut contents = vec![0x5A; 3 * CHUNK_LEN + 17];
        contents.extend_from_slice(&encode("checkpoint/blcr", 0, "1.0.0", "*", "BLCR"));
        contents.extend(std::iter::repeat(0xA5).take(CHUNK_LEN));

        let record = Prober::new().peek(module_file(&contents).path()).unwrap();
        assert_eq!(record.full_type, "checkpoint/blcr");
    }

    #[test]
    fn test_peek_record_split_across_chunks() {
        for lead in [CHUNK_LEN - RECORD_LEN, CHUNK_LEN - RECORD_LEN + 1, CHUNK_LEN - 4, CHUNK_LEN - 1] {
            let mut contents = vec![0u8; lead];
            contents.extend_from_slice(&encode("namespace/tmpfs", 3, "1.0.0", "*", "tmpfs"));
            contents.extend_from_slice(&[0u8; 32]);

            let record = Prober::new().peek(module_file(&contents).path()).unwrap();
            assert_eq!(record.full_type, "namespace/tmpfs", "lead {lead}");
            assert_eq!(record.plugin_id, 3);
        }
    }

    #[test]
    fn test_peek_truncated_record_at_end() {
        let bytes = encode("checkpoint/blcr", 0, "1.0.0", "*", "BLCR");
        let err = Prober::new()
            .peek(module_file(&bytes[..RECORD_LEN / 2]).path())
            .unwrap_err();
        assert!(matches!(err, ProbeError::Record(RecordError::Truncated { .. })));
    }

    #[test]
    fn test_is_module_file() {
        let name = format!("checkpoint_blcr{}", std::env::consts::DLL_SUFFIX);
        assert!(Prober::is_module_file(Path::new(&name)));
        assert!(!Prober::is_module_file(Path::new("checkpoint_blcr.txt")));
        assert!(!Prober::is_module_file(Path::new("checkpoint_blcr")));
    }

    #[test]
    fn test_matches_major() {
        assert!(Prober::matches_major("checkpoint_blcr.so", "checkpoint"));
        assert!(Prober::matches_major("libcheckpoint_blcr.so", "checkpoint"));
        assert!(!Prober::matches_major("libmpi_pmix.so", "checkpoint"));
        assert!(!Prober::matches_major("libc.so", "checkpoint"));
    }
}
