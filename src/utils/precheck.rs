//! File send precheck.
//!
//! Files are read fully into memory and then copied into the sealed
//! envelope, so a send is refused up front unless the file exists, fits
//! under the size ceiling and leaves enough headroom in available memory.

use crate::defaults::{MAX_FILE_SIZE, MEMORY_MARGIN};
use crate::utils::PrecheckError;
use std::path::{Path, PathBuf};

/// Reports how much memory the host can still hand out, in bytes
pub trait MemoryProbe {
    /// Currently available memory in bytes
    fn available_bytes(&self) -> Result<u64, PrecheckError>;
}

/// Reads `MemAvailable` from a Linux `meminfo` file
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl ProcMeminfo {
    /// Probe backed by `/proc/meminfo`
    pub fn new() -> Self {
        Self::at("/proc/meminfo")
    }

    /// Probe backed by a file in `meminfo` format
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcMeminfo {
    fn available_bytes(&self) -> Result<u64, PrecheckError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| PrecheckError::MemoryProbe {
            reason: format!("{}: {e}", self.path.display()),
        })?;
        parse_mem_available(&content).ok_or_else(|| PrecheckError::MemoryProbe {
            reason: format!("no MemAvailable entry in {}", self.path.display()),
        })
    }
}

/// Extract `MemAvailable` (reported in kB) as bytes
fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        kb.checked_mul(1024)
    })
}

/// Memory a file of `size` bytes needs before it may be sent
pub fn required_memory(size: u64) -> u64 {
    (size as f64 * MEMORY_MARGIN).ceil() as u64
}

/// Check that `path` may be sent. Returns the file size.
pub fn precheck_file(path: &Path, probe: &impl MemoryProbe) -> Result<u64, PrecheckError> {
    let metadata = std::fs::metadata(path).map_err(|e| PrecheckError::FileUnavailable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if !metadata.is_file() {
        return Err(PrecheckError::FileUnavailable {
            path: path.display().to_string(),
            reason: "not a regular file".to_string(),
        });
    }

    let size = metadata.len();
    if size > MAX_FILE_SIZE {
        return Err(PrecheckError::FileTooLarge {
            size,
            max: MAX_FILE_SIZE,
        });
    }

    let required = required_memory(size);
    let available = probe.available_bytes()?;
    if available < required {
        return Err(PrecheckError::InsufficientMemory {
            required,
            available,
        });
    }

    log::debug!(
        "Precheck passed for {} ({size} bytes, {available} bytes available)",
        path.display()
    );
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedProbe(Result<u64, PrecheckError>);

    impl MemoryProbe for FixedProbe {
        fn available_bytes(&self) -> Result<u64, PrecheckError> {
            self.0.clone()
        }
    }

    fn file_of(dir: &TempDir, len: usize) -> PathBuf {
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, vec![0u8; len]).unwrap();
        path
    }

    #[test]
    fn test_returns_size_when_memory_suffices() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, 1000);
        assert_eq!(precheck_file(&path, &FixedProbe(Ok(1500))), Ok(1000));
    }

    #[test]
    fn test_margin_is_enforced() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, 1000);
        assert_eq!(
            precheck_file(&path, &FixedProbe(Ok(1499))),
            Err(PrecheckError::InsufficientMemory {
                required: 1500,
                available: 1499
            })
        );
    }

    #[test]
    fn test_missing_file_and_directory() {
        let dir = TempDir::new().unwrap();
        let probe = FixedProbe(Ok(u64::MAX));
        assert!(matches!(
            precheck_file(&dir.path().join("nope"), &probe),
            Err(PrecheckError::FileUnavailable { .. })
        ));
        assert!(matches!(
            precheck_file(dir.path(), &probe),
            Err(PrecheckError::FileUnavailable { .. })
        ));
    }

    #[test]
    fn test_oversized_file_is_rejected_before_probing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sparse.bin");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_FILE_SIZE + 1).unwrap();

        let probe = FixedProbe(Err(PrecheckError::MemoryProbe {
            reason: "must not be called".to_string(),
        }));
        assert_eq!(
            precheck_file(&path, &probe),
            Err(PrecheckError::FileTooLarge {
                size: MAX_FILE_SIZE + 1,
                max: MAX_FILE_SIZE
            })
        );
    }

    #[test]
    fn test_probe_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, 10);
        let probe = ProcMeminfo::at(dir.path().join("meminfo-missing"));
        assert!(matches!(
            precheck_file(&path, &probe),
            Err(PrecheckError::MemoryProbe { .. })
        ));
    }

    #[test]
    fn test_proc_meminfo_parsing() {
        let dir = TempDir::new().unwrap();
        let meminfo = dir.path().join("meminfo");
        std::fs::write(
            &meminfo,
            "MemTotal:       16318480 kB\nMemFree:         1234567 kB\nMemAvailable:    8000000 kB\nBuffers:          123456 kB\n",
        )
        .unwrap();
        assert_eq!(
            ProcMeminfo::at(&meminfo).available_bytes(),
            Ok(8_000_000 * 1024)
        );

        assert_eq!(parse_mem_available("MemTotal: 10 kB\n"), None);
        assert_eq!(parse_mem_available("MemAvailable: lots kB\n"), None);
    }

    #[test]
    fn test_required_memory() {
        assert_eq!(required_memory(0), 0);
        assert_eq!(required_memory(3), 5);
        assert_eq!(required_memory(1024), 1536);
    }
}
