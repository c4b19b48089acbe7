//! Configuration Module
//!
//! Handles loading and managing store configuration from environment variables.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Default shared-memory region capacity in bytes (4 MiB).
pub const DEFAULT_REGION_CAPACITY: u64 = 4 * 1024 * 1024;

/// Prefix applied to region file names so stores never clobber foreign files.
const REGION_FILE_PREFIX: &str = "shmkv.";

/// Store configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding shared-memory region files
    pub dir: PathBuf,
    /// Capacity in bytes for newly created regions when none is given
    pub default_capacity: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SHMKV_DIR` - Region directory (default: `/dev/shm`, or the OS temp
    ///   directory where `/dev/shm` does not exist)
    /// - `SHMKV_DEFAULT_CAPACITY` - Region capacity in bytes (default: 4 MiB)
    pub fn from_env() -> Self {
        Self {
            dir: env::var_os("SHMKV_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_region_dir),
            default_capacity: env::var("SHMKV_DEFAULT_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_REGION_CAPACITY),
        }
    }

    /// Resolves a store name to the region file path inside `dir`.
    ///
    /// Names are plain identifiers, not paths: anything containing a path
    /// separator, a NUL byte, or nothing at all is rejected with
    /// [`StoreError::InvalidName`].
    pub fn region_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{REGION_FILE_PREFIX}{name}")))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: default_region_dir(),
            default_capacity: DEFAULT_REGION_CAPACITY,
        }
    }
}

/// Picks `/dev/shm` (tmpfs, genuinely memory-backed) when present,
/// falling back to the OS temp directory elsewhere.
fn default_region_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        env::temp_dir()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.contains(['/', '\\', '\0'])
        && name != "."
        && name != "..";
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.default_capacity, DEFAULT_REGION_CAPACITY);
        assert!(config.dir.is_absolute());
    }

    #[test]
    fn test_region_path_prefixed() {
        let config = Config {
            dir: PathBuf::from("/dev/shm"),
            default_capacity: DEFAULT_REGION_CAPACITY,
        };
        let path = config.region_path("sessions").unwrap();
        assert_eq!(path, PathBuf::from("/dev/shm/shmkv.sessions"));
    }

    #[test]
    fn test_region_path_rejects_bad_names() {
        let config = Config::default();
        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0byte"] {
            let result = config.region_path(bad);
            assert!(
                matches!(result, Err(StoreError::InvalidName(_))),
                "name {:?} should be rejected",
                bad
            );
        }
    }
}
