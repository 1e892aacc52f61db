//! Face index configuration

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

/// Maximum embedding distance at which two faces count as the same person
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Environment variable overriding `index.root`
pub const INDEX_ROOT_ENV: &str = "FACES_DIR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub matching: MatchingConfig,
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One directory per event, one file per face
    #[default]
    Fs,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub root: PathBuf,
    pub backend: StorageBackend,
    pub sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub timeout_ms: u64,
    /// Detection upsampling used on the first attempt
    pub upsample: u32,
    /// Upsampling for the single retry when nothing was found; absent or 0 disables it
    pub retry_upsample: Option<u32>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "faceindex.toml"
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.override_root(std::env::var_os(INDEX_ROOT_ENV));
    }

    fn override_root(&mut self, root: Option<OsString>) {
        if let Some(root) = root.filter(|r| !r.is_empty()) {
            self.index.root = PathBuf::from(root);
        }
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = self.matching.threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            bail!("matching.threshold must be a finite non-negative number, got {threshold}");
        }
        if self.oracle.timeout_ms == 0 {
            bail!("oracle.timeout_ms must be greater than zero");
        }
        if self.index.root.as_os_str().is_empty() {
            bail!("index.root must not be empty");
        }
        Ok(())
    }
}

impl IndexConfig {
    /// SQLite database location, defaulting to a file under the index root
    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| self.root.join("faces.db"))
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("faces_index"),
            backend: StorageBackend::Fs,
            sqlite_path: None,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            upsample: 1,
            retry_upsample: Some(2),
        }
    }
}
