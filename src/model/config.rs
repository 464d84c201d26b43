use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::config_error;

pub const CONFIG_ENV: &str = "SNAPKEEP_CONFIG";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConfig {
    pub version: u32,

    pub source_root: PathBuf,
    pub output_dir: PathBuf,

    /// Destination for critical-file duplicates, outside the snapshot rotation.
    #[serde(default)]
    pub critical_dir: Option<PathBuf>,

    /// Glob patterns excluded from snapshots, matched against paths relative
    /// to `source_root`.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Explicitly enumerated files that must survive even a broken snapshot
    /// mechanism. Never touched by rotation.
    #[serde(default)]
    pub critical_files: Vec<PathBuf>,

    /// Files larger than this many bytes are skipped (and counted).
    #[serde(default)]
    pub max_file_bytes: Option<u64>,

    /// Abort a snapshot run exceeding this many seconds.
    #[serde(default)]
    pub max_run_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Keep at least the most recent N snapshots.
    #[serde(default)]
    pub keep_last_n: Option<u64>,

    /// Keep snapshots newer than N days.
    #[serde(default)]
    pub keep_days: Option<u64>,
}

impl BackupConfig {
    /// Load from `path`, or `$SNAPKEEP_CONFIG` when no path is given.
    /// `SNAPKEEP_SOURCE_ROOT`, `SNAPKEEP_OUTPUT_DIR` and `SNAPKEEP_CRITICAL_DIR`
    /// override the file's values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => PathBuf::from(p),
                None => {
                    return Err(config_error(format!(
                        "no config file given (pass --config or set ${CONFIG_ENV})"
                    )));
                }
            },
        };

        let bytes = fs::read(&path)
            .map_err(|e| config_error(format!("read config {}: {e}", path.display())))?;
        let mut cfg: Self = serde_json::from_slice(&bytes)
            .map_err(|e| config_error(format!("parse config {}: {e}", path.display())))?;
        if cfg.version != 1 {
            return Err(config_error(format!(
                "unsupported config version {}",
                cfg.version
            )));
        }

        if let Some(v) = std::env::var_os("SNAPKEEP_SOURCE_ROOT") {
            cfg.source_root = PathBuf::from(v);
        }
        if let Some(v) = std::env::var_os("SNAPKEEP_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(v);
        }
        if let Some(v) = std::env::var_os("SNAPKEEP_CRITICAL_DIR") {
            cfg.critical_dir = Some(PathBuf::from(v));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Structural checks with no filesystem side effects. Path existence is
    /// checked by the operation that needs the path.
    pub fn validate(&self) -> Result<()> {
        if !self.critical_files.is_empty() && self.critical_dir.is_none() {
            return Err(config_error(
                "critical_files configured but critical_dir is not set",
            ));
        }

        let mut names = std::collections::HashSet::new();
        for path in &self.critical_files {
            let name = critical_name(path)?;
            if !names.insert(name.to_string()) {
                return Err(config_error(format!(
                    "critical_files contains duplicate file name {name:?}"
                )));
            }
        }

        for pattern in &self.exclude {
            globset::Glob::new(pattern)
                .map_err(|e| config_error(format!("invalid exclude pattern {pattern:?}: {e}")))?;
        }
        Ok(())
    }

    pub fn exclude_matcher(&self) -> Result<globset::GlobSet> {
        let mut builder = globset::GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = globset::Glob::new(pattern)
                .map_err(|e| config_error(format!("invalid exclude pattern {pattern:?}: {e}")))?;
            builder.add(glob);
        }
        builder.build().context("build exclude matcher")
    }
}

/// File name a critical file is duplicated under.
pub fn critical_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| config_error(format!("critical file has no usable name: {}", path.display())))
}
