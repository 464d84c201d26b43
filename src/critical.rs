use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};

use crate::error::config_error;
use crate::lock::DirLock;
use crate::model::{BackupConfig, CriticalCopy, critical_name};
use crate::store::write_atomic;

/// Sidecar suffix for the per-copy checksum.
pub const CHECKSUM_SUFFIX: &str = ".b3";

#[derive(Clone, Debug, Default)]
pub struct CopyReport {
    pub copied: Vec<CriticalCopy>,
    pub failed: Vec<CopyFailure>,
}

#[derive(Clone, Debug)]
pub struct CopyFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl CopyReport {
    pub fn failed_names(&self) -> String {
        self.failed
            .iter()
            .map(|f| f.path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Copy the explicitly enumerated critical files into `critical_dir`, each
/// all-or-nothing (temp write, checksum verify, rename) with one retry on a
/// checksum mismatch. One file's failure never blocks the others; the report
/// names exactly which files failed. Runs under its own directory lock,
/// independent of any snapshot run.
pub fn duplicate(cfg: &BackupConfig) -> Result<CopyReport> {
    if cfg.critical_files.is_empty() {
        return Ok(CopyReport::default());
    }
    let dest = cfg
        .critical_dir
        .as_deref()
        .ok_or_else(|| config_error("critical_files configured but critical_dir is not set"))?;

    let _lock = DirLock::acquire(dest)?;

    let mut report = CopyReport::default();
    for path in &cfg.critical_files {
        match copy_one(path, dest) {
            Ok(copy) => {
                tracing::debug!(name = %copy.name, checksum = %copy.checksum, "critical copy ok");
                report.copied.push(copy);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "critical copy failed");
                report.failed.push(CopyFailure {
                    path: path.clone(),
                    reason: format!("{err:#}"),
                });
            }
        }
    }
    Ok(report)
}

fn copy_one(source: &Path, dest: &Path) -> Result<CriticalCopy> {
    let name = critical_name(source)?.to_string();
    let bytes = fs::read(source).map_err(|e| anyhow!("read {}: {e}", source.display()))?;
    let checksum = blake3::hash(&bytes).to_hex().to_string();

    fs::create_dir_all(dest).map_err(|e| anyhow!("create {}: {e}", dest.display()))?;
    let target = dest.join(&name);
    let tmp = target.with_extension(format!("tmp.{}", std::process::id()));

    let result = (|| -> Result<()> {
        let mut actual = write_and_hash(&tmp, &bytes)?;
        if actual != checksum {
            tracing::warn!(name = %name, "checksum mismatch after copy, retrying once");
            actual = write_and_hash(&tmp, &bytes)?;
        }
        if actual != checksum {
            bail!("checksum mismatch after retry (expected {checksum}, got {actual})");
        }
        fs::rename(&tmp, &target)
            .map_err(|e| anyhow!("rename {} -> {}: {e}", tmp.display(), target.display()))?;
        Ok(())
    })();
    // A copy that fails verification is discarded, never left under a final
    // name.
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;

    write_atomic(
        &dest.join(format!("{name}{CHECKSUM_SUFFIX}")),
        format!("{checksum}\n").as_bytes(),
    )?;

    Ok(CriticalCopy { name, checksum })
}

/// Write the copy and hash what actually landed on disk.
fn write_and_hash(tmp: &Path, bytes: &[u8]) -> Result<String> {
    fs::write(tmp, bytes).map_err(|e| anyhow!("write {}: {e}", tmp.display()))?;
    crate::store::hash_file(tmp).map_err(|e| anyhow!("read back {}: {e}", tmp.display()))
}
