use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

pub const OPLOG_FILE: &str = "ops.log";

/// One line per run in the append-only operational log. This is the only
/// monitoring surface the scheduler sees besides the exit code.
#[derive(Debug, Serialize)]
pub struct OpLogEntry {
    pub ts: String,
    pub mode: &'static str,
    /// "ok", "error" or "skipped" (lock held).
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl OpLogEntry {
    pub fn new(mode: &'static str, result: &'static str) -> Self {
        let ts = time::OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            ts,
            mode,
            result,
            snapshot_id: None,
            bytes: None,
            detail: None,
        }
    }
}

pub fn append(dir: &Path, entry: &OpLogEntry) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(OPLOG_FILE);
    let mut line = serde_json::to_vec(entry).context("serialize op log entry")?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open op log {}", path.display()))?;
    file.write_all(&line)
        .with_context(|| format!("append op log {}", path.display()))?;
    Ok(())
}
