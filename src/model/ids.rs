use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Snapshot identity: UTC second timestamp plus a short content hash of the
/// finished archive. Two runs in the same second from different source states
/// still get distinct ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

const STAMP: &[BorrowedFormatItem<'_>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

pub fn compose_snapshot_id(
    created_at: OffsetDateTime,
    archive_checksum: &str,
) -> Result<SnapshotId> {
    let stamp = created_at
        .format(&STAMP)
        .map_err(|e| anyhow!("format snapshot timestamp: {e}"))?;
    let short = archive_checksum
        .get(..8)
        .ok_or_else(|| anyhow!("archive checksum too short: {archive_checksum:?}"))?;
    Ok(SnapshotId(format!("{stamp}-{short}")))
}
