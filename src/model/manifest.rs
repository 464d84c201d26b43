use serde::{Deserialize, Serialize};

use super::ids::SnapshotId;

/// Completeness itself is encoded by the manifest's existence; partial runs
/// only ever leave a temporary under a non-final name, never a manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Complete,
    /// Marked by external tooling after an out-of-band check; read back as
    /// restorable.
    Verified,
}

impl SnapshotStatus {
    /// A snapshot usable as a restore point.
    pub fn is_restorable(self) -> bool {
        matches!(self, SnapshotStatus::Complete | SnapshotStatus::Verified)
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    /// Uncompressed input bytes.
    pub bytes: u64,
    /// Files skipped for exceeding the per-file size cap.
    pub skipped_large: u64,
}

/// One per snapshot, co-located with the archive as `<id>.manifest.json`.
/// A snapshot is complete exactly when its manifest exists on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u32,
    pub id: SnapshotId,
    /// RFC 3339, UTC.
    pub created_at: String,
    pub status: SnapshotStatus,
    /// Archive file name, sibling of this manifest.
    pub archive: String,
    pub archive_bytes: u64,
    /// BLAKE3 of the archive file, hex.
    pub checksum: String,
    /// Exclusion patterns that were applied to the source walk.
    #[serde(default)]
    pub excluded: Vec<String>,
    pub stats: SnapshotStats,
    /// Critical files duplicated alongside this snapshot run.
    #[serde(default)]
    pub critical: Vec<CriticalCopy>,
    /// Tool name and version that produced the snapshot.
    pub tool: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalCopy {
    pub name: String,
    pub checksum: String,
}
