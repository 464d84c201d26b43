mod config;
mod ids;
mod manifest;

pub use config::{BackupConfig, CONFIG_ENV, RetentionPolicy, critical_name};
pub use ids::{SnapshotId, compose_snapshot_id};
pub use manifest::{CriticalCopy, SnapshotManifest, SnapshotStats, SnapshotStatus};
