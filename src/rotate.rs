use std::collections::HashSet;
use std::fs;

use anyhow::Result;
use time::format_description::well_known::Rfc3339;

use crate::lock::DirLock;
use crate::model::{RetentionPolicy, SnapshotManifest};
use crate::store::SnapshotStore;

#[derive(Clone, Debug, Default)]
pub struct RotateReport {
    pub kept: usize,
    pub deleted: usize,
    /// Eligible snapshots whose deletion failed; they stay for the next pass.
    pub skipped: usize,
    pub swept_manifests: usize,
    pub swept_temps: usize,
}

/// Apply the retention policy under the store's directory lock. Only complete
/// snapshots are counted; debris (orphaned manifests, stale in-progress
/// temporaries) is swept as part of the same pass.
pub fn rotate(store: &SnapshotStore, policy: &RetentionPolicy, dry_run: bool) -> Result<RotateReport> {
    let _lock = DirLock::acquire(store.root())?;

    let snapshots = store.list_complete()?;
    let keep = keep_set(&snapshots, policy);

    let mut report = RotateReport {
        kept: keep.len(),
        ..RotateReport::default()
    };

    for snapshot in &snapshots {
        if keep.contains(snapshot.id.as_str()) {
            continue;
        }
        if dry_run {
            report.deleted += 1;
            continue;
        }
        match store.delete_snapshot(&snapshot.id) {
            Ok(()) => {
                tracing::info!(id = %snapshot.id, "deleted snapshot");
                report.deleted += 1;
            }
            Err(err) => {
                // One locked or unremovable snapshot must not end the pass.
                tracing::warn!(id = %snapshot.id, error = %err, "delete failed, skipping");
                report.skipped += 1;
            }
        }
    }

    for manifest in store.orphaned_manifests()? {
        report.swept_manifests += 1;
        if dry_run {
            continue;
        }
        tracing::warn!(id = %manifest.id, "sweeping orphaned manifest");
        if let Err(err) = store.delete_manifest(&manifest.id) {
            tracing::warn!(id = %manifest.id, error = %err, "sweep failed");
        }
    }
    // The lock guarantees no writer is active here, so every in-progress
    // temporary is a leftover from an interrupted run.
    for tmp in store.stale_temp_files()? {
        report.swept_temps += 1;
        if dry_run {
            continue;
        }
        tracing::warn!(path = %tmp.display(), "sweeping stale temporary");
        if let Err(err) = fs::remove_file(&tmp) {
            tracing::warn!(path = %tmp.display(), error = %err, "sweep failed");
        }
    }

    Ok(report)
}

/// Keep = newest `keep_last_n` ∪ anything newer than `keep_days`, floored so
/// the newest complete snapshot always survives. `snapshots` must be sorted
/// newest first.
fn keep_set(snapshots: &[SnapshotManifest], policy: &RetentionPolicy) -> HashSet<String> {
    let mut keep = HashSet::new();

    if let Some(n) = policy.keep_last_n {
        for snapshot in snapshots.iter().take(n as usize) {
            keep.insert(snapshot.id.as_str().to_string());
        }
    }
    if let Some(days) = policy.keep_days {
        let cutoff = time::OffsetDateTime::now_utc() - time::Duration::days(days as i64);
        for snapshot in snapshots {
            match time::OffsetDateTime::parse(&snapshot.created_at, &Rfc3339) {
                Ok(ts) if ts >= cutoff => {
                    keep.insert(snapshot.id.as_str().to_string());
                }
                Ok(_) => {}
                Err(err) => {
                    // Unparseable timestamp: keep rather than risk deleting.
                    tracing::warn!(id = %snapshot.id, error = %err, "bad created_at, keeping");
                    keep.insert(snapshot.id.as_str().to_string());
                }
            }
        }
    }
    // Retention floor: never leave zero restore points, even under a
    // degenerate policy like keep_last_n = 0.
    if keep.is_empty()
        && let Some(newest) = snapshots.first()
    {
        keep.insert(newest.id.as_str().to_string());
    }
    keep
}
