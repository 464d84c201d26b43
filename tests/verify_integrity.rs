mod common;

use std::fs;

use anyhow::{Context, Result};

use snapkeep::lock::DirLock;
use snapkeep::store::SnapshotStore;
use snapkeep::verify::{self, VerifyFailure};
use snapkeep::writer;

#[test]
fn verification_passes_and_is_idempotent() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cfg = common::base_config(tmp.path())?;
    common::seed_source(&cfg.source_root)?;
    let store = SnapshotStore::open(&cfg.output_dir)?;
    let manifest = writer::write_snapshot(&cfg, &store, Vec::new())?;

    let first = verify::verify(&store, manifest.id.as_str())?;
    assert!(first.passed());
    let second = verify::verify(&store, manifest.id.as_str())?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn truncated_archive_reports_checksum_mismatch_specifically() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cfg = common::base_config(tmp.path())?;
    common::seed_source(&cfg.source_root)?;
    let store = SnapshotStore::open(&cfg.output_dir)?;
    let manifest = writer::write_snapshot(&cfg, &store, Vec::new())?;

    // External corruption after promotion.
    let archive = store.archive_path(&manifest.id);
    let bytes = fs::read(&archive)?;
    fs::write(&archive, &bytes[..bytes.len() / 2])?;

    let report = verify::verify(&store, manifest.id.as_str())?;
    assert!(matches!(
        report.failure,
        Some(VerifyFailure::ChecksumMismatch { .. })
    ));
    Ok(())
}

#[test]
fn missing_manifest_and_missing_archive_are_distinct() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cfg = common::base_config(tmp.path())?;
    common::seed_source(&cfg.source_root)?;
    let store = SnapshotStore::open(&cfg.output_dir)?;
    let manifest = writer::write_snapshot(&cfg, &store, Vec::new())?;

    let report = verify::verify(&store, "20990101T000000Z-deadbeef")?;
    assert!(matches!(report.failure, Some(VerifyFailure::ManifestMissing)));

    fs::remove_file(store.archive_path(&manifest.id))?;
    let report = verify::verify(&store, manifest.id.as_str())?;
    assert!(matches!(
        report.failure,
        Some(VerifyFailure::ArchiveMissing { .. })
    ));
    Ok(())
}

#[test]
fn verify_runs_without_the_directory_lock() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cfg = common::base_config(tmp.path())?;
    common::seed_source(&cfg.source_root)?;
    let store = SnapshotStore::open(&cfg.output_dir)?;
    let manifest = writer::write_snapshot(&cfg, &store, Vec::new())?;

    // Simulates a writer run in progress on a different snapshot.
    let _lock = DirLock::acquire(store.root())?;
    let report = verify::verify(&store, manifest.id.as_str())?;
    assert!(report.passed());
    Ok(())
}

#[test]
fn verify_does_not_modify_the_snapshot() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cfg = common::base_config(tmp.path())?;
    common::seed_source(&cfg.source_root)?;
    let store = SnapshotStore::open(&cfg.output_dir)?;
    let manifest = writer::write_snapshot(&cfg, &store, Vec::new())?;

    let archive = store.archive_path(&manifest.id);
    let before = fs::read(&archive)?;
    verify::verify(&store, manifest.id.as_str())?;
    assert_eq!(fs::read(&archive)?, before);
    assert_eq!(store.get_manifest(&manifest.id)?.checksum, manifest.checksum);
    Ok(())
}
