use std::fs;

use anyhow::{Context, Result};

use snapkeep::error::{RunError, classify};
use snapkeep::model::BackupConfig;

#[test]
fn config_file_round_trips_recognized_options() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let source = tmp.path().join("src");
    fs::create_dir_all(&source)?;
    let path = tmp.path().join("snapkeep.json");
    fs::write(
        &path,
        serde_json::json!({
            "version": 1,
            "source_root": &source,
            "output_dir": tmp.path().join("backups"),
            "critical_dir": tmp.path().join("critical"),
            "exclude": [".git", "node_modules", "*.pyc"],
            "retention": { "keep_last_n": 7, "keep_days": 30 },
            "critical_files": [source.join("history.log")],
            "max_file_bytes": 104857600,
            "max_run_secs": 900
        })
        .to_string(),
    )?;

    let cfg = BackupConfig::load(Some(&path))?;
    assert_eq!(cfg.retention.keep_last_n, Some(7));
    assert_eq!(cfg.retention.keep_days, Some(30));
    assert_eq!(cfg.exclude.len(), 3);
    assert_eq!(cfg.max_file_bytes, Some(104_857_600));
    Ok(())
}

#[test]
fn unknown_version_is_a_config_error() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let path = tmp.path().join("snapkeep.json");
    fs::write(
        &path,
        serde_json::json!({
            "version": 9,
            "source_root": "/src",
            "output_dir": "/backups"
        })
        .to_string(),
    )?;

    let err = BackupConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(classify(&err), Some(RunError::Config(_))));
    Ok(())
}

#[test]
fn invalid_exclude_pattern_is_a_config_error() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let path = tmp.path().join("snapkeep.json");
    fs::write(
        &path,
        serde_json::json!({
            "version": 1,
            "source_root": "/src",
            "output_dir": "/backups",
            "exclude": ["a[unclosed"]
        })
        .to_string(),
    )?;

    let err = BackupConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(classify(&err), Some(RunError::Config(_))));
    Ok(())
}

#[test]
fn critical_files_without_destination_is_a_config_error() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let path = tmp.path().join("snapkeep.json");
    fs::write(
        &path,
        serde_json::json!({
            "version": 1,
            "source_root": "/src",
            "output_dir": "/backups",
            "critical_files": ["/src/history.log"]
        })
        .to_string(),
    )?;

    let err = BackupConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(classify(&err), Some(RunError::Config(_))));
    Ok(())
}

#[test]
fn duplicate_critical_names_are_rejected() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let path = tmp.path().join("snapkeep.json");
    fs::write(
        &path,
        serde_json::json!({
            "version": 1,
            "source_root": "/src",
            "output_dir": "/backups",
            "critical_dir": "/critical",
            "critical_files": ["/a/history.log", "/b/history.log"]
        })
        .to_string(),
    )?;

    let err = BackupConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(classify(&err), Some(RunError::Config(_))));
    Ok(())
}
