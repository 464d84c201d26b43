#![allow(dead_code)]

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use snapkeep::model::{
    BackupConfig, RetentionPolicy, SnapshotId, SnapshotManifest, SnapshotStats, SnapshotStatus,
};
use snapkeep::store::SnapshotStore;

/// Config rooted in a tempdir: `<root>/source` -> `<root>/backups`.
pub fn base_config(root: &Path) -> Result<BackupConfig> {
    let source_root = root.join("source");
    fs::create_dir_all(&source_root).context("create source dir")?;
    Ok(BackupConfig {
        version: 1,
        source_root,
        output_dir: root.join("backups"),
        critical_dir: None,
        exclude: Vec::new(),
        retention: RetentionPolicy::default(),
        critical_files: Vec::new(),
        max_file_bytes: None,
        max_run_secs: None,
    })
}

pub fn seed_source(source: &Path) -> Result<()> {
    fs::create_dir_all(source.join("sub")).context("create sub dir")?;
    fs::write(source.join("a.txt"), b"hello\n").context("write a.txt")?;
    fs::write(source.join("sub/b.bin"), b"\x00\x01\x02").context("write b.bin")?;
    Ok(())
}

/// Fabricate a complete snapshot (archive bytes + matching manifest) directly
/// in the store, bypassing the writer. Rotation only reads manifests, so the
/// archive payload can be arbitrary.
pub fn fabricate_snapshot(store: &SnapshotStore, id: &str, created_at: &str) -> Result<()> {
    let payload = format!("archive for {id}");
    let archive = store.root().join(format!("{id}.tar.zst"));
    fs::create_dir_all(store.root()).context("create store root")?;
    fs::write(&archive, payload.as_bytes()).context("write fabricated archive")?;

    store.put_manifest(&SnapshotManifest {
        version: 1,
        id: SnapshotId(id.to_string()),
        created_at: created_at.to_string(),
        status: SnapshotStatus::Complete,
        archive: format!("{id}.tar.zst"),
        archive_bytes: payload.len() as u64,
        checksum: blake3::hash(payload.as_bytes()).to_hex().to_string(),
        excluded: Vec::new(),
        stats: SnapshotStats::default(),
        critical: Vec::new(),
        tool: snapkeep::TOOL.to_string(),
    })
}

/// Entry names inside a `.tar.zst` archive.
pub fn archive_names(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path).context("open archive")?;
    let decoder = zstd::stream::read::Decoder::new(file).context("open decoder")?;
    let mut archive = tar::Archive::new(decoder);
    let mut names = Vec::new();
    for entry in archive.entries().context("read entries")? {
        let entry = entry.context("read entry")?;
        names.push(entry.path().context("entry path")?.display().to_string());
    }
    Ok(names)
}
