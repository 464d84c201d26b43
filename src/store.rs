use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::{SnapshotId, SnapshotManifest};

pub const ARCHIVE_SUFFIX: &str = ".tar.zst";
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// The snapshot directory: archives, sibling manifests, the lock file and the
/// operational log. Complete snapshots are immutable once promoted; only the
/// writer and the rotator mutate this directory, under the directory lock.
#[derive(Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn open(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("create snapshot dir {}", output_dir.display()))?;
        Ok(Self {
            root: output_dir.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self, id: &SnapshotId) -> PathBuf {
        self.root.join(format!("{}{ARCHIVE_SUFFIX}", id.as_str()))
    }

    pub fn manifest_path(&self, id: &SnapshotId) -> PathBuf {
        self.root.join(format!("{}{MANIFEST_SUFFIX}", id.as_str()))
    }

    /// Name an in-progress archive is written under before promotion.
    pub fn temp_archive_path(&self) -> PathBuf {
        self.root
            .join(format!("in-progress.{}.tmp", std::process::id()))
    }

    pub fn has_archive(&self, id: &SnapshotId) -> bool {
        self.archive_path(id).is_file()
    }

    pub fn has_manifest(&self, id: &SnapshotId) -> bool {
        self.manifest_path(id).is_file()
    }

    /// Written atomically, strictly after the archive it describes is in
    /// place: the manifest's existence is what marks a snapshot complete.
    pub fn put_manifest(&self, manifest: &SnapshotManifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest).context("serialize manifest")?;
        write_atomic(&self.manifest_path(&manifest.id), &bytes).context("write manifest")
    }

    pub fn get_manifest(&self, id: &SnapshotId) -> Result<SnapshotManifest> {
        let path = self.manifest_path(id);
        let bytes =
            fs::read(&path).with_context(|| format!("read manifest {}", path.display()))?;
        let m: SnapshotManifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse manifest {}", path.display()))?;
        Ok(m)
    }

    pub fn list_manifests(&self) -> Result<Vec<SnapshotManifest>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).context("read snapshot dir")? {
            let entry = entry.context("read snapshot dir entry")?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(MANIFEST_SUFFIX) {
                continue;
            }
            let bytes = fs::read(&path)
                .with_context(|| format!("read manifest file {}", path.display()))?;
            let m: SnapshotManifest = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse manifest file {}", path.display()))?;
            out.push(m);
        }
        Ok(out)
    }

    /// Restorable snapshots whose archive is present, newest first.
    pub fn list_complete(&self) -> Result<Vec<SnapshotManifest>> {
        let mut out: Vec<SnapshotManifest> = self
            .list_manifests()?
            .into_iter()
            .filter(|m| m.status.is_restorable() && self.has_archive(&m.id))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Manifests whose archive is gone (crash mid-deletion leaves these).
    pub fn orphaned_manifests(&self) -> Result<Vec<SnapshotManifest>> {
        Ok(self
            .list_manifests()?
            .into_iter()
            .filter(|m| !self.has_archive(&m.id))
            .collect())
    }

    /// In-progress temporaries left behind by interrupted writer runs.
    pub fn stale_temp_files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).context("read snapshot dir")? {
            let entry = entry.context("read snapshot dir entry")?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let writer_temp = name.starts_with("in-progress.") && name.ends_with(".tmp");
            // `<something>.tmp.<pid>` is an interrupted atomic write.
            let atomic_temp = name.contains(".tmp.");
            if writer_temp || atomic_temp {
                out.push(path);
            }
        }
        Ok(out)
    }

    /// Archive first, then manifest. A crash in between leaves an orphaned
    /// manifest (swept on the next rotation), never a manifest-less archive
    /// that looks like a valid restore point.
    pub fn delete_snapshot(&self, id: &SnapshotId) -> Result<()> {
        let archive = self.archive_path(id);
        if archive.exists() {
            fs::remove_file(&archive)
                .with_context(|| format!("remove archive {}", archive.display()))?;
        }
        let manifest = self.manifest_path(id);
        if manifest.exists() {
            fs::remove_file(&manifest)
                .with_context(|| format!("remove manifest {}", manifest.display()))?;
        }
        Ok(())
    }

    pub fn delete_manifest(&self, id: &SnapshotId) -> Result<()> {
        let path = self.manifest_path(id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("remove manifest {}", path.display()))?;
        }
        Ok(())
    }
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create parent directories")?;
    }
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, bytes).with_context(|| format!("write temp file {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Streaming BLAKE3 of a file, hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
