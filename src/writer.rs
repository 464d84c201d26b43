use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use globset::GlobSet;
use time::format_description::well_known::Rfc3339;
use walkdir::WalkDir;

use crate::error::{config_error, transient_error};
use crate::lock::DirLock;
use crate::model::{
    BackupConfig, CriticalCopy, SnapshotManifest, SnapshotStats, SnapshotStatus,
    compose_snapshot_id,
};
use crate::store::{ARCHIVE_SUFFIX, SnapshotStore};

/// Produce one snapshot under the store's directory lock. `critical` is the
/// set of copies an accompanying duplicator run already made; it is recorded
/// in the manifest but does not affect the archive.
pub fn write_snapshot(
    cfg: &BackupConfig,
    store: &SnapshotStore,
    critical: Vec<CriticalCopy>,
) -> Result<SnapshotManifest> {
    let _lock = DirLock::acquire(store.root())?;
    create_snapshot(cfg, store, critical)
}

fn create_snapshot(
    cfg: &BackupConfig,
    store: &SnapshotStore,
    critical: Vec<CriticalCopy>,
) -> Result<SnapshotManifest> {
    if !cfg.source_root.is_dir() {
        return Err(config_error(format!(
            "source root {} does not exist or is not a directory",
            cfg.source_root.display()
        )));
    }
    let matcher = cfg.exclude_matcher()?;

    let source_root = fs::canonicalize(&cfg.source_root)
        .map_err(|e| transient_error(format!("resolve {}: {e}", cfg.source_root.display())))?;
    // The snapshot directory and the critical destination may live inside the
    // source tree; they are never archived into themselves.
    let mut avoid = vec![canonical_if_exists(store.root())];
    if let Some(dir) = &cfg.critical_dir {
        avoid.push(canonical_if_exists(dir));
    }
    let avoid: Vec<PathBuf> = avoid.into_iter().flatten().collect();

    let deadline = cfg
        .max_run_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let plan = scan_source(&source_root, &matcher, &avoid, cfg.max_file_bytes)?;
    check_free_space(store.root(), plan.estimated_bytes)?;

    let tmp = store.temp_archive_path();
    let built = build_archive(&tmp, &source_root, &plan.entries, deadline);
    let (checksum, archive_bytes) = match built {
        Ok(v) => v,
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
    };

    let created_at = time::OffsetDateTime::now_utc();
    let id = compose_snapshot_id(created_at, &checksum)?;
    let archive_path = store.archive_path(&id);
    if let Err(e) = fs::rename(&tmp, &archive_path) {
        let _ = fs::remove_file(&tmp);
        return Err(transient_error(format!(
            "promote archive {}: {e}",
            archive_path.display()
        )));
    }

    let manifest = SnapshotManifest {
        version: 1,
        id: id.clone(),
        created_at: created_at.format(&Rfc3339).context("format created_at")?,
        status: SnapshotStatus::Complete,
        archive: format!("{}{ARCHIVE_SUFFIX}", id.as_str()),
        archive_bytes,
        checksum,
        excluded: cfg.exclude.clone(),
        stats: plan.stats,
        critical,
        tool: crate::TOOL.to_string(),
    };
    if let Err(err) = store.put_manifest(&manifest) {
        // Without its manifest the archive would look like debris to every
        // other component; remove it rather than leave a ghost.
        let _ = fs::remove_file(&archive_path);
        return Err(err);
    }

    tracing::info!(
        id = %manifest.id,
        bytes = manifest.archive_bytes,
        files = manifest.stats.files,
        "snapshot complete"
    );
    Ok(manifest)
}

struct ScanPlan {
    entries: Vec<ScanEntry>,
    stats: SnapshotStats,
    estimated_bytes: u64,
}

struct ScanEntry {
    path: PathBuf,
    rel: PathBuf,
    kind: EntryKind,
}

enum EntryKind {
    Dir,
    File,
    Symlink,
}

fn scan_source(
    source_root: &Path,
    matcher: &GlobSet,
    avoid: &[PathBuf],
    max_file_bytes: Option<u64>,
) -> Result<ScanPlan> {
    let mut entries = Vec::new();
    let mut stats = SnapshotStats::default();
    let mut estimated_bytes = 0u64;

    let root = source_root.to_path_buf();
    let avoid = avoid.to_vec();
    let matcher = matcher.clone();
    let walker = WalkDir::new(source_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            if avoid.iter().any(|a| entry.path() == a) {
                return false;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                return false;
            };
            !matcher.is_match(rel)
        });

    for entry in walker {
        let entry = entry
            .map_err(|e| transient_error(format!("walk source tree: {e}")))?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source_root)
            .context("strip source prefix")?
            .to_path_buf();

        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            stats.dirs += 1;
            EntryKind::Dir
        } else if file_type.is_file() {
            let size = entry
                .metadata()
                .map_err(|e| transient_error(format!("stat {}: {e}", entry.path().display())))?
                .len();
            if let Some(cap) = max_file_bytes
                && size > cap
            {
                tracing::debug!(path = %rel.display(), size, cap, "skipping oversized file");
                stats.skipped_large += 1;
                continue;
            }
            stats.files += 1;
            stats.bytes += size;
            estimated_bytes += size;
            EntryKind::File
        } else if file_type.is_symlink() {
            stats.symlinks += 1;
            EntryKind::Symlink
        } else {
            continue;
        };

        entries.push(ScanEntry {
            path: entry.path().to_path_buf(),
            rel,
            kind,
        });
    }

    Ok(ScanPlan {
        entries,
        stats,
        estimated_bytes,
    })
}

/// Fail fast before writing anything. The estimate is the uncompressed input
/// size, so it errs on the side of refusing.
fn check_free_space(output_dir: &Path, estimated_bytes: u64) -> Result<()> {
    let available = fs2::available_space(output_dir)
        .map_err(|e| transient_error(format!("query free space on {}: {e}", output_dir.display())))?;
    if estimated_bytes > available {
        return Err(transient_error(format!(
            "insufficient disk space for snapshot: need up to {estimated_bytes} bytes, {available} available"
        )));
    }
    Ok(())
}

fn build_archive(
    tmp: &Path,
    source_root: &Path,
    entries: &[ScanEntry],
    deadline: Option<Instant>,
) -> Result<(String, u64)> {
    let file = fs::File::create(tmp).map_err(|e| {
        transient_error(format!("cannot write backups to {}: {e}", tmp.display()))
    })?;
    let encoder = zstd::stream::write::Encoder::new(HashingWriter::new(file), 0)
        .map_err(|e| transient_error(format!("start compressor: {e}")))?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in entries {
        if let Some(deadline) = deadline
            && Instant::now() > deadline
        {
            return Err(transient_error(
                "snapshot run exceeded max_run_secs, aborting",
            ));
        }
        let appended = match entry.kind {
            EntryKind::Dir => builder.append_dir(&entry.rel, &entry.path),
            EntryKind::File | EntryKind::Symlink => {
                builder.append_path_with_name(&entry.path, &entry.rel)
            }
        };
        appended.map_err(|e| {
            transient_error(format!(
                "archive {} (under {}): {e}",
                entry.rel.display(),
                source_root.display()
            ))
        })?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| transient_error(format!("finish archive: {e}")))?;
    let hashing = encoder
        .finish()
        .map_err(|e| transient_error(format!("finish compression: {e}")))?;
    let (file, checksum, written) = hashing.finish();
    file.sync_all()
        .map_err(|e| transient_error(format!("fsync {}: {e}", tmp.display())))?;
    Ok((checksum, written))
}

fn canonical_if_exists(path: &Path) -> Option<PathBuf> {
    fs::canonicalize(path).ok()
}

/// Tees everything written to the inner file through a BLAKE3 hasher, so the
/// recorded checksum is exactly the bytes on disk.
struct HashingWriter {
    inner: fs::File,
    hasher: blake3::Hasher,
    written: u64,
}

impl HashingWriter {
    fn new(inner: fs::File) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    fn finish(self) -> (fs::File, String, u64) {
        (
            self.inner,
            self.hasher.finalize().to_hex().to_string(),
            self.written,
        )
    }
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
