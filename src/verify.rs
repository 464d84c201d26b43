use std::fs;

use anyhow::Result;
use serde::Serialize;

use crate::model::SnapshotId;
use crate::store::{SnapshotStore, hash_file};

/// The specific check a snapshot failed, reported distinctly so an operator
/// can tell corruption of written data from an operational mistake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum VerifyFailure {
    ManifestMissing,
    ManifestInvalid { detail: String },
    ArchiveMissing { archive: String },
    ArchiveUnreadable { detail: String },
    ChecksumMismatch { expected: String, actual: String },
}

impl VerifyFailure {
    pub fn describe(&self) -> String {
        match self {
            VerifyFailure::ManifestMissing => "manifest missing".to_string(),
            VerifyFailure::ManifestInvalid { detail } => format!("manifest invalid: {detail}"),
            VerifyFailure::ArchiveMissing { archive } => format!("archive missing: {archive}"),
            VerifyFailure::ArchiveUnreadable { detail } => format!("archive unreadable: {detail}"),
            VerifyFailure::ChecksumMismatch { expected, actual } => {
                format!("archive checksum mismatch (expected {expected}, got {actual})")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub id: SnapshotId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<VerifyFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_bytes: Option<u64>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    fn fail(id: &SnapshotId, failure: VerifyFailure) -> Self {
        Self {
            id: id.clone(),
            failure: Some(failure),
            archive_bytes: None,
        }
    }
}

/// Non-destructive restore-point check: recompute the archive checksum and
/// decode the archive end to end. Touches only complete snapshots and takes
/// no lock, so it is safe alongside a concurrent writer run.
pub fn verify(store: &SnapshotStore, id: &str) -> Result<VerifyReport> {
    let id = SnapshotId(id.to_string());

    if !store.has_manifest(&id) {
        return Ok(VerifyReport::fail(&id, VerifyFailure::ManifestMissing));
    }
    let manifest = match store.get_manifest(&id) {
        Ok(m) => m,
        Err(err) => {
            return Ok(VerifyReport::fail(
                &id,
                VerifyFailure::ManifestInvalid {
                    detail: format!("{err:#}"),
                },
            ));
        }
    };

    let archive_path = store.archive_path(&id);
    if !archive_path.is_file() {
        return Ok(VerifyReport::fail(
            &id,
            VerifyFailure::ArchiveMissing {
                archive: manifest.archive.clone(),
            },
        ));
    }

    let actual = match hash_file(&archive_path) {
        Ok(h) => h,
        Err(err) => {
            return Ok(VerifyReport::fail(
                &id,
                VerifyFailure::ArchiveUnreadable {
                    detail: err.to_string(),
                },
            ));
        }
    };
    if actual != manifest.checksum {
        return Ok(VerifyReport::fail(
            &id,
            VerifyFailure::ChecksumMismatch {
                expected: manifest.checksum.clone(),
                actual,
            },
        ));
    }

    // Checksum alone proves the bytes; decoding proves they still form a
    // readable archive.
    if let Err(err) = decode_archive(&archive_path) {
        return Ok(VerifyReport::fail(
            &id,
            VerifyFailure::ArchiveUnreadable {
                detail: err.to_string(),
            },
        ));
    }

    Ok(VerifyReport {
        id,
        failure: None,
        archive_bytes: Some(manifest.archive_bytes),
    })
}

fn decode_archive(path: &std::path::Path) -> std::io::Result<()> {
    let file = fs::File::open(path)?;
    let decoder = zstd::stream::read::Decoder::new(file)?;
    let mut archive = tar::Archive::new(decoder);
    for entry in archive.entries()? {
        let mut entry = entry?;
        // Drain each entry; a truncated or corrupt stream surfaces here.
        std::io::copy(&mut entry, &mut std::io::sink())?;
    }
    Ok(())
}
