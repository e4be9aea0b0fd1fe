//! Whole-file snapshots and multi-file commits.
//!
//! A single file is replaced by writing a temp file next to it, syncing it
//! and renaming it over the original.
//!
//! Several files are replaced together with a small commit protocol:
//! 1. every new file is written in full to `<file>.staged`
//! 2. a JSON commit record listing the staged files is written (commit point)
//! 3. each staged file is renamed over its target and the record is removed
//!
//! [`recover`] finishes a sealed commit left behind by a crash and throws
//! away staged files that were never sealed. After recovery every target
//! holds the contents from the same commit.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// New contents for one file of a multi-file commit
#[derive(Debug)]
pub struct PendingFile {
    pub target: PathBuf,
    pub contents: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StagedFile {
    staged: PathBuf,
    target: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommitRecord {
    sealed_at: DateTime<Utc>,
    files: Vec<StagedFile>,
}

/// Read a file, treating a missing file as absent.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    // Temp file in the same directory so the rename stays on one filesystem
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!("Wrote {} bytes to {:?}", contents.len(), path);
    Ok(())
}

/// Where the staged copy of `target` lives during a commit.
pub fn staged_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".staged");
    target.with_file_name(name)
}

/// Replace every pending file as one unit, using `journal` as the commit
/// record.
pub fn commit(journal: &Path, files: &[PendingFile]) -> Result<()> {
    let staged = stage(files)?;
    seal(journal, staged)?;
    apply(journal)
}

/// Phase 1: write complete staged copies. Nothing is visible yet.
pub(crate) fn stage(files: &[PendingFile]) -> Result<Vec<StagedFile>> {
    files
        .iter()
        .map(|file| {
            let staged = staged_path(&file.target);
            write_atomic(&staged, &file.contents)?;
            Ok(StagedFile {
                staged,
                target: file.target.clone(),
            })
        })
        .collect()
}

/// Phase 2: durably record the commit. From here on recovery rolls forward.
pub(crate) fn seal(journal: &Path, files: Vec<StagedFile>) -> Result<()> {
    let record = CommitRecord {
        sealed_at: Utc::now(),
        files,
    };
    write_atomic(journal, &serde_json::to_vec(&record)?)
}

/// Phase 3: move staged files into place and retire the commit record.
///
/// Safe to repeat: a staged file that is already gone was renamed by an
/// earlier attempt.
pub(crate) fn apply(journal: &Path) -> Result<()> {
    let bytes = std::fs::read(journal)?;
    let record: CommitRecord = serde_json::from_slice(&bytes)?;

    for file in &record.files {
        if file.staged.exists() {
            std::fs::rename(&file.staged, &file.target)?;
        }
    }

    std::fs::remove_file(journal)?;
    tracing::debug!(
        "Applied commit sealed at {} ({} files)",
        record.sealed_at,
        record.files.len()
    );
    Ok(())
}

/// Bring `targets` back to the state of the last sealed commit.
///
/// Returns true if an interrupted commit was rolled forward.
pub fn recover(journal: &Path, targets: &[&Path]) -> Result<bool> {
    if journal.exists() {
        tracing::warn!("Found unfinished commit at {:?}, rolling forward", journal);
        apply(journal)?;
        return Ok(true);
    }

    for target in targets {
        let staged = staged_path(target);
        if staged.exists() {
            tracing::warn!("Discarding unsealed staged file {:?}", staged);
            std::fs::remove_file(&staged)?;
        }
    }

    Ok(false)
}
