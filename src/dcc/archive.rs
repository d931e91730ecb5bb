//! Archive containers delivered by the catalog bots.
//!
//! Zip containers are unpacked: the first file member is written next to the
//! container and the container is removed. Rar is recognised so it can be
//! reported as a container, but it is never unpacked.

use crate::dcc::security;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Rar,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("archive {0} has no file members")]
    Empty(PathBuf),
}

/// The container format of `path`, judged by extension.
pub fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "zip" => Some(ArchiveKind::Zip),
        "rar" => Some(ArchiveKind::Rar),
        _ => None,
    }
}

/// Extract the first file member of the zip at `path` into `dest_dir`.
///
/// Member names are reduced to a sanitized file name and never overwrite an
/// existing file. Blocking; run it on a blocking thread from async code.
pub fn extract_zip(path: &Path, dest_dir: &Path) -> Result<PathBuf, ArchiveError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;

    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        if member.is_dir() {
            continue;
        }
        let Some(name) = member
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            tracing::debug!(member = member.name(), "skipping unsafe archive member");
            continue;
        };
        let Some(target) = security::safe_download_path(dest_dir, &name) else {
            continue;
        };

        let mut out = File::create(&target)?;
        io::copy(&mut member, &mut out)?;
        tracing::debug!(archive = %path.display(), file = %target.display(), "extracted archive member");
        return Ok(target);
    }

    Err(ArchiveError::Empty(path.to_path_buf()))
}
