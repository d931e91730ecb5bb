//! DCC security utilities.
//!
//! Provides defenses against common DCC attack vectors:
//! - **Path traversal**: Filenames are sanitized and resolved paths are verified
//!   to stay within the download directory.
//! - **Private IP rejection**: Optionally rejects DCC offers from private,
//!   loopback, and link-local addresses.
//! - **Filename collision**: Automatically appends numeric suffixes when a file
//!   already exists.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

const MAX_FILENAME_BYTES: usize = 255;

/// Check if an offer host is private/loopback.
pub fn is_private_host(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
}

/// Sanitize a filename received via DCC to prevent path traversal attacks.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Strip path components for both Unix and Windows-style paths
    // We must handle backslash manually since on Unix it's a valid char
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    // Remove control characters and separators left over
    let sanitized: String = name
        .chars()
        .filter(|c| !c.is_control() && *c != ':' && *c != '"')
        .collect();

    // Strip leading dots (hidden files / directory traversal)
    let sanitized = sanitized.trim().trim_start_matches('.');
    if sanitized.is_empty() {
        return None;
    }

    let mut end = sanitized.len().min(MAX_FILENAME_BYTES);
    while !sanitized.is_char_boundary(end) {
        end -= 1;
    }
    Some(sanitized[..end].to_string())
}

/// Resolve the full download path, ensuring it stays within the download
/// directory. Existing files are never overwritten; a numeric suffix is added
/// instead.
pub fn safe_download_path(download_dir: &Path, filename: &str) -> Option<PathBuf> {
    let sanitized = sanitize_filename(filename)?;

    let canonical_dir = download_dir
        .canonicalize()
        .unwrap_or_else(|_| download_dir.to_path_buf());
    if !canonical_dir.join(&sanitized).starts_with(&canonical_dir) {
        return None;
    }

    let path = download_dir.join(&sanitized);
    if !path.exists() && !part_path(&path).exists() {
        return Some(path);
    }

    let (stem, ext) = split_extension(&sanitized);
    (1..1000)
        .map(|i| {
            if ext.is_empty() {
                download_dir.join(format!("{}_{}", stem, i))
            } else {
                download_dir.join(format!("{}_{}.{}", stem, i, ext))
            }
        })
        .find(|p| !p.exists() && !part_path(p).exists())
}

/// The in-flight name of a download: `<path>.part`.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Look up a completed download by the bare name handed out to a client.
/// Anything that is not a plain file name inside `download_dir` is refused.
pub fn library_path(download_dir: &Path, name: &str) -> Option<PathBuf> {
    if sanitize_filename(name).as_deref() != Some(name) || name.ends_with(".part") {
        return None;
    }
    let path = download_dir.join(name);
    path.is_file().then_some(path)
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos + 1..]),
        _ => (name, ""),
    }
}
