//! Upload-tree scanner: enumerates regular files, computes content hashes,
//! and yields metadata for change detection.
//!
//! Any path with a dot-leading component is skipped (hidden files and the
//! `.trash/` subtree). Per-file errors are logged and skipped; the scan as a
//! whole is best-effort.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Metadata for one file under the upload directory.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Path relative to the upload directory.
    pub path: String,
    /// SHA-256 hex digest of the file content.
    pub hash: String,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
    pub name: String,
}

/// Compute the SHA-256 hex digest of a file, reading in bounded chunks.
pub fn compute_file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn file_metadata(path: &Path, upload_dir: &Path) -> io::Result<FileMetadata> {
    let stat = path.metadata()?;
    let relative = path
        .strip_prefix(upload_dir)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file outside upload dir"))?;

    Ok(FileMetadata {
        path: relative.to_string_lossy().into_owned(),
        hash: compute_file_hash(path)?,
        size: stat.len() as i64,
        last_modified: stat.modified().map(DateTime::<Utc>::from)?,
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    })
}

fn has_hidden_component(path: &Path, upload_dir: &Path) -> bool {
    path.strip_prefix(upload_dir)
        .map(|relative| {
            relative
                .components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        })
        .unwrap_or(true)
}

/// Recursively scan the upload directory and return metadata for every
/// visible regular file. This is blocking I/O; call it off the async
/// runtime.
pub fn scan_upload_directory(upload_dir: &Path) -> Vec<FileMetadata> {
    if !upload_dir.exists() {
        warn!(path = %upload_dir.display(), "upload directory does not exist");
        return Vec::new();
    }
    if !upload_dir.is_dir() {
        warn!(path = %upload_dir.display(), "upload path is not a directory");
        return Vec::new();
    }

    let mut results = Vec::new();

    for entry in WalkDir::new(upload_dir).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "error walking upload directory");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if has_hidden_component(entry.path(), upload_dir) {
            debug!(path = %entry.path().display(), "skipping hidden path");
            continue;
        }

        match file_metadata(entry.path(), upload_dir) {
            Ok(meta) => {
                debug!(path = %meta.path, hash = %&meta.hash[..8.min(meta.hash.len())], "scanned file");
                results.push(meta);
            }
            // The file may have disappeared mid-scan or be unreadable;
            // either way the rest of the scan proceeds.
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping unreadable file");
            }
        }
    }

    info!(files = results.len(), path = %upload_dir.display(), "scanned upload directory");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_yields_nested_files_with_relative_paths() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"beta").unwrap();

        let mut paths: Vec<String> = scan_upload_directory(dir.path())
            .into_iter()
            .map(|m| m.path)
            .collect();
        paths.sort();

        assert_eq!(paths, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
    }

    #[test]
    fn hidden_components_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("visible.txt"), b"x").unwrap();
        fs::write(dir.path().join(".hidden.txt"), b"x").unwrap();
        fs::create_dir_all(dir.path().join(".trash")).unwrap();
        fs::write(dir.path().join(".trash/deleted.pdf"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("docs/.cache")).unwrap();
        fs::write(dir.path().join("docs/.cache/tmp.txt"), b"x").unwrap();

        let scanned = scan_upload_directory(dir.path());

        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].path, "visible.txt");
        assert!(
            scanned
                .iter()
                .all(|m| !m.path.split('/').any(|part| part.starts_with('.')))
        );
    }

    #[test]
    fn hash_is_stable_and_tracks_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, b"first version").unwrap();

        let h1 = compute_file_hash(&path).unwrap();
        let h2 = compute_file_hash(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);

        fs::write(&path, b"second version").unwrap();
        let h3 = compute_file_hash(&path).unwrap();
        assert_ne!(h1, h3);
    }

    #[test]
    fn missing_directory_yields_empty_scan() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(scan_upload_directory(&missing).is_empty());
    }
}
