//! Content hashing for change detection.
//!
//! Two forms: a streaming per-file hash used by analysis jobs, and an
//! aggregate hash fingerprinting a whole dataset (per-file hashes combined
//! with their relative paths in sorted order, which makes the digest
//! independent of enumeration order).

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::extension_of;

const CHUNK_SIZE: usize = 64 * 1024;

/// Streaming SHA-256 of a single file. Bounded memory regardless of size.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Aggregate SHA-256 of every matching file under `root`.
///
/// `root` may be a directory (recursed) or a single file. Files are filtered
/// to `extensions` (case-insensitive) and paths containing `output_marker`
/// are skipped so pipeline artifacts never feed back into change detection.
///
/// Returns `Ok(None)` when no file matches, an expected outcome for a
/// directory that only holds unrelated files, not an error.
pub fn hash_dataset(
    root: &Path,
    extensions: &[String],
    output_marker: &str,
) -> io::Result<Option<String>> {
    if !root.exists() {
        return Ok(None);
    }

    let mut matched: Vec<(String, std::path::PathBuf)> = Vec::new();

    if root.is_file() {
        if matches(root, extensions, output_marker) {
            let name = root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            matched.push((name, root.to_path_buf()));
        }
    } else {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !matches(path, extensions, output_marker) {
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            matched.push((rel, path.to_path_buf()));
        }
    }

    if matched.is_empty() {
        return Ok(None);
    }

    // Sorted relative paths make the digest reproducible across re-scans.
    matched.sort_by(|a, b| a.0.cmp(&b.0));

    let mut global = Sha256::new();
    for (rel, path) in &matched {
        let file_hash = hash_file(path)?;
        global.update(rel.as_bytes());
        global.update(file_hash.as_bytes());
    }
    Ok(Some(format!("{:x}", global.finalize())))
}

fn matches(path: &Path, extensions: &[String], output_marker: &str) -> bool {
    if !output_marker.is_empty() && path.to_string_lossy().contains(output_marker) {
        return false;
    }
    match extension_of(path) {
        Some(ext) => extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn jpg() -> Vec<String> {
        vec![".jpg".to_string()]
    }

    #[test]
    fn file_hash_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.jpg");
        fs::write(&path, b"tile data").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_file(&path).unwrap());
    }

    #[test]
    fn aggregate_ignores_unmatched_and_marker_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"a").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"n").unwrap();
        let with_extra = hash_dataset(tmp.path(), &jpg(), "_output").unwrap().unwrap();

        fs::write(tmp.path().join("b_output.jpg"), b"artifact").unwrap();
        let with_marker = hash_dataset(tmp.path(), &jpg(), "_output").unwrap().unwrap();
        assert_eq!(with_extra, with_marker);
    }

    #[test]
    fn aggregate_changes_when_content_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.jpg");
        fs::write(&file, b"one").unwrap();
        let before = hash_dataset(tmp.path(), &jpg(), "_output").unwrap().unwrap();
        fs::write(&file, b"two").unwrap();
        let after = hash_dataset(tmp.path(), &jpg(), "_output").unwrap().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn aggregate_is_order_independent() {
        // Identical content in two directories created in different order
        // must fingerprint identically.
        let a = tempfile::tempdir().unwrap();
        fs::write(a.path().join("1.jpg"), b"x").unwrap();
        fs::write(a.path().join("2.jpg"), b"y").unwrap();

        let b = tempfile::tempdir().unwrap();
        fs::write(b.path().join("2.jpg"), b"y").unwrap();
        fs::write(b.path().join("1.jpg"), b"x").unwrap();

        assert_eq!(
            hash_dataset(a.path(), &jpg(), "_output").unwrap(),
            hash_dataset(b.path(), &jpg(), "_output").unwrap()
        );
    }

    #[test]
    fn empty_or_unmatched_set_is_none_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(hash_dataset(tmp.path(), &jpg(), "_output").unwrap(), None);

        fs::write(tmp.path().join("readme.md"), b"hi").unwrap();
        assert_eq!(hash_dataset(tmp.path(), &jpg(), "_output").unwrap(), None);

        let missing = tmp.path().join("does-not-exist");
        assert_eq!(hash_dataset(&missing, &jpg(), "_output").unwrap(), None);
    }

    #[test]
    fn single_file_root_hashes_when_matching() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.jpg");
        fs::write(&path, b"tile").unwrap();
        assert!(hash_dataset(&path, &jpg(), "_output").unwrap().is_some());

        let txt = tmp.path().join("b.txt");
        fs::write(&txt, b"no").unwrap();
        assert_eq!(hash_dataset(&txt, &jpg(), "_output").unwrap(), None);
    }
}
