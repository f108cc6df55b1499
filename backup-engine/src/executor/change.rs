//! Content digests and differential file selection.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use super::hash_index::HashIndex;
use crate::fs::walker::FileInfo;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// [`hash_file`] on the blocking pool.
pub async fn digest_file(path: PathBuf) -> io::Result<String> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(io::Error::other)?
}

/// A file whose digest could not be computed.
#[derive(Debug)]
pub struct HashFailure {
    pub file: FileInfo,
    pub error: String,
}

/// Outcome of comparing the current source tree with the stored baseline.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// New or modified files, in traversal order
    pub included: Vec<FileInfo>,
    pub unchanged_files: usize,
    pub unchanged_bytes: u64,
    /// Baseline entries with no matching source file
    pub deleted_files: usize,
    /// Digests of every hashable source file, the next baseline
    pub current: HashIndex,
    pub hash_failures: Vec<HashFailure>,
}

/// Hash every file and keep those whose digest differs from `baseline` or
/// that `baseline` has never seen. Blocking.
pub fn detect_changes(files: Vec<FileInfo>, baseline: &HashIndex) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut seen = HashSet::with_capacity(files.len());

    for file in files {
        let key = file.relative_key();
        seen.insert(key.clone());

        let digest = match hash_file(&file.path) {
            Ok(digest) => digest,
            Err(e) => {
                changes.hash_failures.push(HashFailure {
                    file,
                    error: e.to_string(),
                });
                continue;
            }
        };

        if baseline.get(&key) == Some(digest.as_str()) {
            changes.unchanged_files += 1;
            changes.unchanged_bytes += file.size;
        } else {
            changes.included.push(file);
        }
        changes.current.insert(key, digest);
    }

    changes.deleted_files = baseline.iter().filter(|(k, _)| !seen.contains(*k)).count();

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::walker::{walk_directory, WalkOptions};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(hash_file(&dir.path().join("gone")).is_err());
    }

    #[test]
    fn test_detect_changes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("same.txt"), b"same").unwrap();
        fs::write(dir.path().join("edited.txt"), b"new content").unwrap();
        fs::write(dir.path().join("added.txt"), b"added").unwrap();

        let mut baseline = HashIndex::default();
        baseline.insert("same.txt", hash_file(&dir.path().join("same.txt")).unwrap());
        baseline.insert("edited.txt", "0000");
        baseline.insert("deleted.txt", "1111");

        let files = walk_directory(dir.path(), &WalkOptions::default()).unwrap();
        let changes = detect_changes(files, &baseline);

        let included: Vec<String> = changes.included.iter().map(|f| f.relative_key()).collect();
        assert_eq!(included, vec!["added.txt", "edited.txt"]);
        assert_eq!(changes.unchanged_files, 1);
        assert_eq!(changes.unchanged_bytes, 4);
        assert_eq!(changes.deleted_files, 1);
        assert_eq!(changes.current.len(), 3);
        assert!(!changes.current.contains("deleted.txt"));
        assert!(changes.hash_failures.is_empty());
    }

    #[test]
    fn test_unreadable_file_is_reported_not_selected() {
        let dir = TempDir::new().unwrap();
        let files = vec![FileInfo {
            path: dir.path().join("vanished.txt"),
            relative_path: PathBuf::from("vanished.txt"),
            size: 3,
        }];

        let changes = detect_changes(files, &HashIndex::default());
        assert!(changes.included.is_empty());
        assert!(changes.current.is_empty());
        assert_eq!(changes.hash_failures.len(), 1);
        assert_eq!(changes.hash_failures[0].file.relative_key(), "vanished.txt");
    }
}
