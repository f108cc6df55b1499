//! Directory traversal for backup sources.
//!
//! Collects every regular file below a root (symlinks to files are resolved)
//! together with its size and the root-relative path used as the hash index key.
//! Files whose relative path is not valid UTF-8 are skipped, since the index
//! key could not represent them without collisions.

use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// File name fragments to skip
    pub exclude_patterns: Vec<String>,
}

/// Information about a file discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    /// Returns None for directories, symlinks to directories and broken symlinks.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let size = if raw_metadata.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved.len(),
                _ => return Ok(None),
            }
        } else if raw_metadata.is_file() {
            raw_metadata.len()
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            path,
            relative_path,
            size,
        }))
    }

    /// Root-relative path with `/` separators, stable across platforms.
    pub fn relative_key(&self) -> String {
        self.relative_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Lowercased extension with its leading dot (".txt"), if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
    }
}

/// Walk a directory tree and collect all files
///
/// Unreadable entries below the root are logged and skipped; an unreadable
/// root is an error.
///
/// # Example
/// ```no_run
/// use backup_engine::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("/data"), &WalkOptions::default()).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let entries = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !should_exclude(e, &options.exclude_patterns));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() > 0 => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if entry.file_type().is_dir() {
            continue;
        }

        match FileInfo::from_entry(&entry, root) {
            Ok(Some(file_info)) if file_info.relative_path.to_str().is_none() => {
                warn!("Skipping {}: name is not valid UTF-8", entry.path().display());
            }
            Ok(Some(file_info)) => files.push(file_info),
            Ok(None) => {}
            Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
        }
    }

    Ok(files)
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| file_name.contains(pattern.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("subdir/deeper"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;
        fs::write(temp_dir.path().join("subdir/deeper/file3.txt"), b"c3")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        let keys: Vec<String> = files.iter().map(|f| f.relative_key()).collect();
        assert_eq!(keys, vec!["file1.txt", "subdir/deeper/file3.txt", "subdir/file2.txt"]);

        let total: u64 = files.iter().map(|f| f.size).sum();
        assert_eq!(total, 18);

        Ok(())
    }

    #[test]
    fn test_exclude_patterns() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join(".git"))?;
        fs::write(temp_dir.path().join(".git/HEAD"), b"ref")?;
        fs::write(temp_dir.path().join("file.txt"), b"keep")?;
        fs::write(temp_dir.path().join(".DS_Store"), b"exclude")?;

        let options = WalkOptions {
            exclude_patterns: vec![".git".to_string(), ".DS_Store".to_string()],
            ..Default::default()
        };
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_key(), "file.txt");

        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = walk_directory(&temp_dir.path().join("missing"), &WalkOptions::default());
        assert!(result.is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_skipped() -> std::io::Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new()?;
        // Both names would collapse to "bad\u{FFFD}.txt" if converted lossily
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"bad\xff.txt")), b"one")?;
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"bad\xfe.txt")), b"two")?;
        fs::write(temp_dir.path().join("good.txt"), b"three")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        let keys: Vec<String> = files.iter().map(|f| f.relative_key()).collect();
        assert_eq!(keys, vec!["good.txt"]);

        Ok(())
    }

    #[test]
    fn test_extension_is_lowercased() {
        let info = FileInfo {
            path: PathBuf::from("/data/Report.ENC"),
            relative_path: PathBuf::from("Report.ENC"),
            size: 0,
        };
        assert_eq!(info.extension().as_deref(), Some(".enc"));

        let bare = FileInfo {
            path: PathBuf::from("/data/Makefile"),
            relative_path: PathBuf::from("Makefile"),
            size: 0,
        };
        assert!(bare.extension().is_none());
    }
}
