//! Differential baseline.
//!
//! `hash.json` at the root of a job destination maps every source file's
//! relative path to its lowercase hex SHA-256 digest as of the last run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::fs::atomic;
use crate::Result;

pub const HASH_INDEX_FILE: &str = "hash.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashIndex {
    entries: BTreeMap<String, String>,
}

impl HashIndex {
    pub fn path_for(dest_root: &Path) -> PathBuf {
        dest_root.join(HASH_INDEX_FILE)
    }

    /// Load the baseline stored under `dest_root`, `None` if there is none yet.
    pub async fn load(dest_root: &Path) -> Result<Option<Self>> {
        atomic::read_json(&Self::path_for(dest_root)).await
    }

    /// Replace the stored baseline with this index.
    pub async fn save(&self, dest_root: &Path) -> Result<()> {
        atomic::write_json(&Self::path_for(dest_root), self).await
    }

    pub fn insert(&mut self, relative_path: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(relative_path.into(), digest.into());
    }

    pub fn get(&self, relative_path: &str) -> Option<&str> {
        self.entries.get(relative_path).map(String::as_str)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.entries.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_index_loads_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(HashIndex::load(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_writes_flat_object() {
        let dir = TempDir::new().unwrap();
        let mut index = HashIndex::default();
        index.insert("a.txt", "00ff");
        index.insert("sub/b.txt", "abcd");
        index.save(dir.path()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(HASH_INDEX_FILE)).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({ "a.txt": "00ff", "sub/b.txt": "abcd" }));

        let loaded = HashIndex::load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.get("sub/b.txt"), Some("abcd"));
    }
}
