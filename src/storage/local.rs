// src/storage/local.rs

//! Local filesystem record store.
//!
//! Records are written to a temporary sibling and renamed into place, so a
//! validator never observes a half-written `*.json` file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::IgnoredAny;
use tokio::io::AsyncWriteExt;

use super::layout::Layout;
use crate::error::Result;
use crate::models::{ModelId, Record};

/// Filesystem store for fetched records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root_dir: PathBuf,
    layout: Layout,
}

impl RecordStore {
    /// Create a new store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            root_dir: root_dir.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Path of the record file for `id`.
    pub fn path(&self, id: ModelId) -> PathBuf {
        self.layout.record_path(&self.root_dir, id)
    }

    /// Write a record as pretty JSON, replacing whatever was there.
    pub async fn write(&self, id: ModelId, record: &Record) -> Result<PathBuf> {
        let path = self.path(id);
        if let Some(parent) = path.parent() {
            // create_dir_all treats a concurrent "already exists" as success
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = to_pretty_json(record)?;
        let tmp = path.with_extension("tmp");
        if let Err(e) = replace_with(&tmp, &path, &bytes).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Could not remove {}: {}", tmp.display(), cleanup);
                }
            }
            return Err(e);
        }
        Ok(path)
    }

    /// Whether a valid record file currently exists for `id`.
    pub async fn is_valid(&self, id: ModelId) -> bool {
        match tokio::fs::read(self.path(id)).await {
            Ok(bytes) => is_valid_json(&bytes),
            Err(_) => false,
        }
    }
}

/// Write `bytes` to `tmp`, sync it, then rename it over `path`.
async fn replace_with(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(tmp, path).await?;
    Ok(())
}

/// Serialize with 4-space indentation, leaving non-ASCII text unescaped.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

/// Fully parse a file; any read or parse failure means invalid.
pub fn read_and_validate(path: &Path) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => is_valid_json(&bytes),
        Err(_) => false,
    }
}

fn is_valid_json(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(text) => serde_json::from_str::<IgnoredAny>(text).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> RecordStore {
        RecordStore::new(tmp.path(), Layout::default())
    }

    #[tokio::test]
    async fn test_write_creates_bucket_and_file() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let path = store
            .write(10_001, &Record::new(json!({"id": 10001})))
            .await
            .unwrap();

        assert_eq!(path, tmp.path().join("00010000").join("00010001.json"));
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        assert!(store.is_valid(10_001).await);
    }

    #[tokio::test]
    async fn test_write_is_pretty_and_keeps_unicode() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let record = Record::new(json!({"name": "東方", "id": 7}));
        let path = store.write(7, &record).await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();

        assert_eq!(text, "{\n    \"name\": \"東方\",\n    \"id\": 7\n}");
    }

    #[tokio::test]
    async fn test_write_overwrites_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let path = store.path(3);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{\"trunc").unwrap();
        assert!(!store.is_valid(3).await);

        store.write(3, &Record::new(json!({"id": 3}))).await.unwrap();
        assert!(store.is_valid(3).await);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        // A directory at the record path makes the final rename fail.
        let path = store.path(9);
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let result = store.write(9, &Record::new(json!({"id": 9}))).await;

        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
        assert!(path.is_dir());
    }

    #[test]
    fn test_read_and_validate() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("good.json");
        let truncated = tmp.path().join("truncated.json");
        let empty = tmp.path().join("empty.json");
        let binary = tmp.path().join("binary.json");
        std::fs::write(&good, br#"{"a": [1, 2]}"#).unwrap();
        std::fs::write(&truncated, br#"{"a": [1, "#).unwrap();
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&binary, [0xff, 0xfe, b'{', b'}']).unwrap();

        assert!(read_and_validate(&good));
        assert!(!read_and_validate(&truncated));
        assert!(!read_and_validate(&empty));
        assert!(!read_and_validate(&binary));
        assert!(!read_and_validate(&tmp.path().join("missing.json")));
    }
}
