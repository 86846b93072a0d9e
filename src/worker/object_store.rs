use crate::error::{Result, RowragError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// An object key and its size in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's bytes; failures are `Download` errors
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Move `key` to `<dest_prefix>/<filename>` and return the new key
    async fn move_object(&self, bucket: &str, key: &str, dest_prefix: &str) -> Result<String>;

    /// Keys under `prefix`, sorted
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>>;
}

/// Last path segment of a key
pub fn filename_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Object store backed by a local directory: `<root>/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a bucket/key to a path, rejecting anything that escapes the bucket
    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.root.join(checked_segment(bucket)?);
        let relative = Path::new(key);
        if key.is_empty() {
            return Err(RowragError::InvalidInput("object key is empty".to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                _ => {
                    return Err(RowragError::InvalidInput(format!(
                        "object key '{}' must be a relative path without '..'",
                        key
                    )))
                }
            }
        }
        Ok(path)
    }
}

fn checked_segment(bucket: &str) -> Result<&str> {
    if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || bucket == ".." || bucket == "." {
        return Err(RowragError::InvalidInput(format!("invalid bucket name '{}'", bucket)));
    }
    Ok(bucket)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(bucket, key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| RowragError::Download(format!("{}/{}: {}", bucket, key, e)))
    }

    async fn move_object(&self, bucket: &str, key: &str, dest_prefix: &str) -> Result<String> {
        let dest_key = format!("{}/{}", dest_prefix.trim_end_matches('/'), filename_of(key));
        let from = self.resolve(bucket, key)?;
        let to = self.resolve(bucket, &dest_key)?;

        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Err(e) = tokio::fs::rename(&from, &to).await {
            // rename fails across filesystems; fall back to copy + delete
            log::debug!("rename failed ({}), copying {} instead", e, from.display());
            tokio::fs::copy(&from, &to).await.map_err(|e| {
                RowragError::ObjectStore(format!("move {}/{} failed: {}", bucket, key, e))
            })?;
            tokio::fs::remove_file(&from).await?;
        }

        log::info!("Moved {}/{} -> {}/{}", bucket, key, bucket, dest_key);
        Ok(dest_key)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let bucket_dir = self.root.join(checked_segment(bucket)?);
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            if !bucket_dir.exists() {
                return Ok(Vec::new());
            }

            let mut objects = Vec::new();
            for entry in WalkDir::new(&bucket_dir).follow_links(false) {
                let entry = entry.map_err(|e| RowragError::ObjectStore(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&bucket_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(&prefix) {
                    continue;
                }
                let size = entry
                    .metadata()
                    .map_err(|e| RowragError::ObjectStore(e.to_string()))?
                    .len();
                objects.push(ObjectInfo { key, size });
            }
            objects.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(objects)
        })
        .await
        .map_err(|e| RowragError::ObjectStore(format!("listing task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(files: &[(&str, &str)]) -> (LocalObjectStore, TempDir) {
        let temp = TempDir::new().unwrap();
        for (key, content) in files {
            let path = temp.path().join("uploads").join(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        (LocalObjectStore::new(temp.path()), temp)
    }

    #[tokio::test]
    async fn test_download_and_move() {
        let (store, temp) = store_with(&[("incoming/a.csv", "title\nx\n")]);

        let bytes = store.download("uploads", "incoming/a.csv").await.unwrap();
        assert_eq!(bytes, b"title\nx\n");

        let new_key = store.move_object("uploads", "incoming/a.csv", "completed").await.unwrap();
        assert_eq!(new_key, "completed/a.csv");
        assert!(temp.path().join("uploads/completed/a.csv").exists());
        assert!(!temp.path().join("uploads/incoming/a.csv").exists());
    }

    #[tokio::test]
    async fn test_missing_object_is_download_error() {
        let (store, _temp) = store_with(&[]);
        let err = store.download("uploads", "incoming/nope.csv").await.unwrap_err();
        assert!(matches!(err, RowragError::Download(_)));
    }

    #[tokio::test]
    async fn test_list_filters_prefix() {
        let (store, _temp) = store_with(&[
            ("incoming/b.csv", "x"),
            ("incoming/a.csv", "xy"),
            ("completed/c.csv", "z"),
        ]);
        let listed = store.list("uploads", "incoming/").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ObjectInfo { key: "incoming/a.csv".to_string(), size: 2 },
                ObjectInfo { key: "incoming/b.csv".to_string(), size: 1 },
            ]
        );
        assert!(store.list("other", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (store, _temp) = store_with(&[]);
        assert!(matches!(
            store.download("uploads", "../secret").await.unwrap_err(),
            RowragError::InvalidInput(_)
        ));
        assert!(store.download("../x", "a.csv").await.is_err());
    }

    #[test]
    fn test_filename_of() {
        assert_eq!(filename_of("incoming/sub/a.csv"), "a.csv");
        assert_eq!(filename_of("a.csv"), "a.csv");
    }
}
