use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_key, ObjectInfo, ObjectStore, StoredObject};
use crate::error::StorageError;

const URL_SCHEME: &str = "file://";

/// Stores objects as files under a root directory, one file per key.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}{}", URL_SCHEME, self.root.join(key).display())
    }

    /// Maps a `file://` URL issued by this store back to its key.
    fn key_from_url(&self, url: &str) -> Result<String, StorageError> {
        let path = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;
        let key = Path::new(path)
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidUrl(url.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        validate_key(&key)?;
        Ok(key)
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Writes next to the target and renames over it, so readers never see
    /// a half-written object.
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let tmp_path = path.with_extension("partial");
        std::fs::write(&tmp_path, content).map_err(|e| StorageError::WriteFile {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            }
        })
    }

    fn collect(&self, dir: &Path, out: &mut Vec<ObjectInfo>) -> Result<(), StorageError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::ReadFile {
                    path: dir.to_path_buf(),
                    source: e,
                })
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                self.collect(&path, out)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative.to_string_lossy().replace('\\', "/");
            if key.ends_with(".partial") {
                continue;
            }
            let uploaded_at = meta
                .modified()
                .ok()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis());
            out.push(ObjectInfo {
                url: self.url_for(&key),
                key,
                size: meta.len(),
                uploaded_at,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        validate_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            self.ensure_directory(parent)?;
        }
        self.write_atomic(&path, &bytes)?;

        log::debug!("Stored {} bytes at {}", bytes.len(), path.display());
        let url = self.url_for(key);
        Ok(StoredObject {
            download_url: url.clone(),
            url,
            key: key.to_string(),
        })
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let path = self.root.join(self.key_from_url(url)?);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFile { path, source: e }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = Vec::new();
        self.collect(&self.root, &mut objects)?;
        objects.retain(|o| o.key.starts_with(prefix));
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.root.join(self.key_from_url(url)?);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(url.to_string())
            } else {
                StorageError::ReadFile { path, source: e }
            }
        })
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_and_download() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path());

        let stored = store
            .upload("results/job-1/matched-results.xlsx", b"Hello".to_vec(), "x")
            .await
            .unwrap();

        assert!(temp_dir
            .path()
            .join("results/job-1/matched-results.xlsx")
            .exists());
        assert_eq!(stored.url, stored.download_url);
        assert_eq!(store.download(&stored.url).await.unwrap(), b"Hello");
    }

    #[tokio::test]
    async fn test_upload_overwrites_existing_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path());

        store.upload("a/b.xlsx", b"First".to_vec(), "x").await.unwrap();
        let stored = store.upload("a/b.xlsx", b"Second".to_vec(), "x").await.unwrap();

        assert_eq!(store.download(&stored.url).await.unwrap(), b"Second");
        assert_eq!(store.list("a/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path());

        store.upload("boq-files/u1/1-a.xlsx", vec![1], "x").await.unwrap();
        store.upload("boq-files/u1/2-b.xlsx", vec![1, 2], "x").await.unwrap();
        store.upload("boq-files/u2/3-c.xlsx", vec![1], "x").await.unwrap();

        let listed = store.list("boq-files/u1/").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["boq-files/u1/1-a.xlsx", "boq-files/u1/2-b.xlsx"]);
        assert_eq!(listed[1].size, 2);
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().join("never-created"));
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path());

        let stored = store.upload("x/y.xlsx", vec![1], "x").await.unwrap();
        store.delete(&stored.url).await.unwrap();
        store.delete(&stored.url).await.unwrap();
        assert!(matches!(
            store.download(&stored.url).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_foreign_urls_and_bad_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path());

        assert!(matches!(
            store.download("https://example.com/a.xlsx").await,
            Err(StorageError::InvalidUrl(_))
        ));
        assert!(matches!(
            store.download("file:///somewhere/else/a.xlsx").await,
            Err(StorageError::InvalidUrl(_))
        ));
        assert!(matches!(
            store.upload("../escape.xlsx", vec![], "x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
