//! Object storage for uploaded BOQ workbooks and exported results.
//!
//! ## Backends
//!
//! - `FilesystemStore` - local directory, for development and tests
//! - `BlobStore` - Vercel Blob HTTP API
//! - `S3Store` (feature: s3) - Amazon S3 or an S3-compatible endpoint
//!
//! ## Key layout
//!
//! ```text
//! boq-files/{user_id}/{timestamp_ms}-{safe_name}
//! results/{job_id}/matched-results.xlsx
//! ```

mod blob;
mod filesystem;
#[cfg(feature = "s3")]
mod s3;

pub use blob::BlobStore;
pub use filesystem::FilesystemStore;
#[cfg(feature = "s3")]
pub use s3::S3Store;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::sanitize::safe_file_name;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Where an object ended up after upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub url: String,
    pub download_url: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    pub url: String,
    pub size: u64,
    /// Milliseconds since the epoch, when the backend reports it.
    pub uploaded_at: Option<i64>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError>;

    async fn delete(&self, url: &str) -> Result<(), StorageError>;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn upload_boq_file(
        &self,
        user_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, StorageError> {
        let key = boq_file_key(user_id, file_name, crate::db::now_millis());
        self.upload(&key, bytes, XLSX_CONTENT_TYPE).await
    }

    async fn upload_results_file(
        &self,
        job_id: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, StorageError> {
        self.upload(&results_key(job_id), bytes, XLSX_CONTENT_TYPE)
            .await
    }
}

pub fn boq_file_key(user_id: &str, file_name: &str, timestamp_ms: i64) -> String {
    format!(
        "boq-files/{}/{}-{}",
        user_id,
        timestamp_ms,
        safe_file_name(file_name)
    )
}

pub fn results_key(job_id: &str) -> String {
    format!("results/{}/matched-results.xlsx", job_id)
}

/// Rejects keys that could escape the store's namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Builds the configured backend.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::Filesystem => Arc::new(FilesystemStore::new(&config.dir)),
        StorageBackend::Blob => {
            let token = config
                .blob_token
                .clone()
                .ok_or_else(|| StorageError::Request("blob token is not configured".into()))?;
            let mut store = BlobStore::new(token);
            if let Some(base) = &config.blob_api_url {
                store = store.with_base_url(base);
            }
            Arc::new(store)
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| StorageError::Request("S3 bucket is not configured".into()))?;
            Arc::new(
                S3Store::new(
                    bucket,
                    config.s3_endpoint.as_deref(),
                    config.aws_region.as_deref(),
                )
                .await,
            )
        }
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => {
            return Err(StorageError::Request(
                "S3 storage requires building with the `s3` feature".into(),
            ))
        }
    };
    log::info!("Object storage backend: {}", store.name());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boq_file_key_is_namespaced_and_sanitized() {
        let key = boq_file_key("user-1", "Tender BOQ (rev 2).xlsx", 1700000000000);
        assert_eq!(key, "boq-files/user-1/1700000000000-Tender_BOQ__rev_2_.xlsx");
    }

    #[test]
    fn test_results_key() {
        assert_eq!(results_key("job-9"), "results/job-9/matched-results.xlsx");
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("boq-files/u/1-a.xlsx").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("boq-files/../../secret").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[tokio::test]
    async fn test_from_config_blob_requires_token() {
        let config = StorageConfig {
            backend: StorageBackend::Blob,
            ..StorageConfig::default()
        };
        assert!(from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_filesystem_upload_boq_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig {
            dir: dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let store = from_config(&config).await.unwrap();
        let stored = store
            .upload_boq_file("u1", "my boq.xlsx", b"PK".to_vec())
            .await
            .unwrap();
        assert!(stored.key.starts_with("boq-files/u1/"));
        assert!(stored.key.ends_with("-my_boq.xlsx"));
        assert_eq!(store.download(&stored.url).await.unwrap(), b"PK");
    }
}
