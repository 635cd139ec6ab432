//! Vercel Blob store over its HTTP API.
//!
//! Objects are public; `download` fetches the blob URL directly.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{validate_key, ObjectInfo, ObjectStore, StoredObject};
use crate::error::StorageError;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::sanitize::redact_url;

pub const DEFAULT_BLOB_API_URL: &str = "https://blob.vercel-storage.com";
const BLOB_API_VERSION: &str = "7";

pub struct BlobStore {
    client: Client,
    base_url: String,
    token: SecretString,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutBlobResponse {
    url: String,
    #[serde(default)]
    download_url: Option<String>,
    pathname: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedBlob {
    url: String,
    pathname: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    uploaded_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBlobsResponse {
    #[serde(default)]
    blobs: Vec<ListedBlob>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Serialize)]
struct DeleteBlobsRequest<'a> {
    urls: [&'a str; 1],
}

impl BlobStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BLOB_API_URL.to_string(),
            token: SecretString::from(token.into()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn put_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(what.to_string()));
        }
        Err(StorageError::Request(format!(
            "{} returned {}: {}",
            what,
            status.as_u16(),
            body.chars().take(200).collect::<String>()
        )))
    }
}

impl ListedBlob {
    fn into_info(self) -> ObjectInfo {
        let uploaded_at = self
            .uploaded_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.timestamp_millis());
        ObjectInfo {
            key: self.pathname,
            url: self.url,
            size: self.size,
            uploaded_at,
        }
    }
}

#[async_trait]
impl ObjectStore for BlobStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        validate_key(key)?;
        let url = self.put_url(key);
        let response = send_with_retry(&self.retry, "blob.put", || {
            self.client
                .put(&url)
                .header("authorization", self.bearer())
                .header("x-api-version", BLOB_API_VERSION)
                .header("x-content-type", content_type)
                .header("x-add-random-suffix", "0")
                .header("x-allow-overwrite", "1")
                .body(bytes.clone())
        })
        .await
        .map_err(|e| StorageError::Request(e.to_string()))?;

        let put: PutBlobResponse = Self::check(response, "blob upload")
            .await?
            .json()
            .await
            .map_err(|e| StorageError::Request(format!("invalid upload response: {}", e)))?;

        log::debug!("Uploaded blob {}", redact_url(&put.url));
        Ok(StoredObject {
            download_url: put.download_url.unwrap_or_else(|| put.url.clone()),
            url: put.url,
            key: put.pathname,
        })
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let endpoint = format!("{}/delete", self.base_url);
        let response = send_with_retry(&self.retry, "blob.delete", || {
            self.client
                .post(&endpoint)
                .header("authorization", self.bearer())
                .header("x-api-version", BLOB_API_VERSION)
                .json(&DeleteBlobsRequest { urls: [url] })
        })
        .await
        .map_err(|e| StorageError::Request(e.to_string()))?;
        Self::check(response, "blob delete").await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("prefix", prefix)];
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }
            let response = send_with_retry(&self.retry, "blob.list", || {
                self.client
                    .get(&self.base_url)
                    .header("authorization", self.bearer())
                    .header("x-api-version", BLOB_API_VERSION)
                    .query(&query)
            })
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

            let page: ListBlobsResponse = Self::check(response, "blob list")
                .await?
                .json()
                .await
                .map_err(|e| StorageError::Request(format!("invalid list response: {}", e)))?;

            objects.extend(page.blobs.into_iter().map(ListedBlob::into_info));
            match page.cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }
        Ok(objects)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let response = send_with_retry(&self.retry, "blob.get", || self.client.get(url))
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        let bytes = Self::check(response, &redact_url(url))
            .await?
            .bytes()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "vercel-blob"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_url_uses_base() {
        let store = BlobStore::new("tok").with_base_url("http://127.0.0.1:9999/");
        assert_eq!(
            store.put_url("results/j1/matched-results.xlsx"),
            "http://127.0.0.1:9999/results/j1/matched-results.xlsx"
        );
    }

    #[test]
    fn test_list_page_parsing() {
        let json = r#"{
            "blobs": [
                {"url": "https://x.public.blob.vercel-storage.com/boq-files/u/1-a.xlsx",
                 "downloadUrl": "https://x.public.blob.vercel-storage.com/boq-files/u/1-a.xlsx?download=1",
                 "pathname": "boq-files/u/1-a.xlsx",
                 "size": 2048,
                 "uploadedAt": "2026-03-14T10:00:00.000Z"}
            ],
            "cursor": "abc",
            "hasMore": true
        }"#;
        let page: ListBlobsResponse = serde_json::from_str(json).unwrap();
        assert!(page.has_more);
        assert_eq!(page.cursor.as_deref(), Some("abc"));

        let info = page.blobs.into_iter().next().unwrap().into_info();
        assert_eq!(info.key, "boq-files/u/1-a.xlsx");
        assert_eq!(info.size, 2048);
        assert!(info.uploaded_at.is_some());
    }

    #[test]
    fn test_put_response_without_download_url() {
        let put: PutBlobResponse =
            serde_json::from_str(r#"{"url":"https://b/x.xlsx","pathname":"x.xlsx"}"#).unwrap();
        assert!(put.download_url.is_none());
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let store = BlobStore::new("vercel_blob_rw_secret");
        assert!(!store.bearer().is_empty());
        assert!(!format!("{:?}", store.token).contains("vercel_blob_rw_secret"));
    }

    #[tokio::test]
    async fn test_rejects_invalid_key_before_request() {
        let store = BlobStore::new("tok").with_base_url("http://127.0.0.1:1");
        assert!(matches!(
            store.upload("../x", vec![], "x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
