//! Amazon S3 object store.
//!
//! Object URLs are virtual-hosted (`https://{bucket}.s3.amazonaws.com/{key}`)
//! or, with a custom endpoint, path-style (`{endpoint}/{bucket}/{key}`).
//! Download URLs are presigned for one hour.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::{validate_key, ObjectInfo, ObjectStore, StoredObject};
use crate::error::StorageError;
use crate::sanitize::redact_url;

const PRESIGN_TTL: Duration = Duration::from_secs(3600);

pub struct S3Store {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
}

impl S3Store {
    /// Credentials come from the environment (AWS_ACCESS_KEY_ID,
    /// AWS_SECRET_ACCESS_KEY, or an IAM role).
    pub async fn new(bucket: String, endpoint: Option<&str>, region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;

        let client = match endpoint {
            Some(endpoint) => {
                let s3_config = aws_sdk_s3::config::Builder::from(&config)
                    .endpoint_url(endpoint)
                    .force_path_style(true)
                    .build();
                Client::from_conf(s3_config)
            }
            None => Client::new(&config),
        };

        Self {
            client,
            bucket,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
        }
    }

    fn url_for(&self, key: &str) -> String {
        object_url(&self.bucket, self.endpoint.as_deref(), key)
    }

    fn key_from_url(&self, url: &str) -> Result<String, StorageError> {
        let base = self.url_for("");
        let key = url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.strip_prefix(&base))
            .ok_or_else(|| StorageError::InvalidUrl(redact_url(url)))?;
        validate_key(key)?;
        Ok(key.to_string())
    }

    async fn presign(&self, key: &str) -> Result<String, StorageError> {
        let presigning =
            PresigningConfig::expires_in(PRESIGN_TTL).map_err(|e| StorageError::Request(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Request(format!("S3 presign failed: {}", e)))?;
        Ok(request.uri().to_string())
    }
}

fn object_url(bucket: &str, endpoint: Option<&str>, key: &str) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{}/{}", endpoint, bucket, key),
        None => format!("https://{}.s3.amazonaws.com/{}", bucket, key),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        validate_key(key)?;
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Request(format!("S3 upload failed: {}", e)))?;

        log::debug!("Stored {} bytes in s3://{}/{}", size, self.bucket, key);
        Ok(StoredObject {
            url: self.url_for(key),
            download_url: self.presign(key).await?,
            key: key.to_string(),
        })
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let key = self.key_from_url(url)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::Request(format!("S3 delete failed: {}", e)))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| StorageError::Request(format!("S3 list failed: {}", e)))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    url: self.url_for(key),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    uploaded_at: object
                        .last_modified()
                        .and_then(|t| t.to_millis().ok()),
                });
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(objects)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let key = self.key_from_url(url)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let err_str = e.to_string();
                if err_str.contains("NoSuchKey") || err_str.contains("404") {
                    StorageError::NotFound(key.clone())
                } else {
                    StorageError::Request(format!("S3 download failed: {}", e))
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Request(format!("S3 body read failed: {}", e)))?
            .into_bytes()
            .to_vec();
        Ok(bytes)
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
