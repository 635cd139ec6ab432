use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::secrets::SecretSource;

/// Default maximum size of an uploaded BOQ workbook.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub jwt_secret_file: Option<String>,
    #[serde(default)]
    pub cron_secret: Option<String>,
    #[serde(default)]
    pub cron_secret_file: Option<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub matching_service_url: Option<String>,
    /// Absolute URL of `POST /api/price-matching/process-job`. When unset the
    /// scheduler runs batches in-process.
    #[serde(default)]
    pub process_job_url: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub settings_encryption_key: Option<String>,
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            bind_address: default_bind_address(),
            jwt_secret: None,
            jwt_secret_file: None,
            cron_secret: None,
            cron_secret_file: None,
            storage: StorageConfig::default(),
            matching_service_url: None,
            process_job_url: None,
            scheduler: SchedulerConfig::default(),
            settings_encryption_key: None,
            admin_email: None,
            admin_password: None,
            max_upload_bytes: default_max_upload_bytes(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Resolves the token signing secret from `jwtSecret` or `jwtSecretFile`.
    pub fn jwt_secret(&self) -> Result<SecretString, ConfigError> {
        let source = SecretSource::new(
            "jwtSecret",
            self.jwt_secret.as_deref(),
            self.jwt_secret_file.as_deref(),
        );
        Ok(source.required()?)
    }

    /// The shared secret guarding the cron and process-job endpoints, if any.
    pub fn cron_secret(&self) -> Result<Option<SecretString>, ConfigError> {
        let source = SecretSource::new(
            "cronSecret",
            self.cron_secret.as_deref(),
            self.cron_secret_file.as_deref(),
        );
        Ok(source.optional()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    S3,
    Blob,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filesystem" | "fs" | "local" => Ok(Self::Filesystem),
            "s3" => Ok(Self::S3),
            "blob" | "vercel" | "vercel-blob" => Ok(Self::Blob),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub blob_token: Option<String>,
    /// Blob API base URL; defaults to the hosted Vercel endpoint.
    #[serde(default)]
    pub blob_api_url: Option<String>,
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pricematch").join("objects"))
        .unwrap_or_else(|| PathBuf::from("./data/objects"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            dir: default_storage_dir(),
            s3_bucket: None,
            s3_endpoint: None,
            aws_region: None,
            blob_token: None,
            blob_api_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_jobs_per_run")]
    pub jobs_per_run: usize,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

fn default_jobs_per_run() -> usize {
    5
}

fn default_lease_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_interval_secs(),
            jobs_per_run: default_jobs_per_run(),
            lease_secs: default_lease_secs(),
        }
    }
}
