use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::config::schema::{ServerConfig, StorageBackend};
use crate::error::ConfigError;
use crate::secrets::SettingsCipher;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "PRICEMATCH_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = serde_json::from_str(content)?;
    Ok(config)
}

/// Builds the server configuration from the process environment.
///
/// Reads the JSON file named by `PRICEMATCH_CONFIG` when set, applies
/// environment overrides, then validates the result.
pub fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let mut config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => load_config(path.trim())?,
        _ => ServerConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;

    Ok(config)
}

/// Applies environment-variable overrides using `lookup` to read values.
///
/// Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("DATABASE_PATH") {
        config.database_path = Some(PathBuf::from(v));
    }
    if let Some(v) = get("BIND_ADDRESS") {
        config.bind_address = v;
    }
    if let Some(v) = get("JWT_SECRET") {
        config.jwt_secret = Some(v);
    }
    if let Some(v) = get("JWT_SECRET_FILE") {
        config.jwt_secret_file = Some(v);
    }
    if let Some(v) = get("CRON_SECRET") {
        config.cron_secret = Some(v);
    }
    if let Some(v) = get("CRON_SECRET_FILE") {
        config.cron_secret_file = Some(v);
    }
    if let Some(v) = get("STORAGE_BACKEND") {
        config.storage.backend =
            v.parse::<StorageBackend>()
                .map_err(|reason| ConfigError::InvalidEnv {
                    name: "STORAGE_BACKEND".to_string(),
                    reason,
                })?;
    }
    if let Some(v) = get("STORAGE_DIR") {
        config.storage.dir = PathBuf::from(v);
    }
    if let Some(v) = get("S3_BUCKET") {
        config.storage.s3_bucket = Some(v);
    }
    if let Some(v) = get("S3_ENDPOINT") {
        config.storage.s3_endpoint = Some(v);
    }
    if let Some(v) = get("AWS_REGION") {
        config.storage.aws_region = Some(v);
    }
    if let Some(v) = get("BLOB_READ_WRITE_TOKEN") {
        config.storage.blob_token = Some(v);
    }
    if let Some(v) = get("MATCHING_SERVICE_URL") {
        config.matching_service_url = Some(v);
    }
    if let Some(v) = get("PROCESS_JOB_URL") {
        config.process_job_url = Some(v);
    }
    if let Some(v) = get("SCHEDULER_INTERVAL_SECS") {
        config.scheduler.interval_secs =
            v.trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidEnv {
                    name: "SCHEDULER_INTERVAL_SECS".to_string(),
                    reason: e.to_string(),
                })?;
    }
    if let Some(v) = get("SETTINGS_ENCRYPTION_KEY") {
        config.settings_encryption_key = Some(v);
    }
    if let Some(v) = get("ADMIN_EMAIL") {
        config.admin_email = Some(v);
    }
    if let Some(v) = get("ADMIN_PASSWORD") {
        config.admin_password = Some(v);
    }

    Ok(())
}

pub fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.bind_address.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Validation {
            message: format!("Invalid bind address: {}", config.bind_address),
        });
    }

    config.jwt_secret()?;

    if config.scheduler.interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.intervalSecs must be greater than 0".to_string(),
        });
    }
    if config.scheduler.jobs_per_run == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.jobsPerRun must be greater than 0".to_string(),
        });
    }

    match config.storage.backend {
        StorageBackend::S3 if config.storage.s3_bucket.is_none() => {
            return Err(ConfigError::Validation {
                message: "S3 storage requires S3_BUCKET".to_string(),
            });
        }
        StorageBackend::Blob if config.storage.blob_token.is_none() => {
            return Err(ConfigError::Validation {
                message: "Blob storage requires BLOB_READ_WRITE_TOKEN".to_string(),
            });
        }
        _ => {}
    }

    if let Some(key) = &config.settings_encryption_key {
        SettingsCipher::from_hex_key(key)?;
    }

    if config.admin_email.is_some() != config.admin_password.is_some() {
        return Err(ConfigError::Validation {
            message: "ADMIN_EMAIL and ADMIN_PASSWORD must be set together".to_string(),
        });
    }

    for url in [&config.matching_service_url, &config.process_job_url]
        .into_iter()
        .flatten()
    {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation {
                message: format!("Expected an http(s) URL, got '{}'", url),
            });
        }
    }

    Ok(())
}
