use std::path::PathBuf;
use thiserror::Error;

pub use crate::auth::AuthError;
pub use crate::db::DatabaseError;
pub use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum PricematchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] SpreadsheetError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Matching error: {0}")]
    Match(#[from] MatchError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Price list error: {0}")]
    PriceList(#[from] PriceListError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value for environment variable '{name}': {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("Failed to resolve secret: {0}")]
    Secret(#[from] SecretError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("URL does not belong to this store: {0}")]
    InvalidUrl(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage request failed: {0}")]
    Request(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Failed to open workbook: {0}")]
    Archive(String),

    #[error("Workbook part missing: {0}")]
    MissingPart(String),

    #[error("Malformed XML in '{part}': {reason}")]
    Xml { part: String, reason: String },

    #[error("Workbook exceeds limits in '{part}': {reason}")]
    TooLarge { part: String, reason: String },

    #[error("Failed to write workbook: {0}")]
    Write(String),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Unknown matching method: {0}")]
    UnknownMethod(String),

    #[error("Job dispatch failed: {0}")]
    Dispatch(String),

    #[error("No valid items found in the file")]
    NoItems,

    #[error("Corrupt batch {batch_id}: {reason}")]
    CorruptBatch { batch_id: i64, reason: String },

    #[error("Match result not found: {0}")]
    ResultNotFound(String),

    #[error("Invalid correction: {0}")]
    InvalidCorrection(String),

    #[error("Matching failed: {0}")]
    Match(#[from] MatchError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] SpreadsheetError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Matching method '{0}' requires a matching service, but none is configured")]
    NotConfigured(String),

    #[error("Matching service request failed: {0}")]
    Request(String),

    #[error("Matching service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("No active price items to match against")]
    EmptyCatalogue,

    #[error("No suitable match found with {0} method")]
    NoMatch(String),

    #[error("Matching service returned unknown price item: {0}")]
    UnknownItem(String),
}

#[derive(Error, Debug)]
pub enum PriceListError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No valid items found in file")]
    NoItems,

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] SpreadsheetError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, PricematchError>;
