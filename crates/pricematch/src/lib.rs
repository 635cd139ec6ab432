pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod matching;
pub mod price_list;
pub mod retry;
pub mod sanitize;
pub mod secrets;
pub mod settings;
pub mod spreadsheet;
pub mod storage;

pub use auth::{AuthUser, Authenticator, TokenService};
pub use config::{load_from_env, ServerConfig};
pub use db::Database;
pub use error::{
    ConfigError, JobError, MatchError, PriceListError, PricematchError, Result, SpreadsheetError,
    StorageError,
};
pub use jobs::{JobDispatcher, JobProcessor, JobScheduler};
pub use matching::{MatchingMethod, MethodRouter, PriceCatalogue, PriceMatcher, RemoteMatcher};
pub use secrets::{SecretError, SecretSource, SettingsCipher};
pub use settings::SettingsStore;
pub use storage::ObjectStore;
