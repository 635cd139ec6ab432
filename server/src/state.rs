//! Shared handler state.

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};

use pricematch::jobs::{HttpDispatcher, InProcessDispatcher};
use pricematch::{
    storage, Authenticator, Database, JobDispatcher, JobProcessor, JobScheduler, MethodRouter,
    ObjectStore, PriceCatalogue, PricematchError, RemoteMatcher, ServerConfig, SettingsCipher,
    SettingsStore, TokenService,
};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub db: Database,
    pub auth: Authenticator,
    pub store: Arc<dyn ObjectStore>,
    pub catalogue: PriceCatalogue,
    pub processor: JobProcessor,
    pub scheduler: Arc<JobScheduler>,
    pub settings: SettingsStore,
    pub cron_secret: Option<SecretString>,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl AppState {
    /// Wires the services around an open database and object store.
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        config: &ServerConfig,
    ) -> Result<Self, PricematchError> {
        let auth = Authenticator::new(db.clone(), TokenService::new(&config.jwt_secret()?));
        let cron_secret = config.cron_secret()?;

        let catalogue = PriceCatalogue::new(db.clone());
        let remote = config.matching_service_url.as_deref().map(RemoteMatcher::new);
        let processor = JobProcessor::new(
            db.clone(),
            catalogue.clone(),
            Arc::new(MethodRouter::new(remote)),
        );

        let dispatcher: Arc<dyn JobDispatcher> = match &config.process_job_url {
            Some(url) => Arc::new(HttpDispatcher::new(url.clone(), cron_secret.clone())),
            None => Arc::new(InProcessDispatcher::new(processor.clone())),
        };
        let scheduler = Arc::new(JobScheduler::new(
            db.clone(),
            dispatcher,
            config.scheduler.clone(),
        ));

        let cipher = config
            .settings_encryption_key
            .as_deref()
            .map(SettingsCipher::from_hex_key)
            .transpose()?;
        if cipher.is_none() {
            warn!("SETTINGS_ENCRYPTION_KEY is not set; API keys are stored unencrypted");
        }

        Ok(Self {
            settings: SettingsStore::new(db.clone(), cipher),
            db,
            auth,
            store,
            catalogue,
            processor,
            scheduler,
            cron_secret,
            max_upload_bytes: config.max_upload_bytes,
            cors_origins: config.cors_origins.clone(),
        })
    }

    /// Opens the database and storage backend named by `config`.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, PricematchError> {
        let path: PathBuf = config
            .database_path
            .clone()
            .or_else(pricematch::db::default_database_path)
            .unwrap_or_else(|| PathBuf::from("pricematch.db"));
        let db = Database::open(&path)?;
        let store = storage::from_config(&config.storage).await?;
        info!(backend = store.name(), "Object storage ready");

        let state = Self::new(db, store, config)?;
        if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
            state.auth.ensure_admin(email, password)?;
        }
        Ok(state)
    }
}
