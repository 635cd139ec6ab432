//! Application settings with credential handling.
//!
//! Keys naming credentials (see [`is_sensitive_key`]) are encrypted at rest
//! when a [`SettingsCipher`] is configured, never returned by
//! [`SettingsStore::list_public`], and only shown masked.

use serde::Serialize;

use crate::db::settings_repo::{self, SettingRow};
use crate::db::{now_millis, Database};
use crate::error::PricematchError;
use crate::secrets::{is_sensitive_key, mask_secret, SettingsCipher};

/// Credential keys the admin screen always lists, set or not.
pub const KNOWN_API_KEYS: [&str; 2] = ["COHERE_API_KEY", "OPENAI_API_KEY"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyStatus {
    pub key: String,
    pub is_set: bool,
    pub masked_value: Option<String>,
    pub updated_at: Option<i64>,
}

#[derive(Debug)]
pub struct SettingsStore {
    db: Database,
    cipher: Option<SettingsCipher>,
}

impl SettingsStore {
    pub fn new(db: Database, cipher: Option<SettingsCipher>) -> Self {
        Self { db, cipher }
    }

    /// Every setting except credentials.
    pub fn list_public(&self) -> Result<Vec<SettingRow>, PricematchError> {
        Ok(settings_repo::list_all(&self.db)?
            .into_iter()
            .filter(|s| !is_sensitive_key(&s.key))
            .collect())
    }

    /// Known and stored credential keys with their values masked.
    pub fn list_api_keys_masked(&self) -> Result<Vec<ApiKeyStatus>, PricematchError> {
        let stored: Vec<SettingRow> = settings_repo::list_all(&self.db)?
            .into_iter()
            .filter(|s| is_sensitive_key(&s.key))
            .collect();

        let mut keys: Vec<String> = KNOWN_API_KEYS.iter().map(|k| k.to_string()).collect();
        for setting in &stored {
            if !keys.contains(&setting.key) {
                keys.push(setting.key.clone());
            }
        }

        keys.into_iter()
            .map(|key| {
                let Some(setting) = stored.iter().find(|s| s.key == key) else {
                    return Ok(ApiKeyStatus {
                        key,
                        is_set: false,
                        masked_value: None,
                        updated_at: None,
                    });
                };
                let plain = self.reveal(&setting.value)?;
                Ok(ApiKeyStatus {
                    key,
                    is_set: !plain.is_empty(),
                    masked_value: (!plain.is_empty()).then(|| mask_secret(&plain)),
                    updated_at: Some(setting.updated_at),
                })
            })
            .collect()
    }

    /// Plaintext value of a setting, decrypting credentials.
    pub fn get(&self, key: &str) -> Result<Option<String>, PricematchError> {
        settings_repo::get(&self.db, key)?
            .map(|s| self.reveal(&s.value))
            .transpose()
    }

    /// Creates or replaces a setting. Credentials are encrypted when a
    /// cipher is configured. The returned row never carries a credential
    /// in the clear.
    pub fn set(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        updated_by: &str,
    ) -> Result<SettingRow, PricematchError> {
        let sensitive = is_sensitive_key(key);
        let stored_value = match (&self.cipher, sensitive) {
            (Some(cipher), true) => cipher.encrypt(value)?,
            _ => value.to_string(),
        };

        let mut row = SettingRow {
            key: key.to_string(),
            value: stored_value,
            description: description.map(String::from),
            updated_at: now_millis(),
            updated_by: Some(updated_by.to_string()),
        };
        settings_repo::upsert(&self.db, &row)?;
        log::info!("Setting '{}' updated by {}", key, updated_by);

        if sensitive {
            row.value = mask_secret(value);
        }
        Ok(row)
    }

    fn reveal(&self, stored: &str) -> Result<String, PricematchError> {
        match &self.cipher {
            Some(cipher) => Ok(cipher.decrypt(stored)?),
            None => Ok(stored.to_string()),
        }
    }
}
