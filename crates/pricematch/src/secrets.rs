//! Deployment secrets and application-setting protection.
//!
//! Deployment secrets (token signing key, cron secret) are given either
//! inline in the configuration or as a path to a mounted secret file, as
//! with Docker or Kubernetes secrets. Environment variables feed the inline
//! values through the config loader.
//!
//! Application settings that look like credentials are masked on read and,
//! when an encryption key is configured, stored encrypted with AES-256-GCM.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::SecretString;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("{name} is not configured")]
    Missing { name: &'static str },

    #[error("Cannot read {name} from '{}': {source}", .path.display())]
    Unreadable {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} file '{}' is empty", .path.display())]
    EmptyFile { name: &'static str, path: PathBuf },

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a named deployment secret comes from.
///
/// A non-blank inline value wins; otherwise the file is read and trimmed.
#[derive(Debug, Clone, Copy)]
pub struct SecretSource<'a> {
    pub name: &'static str,
    pub inline: Option<&'a str>,
    pub file: Option<&'a str>,
}

impl<'a> SecretSource<'a> {
    pub fn new(name: &'static str, inline: Option<&'a str>, file: Option<&'a str>) -> Self {
        Self { name, inline, file }
    }

    pub fn required(&self) -> Result<SecretString> {
        self.optional()?
            .ok_or(SecretError::Missing { name: self.name })
    }

    /// Resolves the secret, treating "nothing configured" as `None`.
    ///
    /// A configured file that cannot be read is still an error.
    pub fn optional(&self) -> Result<Option<SecretString>> {
        if let Some(value) = self.inline.map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(Some(SecretString::from(value.to_string())));
        }
        let Some(file) = self.file.filter(|f| !f.trim().is_empty()) else {
            return Ok(None);
        };

        let path = expand_home(file.trim());
        let content = std::fs::read_to_string(&path).map_err(|source| SecretError::Unreadable {
            name: self.name,
            path: path.clone(),
            source,
        })?;
        let value = content.trim();
        if value.is_empty() {
            return Err(SecretError::EmptyFile {
                name: self.name,
                path,
            });
        }
        Ok(Some(SecretString::from(value.to_string())))
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ============================================
// Sensitive settings
// ============================================

const SENSITIVE_MARKERS: [&str; 4] = ["API_KEY", "SECRET", "TOKEN", "PASSWORD"];

/// Returns true when a setting key names a credential.
///
/// Matching is case-insensitive: `COHERE_API_KEY`, `openai_api_key` and
/// `blob_read_write_token` are all sensitive.
pub fn is_sensitive_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SENSITIVE_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Masks a secret, keeping only the last four characters.
///
/// Values of four characters or fewer are fully masked.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

// ============================================
// Setting encryption
// ============================================

/// Prefix marking a setting value as ciphertext produced by [`SettingsCipher`].
pub const ENCRYPTED_PREFIX: &str = "enc:";

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Encrypts sensitive application settings at rest using AES-256-GCM.
///
/// The key must be a 64-character hex string (32 bytes).
pub struct SettingsCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SettingsCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsCipher").finish_non_exhaustive()
    }
}

impl SettingsCipher {
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex.trim())
            .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Encrypts plaintext into `enc:<hex(nonce || ciphertext)>`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::EncryptionError(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(format!("{}{}", ENCRYPTED_PREFIX, hex_encode(&combined)))
    }

    /// Decrypts a value produced by [`SettingsCipher::encrypt`].
    ///
    /// Values without the `enc:` prefix are returned unchanged, so settings
    /// written before a key was configured remain readable.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let Some(ciphertext_hex) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let combined = hex_decode(ciphertext_hex)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid hex: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(SecretError::DecryptionError(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::DecryptionError(e.to_string()))?;

        String::from_utf8(plaintext_bytes)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid UTF-8: {}", e)))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .ok_or_else(|| format!("Invalid hex at position {}", i))
                .and_then(|pair| {
                    u8::from_str_radix(pair, 16)
                        .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
                })
        })
        .collect()
}

fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        SecretError::EncryptionError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}
