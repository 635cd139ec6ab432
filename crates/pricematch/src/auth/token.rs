//! Signed access and refresh tokens (HS256).
//!
//! Access tokens live 15 minutes and carry the user's email and role.
//! Refresh tokens live 7 days and carry the subject plus the user's session
//! version, which logout bumps to revoke them.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::AuthError;

pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Session version a refresh token was issued under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<i64>,
    pub iat: i64,
    pub exp: i64,
}

/// Access and refresh token issued together at login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
        }
    }

    pub fn issue_access(&self, user_id: &str, email: &str, role: &str) -> Result<String, AuthError> {
        self.issue_access_at(user_id, email, role, Utc::now())
    }

    pub fn issue_access_at(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        self.sign(&Claims {
            sub: user_id.to_string(),
            email: Some(email.to_string()),
            role: Some(role.to_string()),
            token_type: TokenType::Access,
            ver: None,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ACCESS_TOKEN_TTL_SECS)).timestamp(),
        })
    }

    pub fn issue_refresh(&self, user_id: &str, session_version: i64) -> Result<String, AuthError> {
        self.issue_refresh_at(user_id, session_version, Utc::now())
    }

    pub fn issue_refresh_at(
        &self,
        user_id: &str,
        session_version: i64,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        self.sign(&Claims {
            sub: user_id.to_string(),
            email: None,
            role: None,
            token_type: TokenType::Refresh,
            ver: Some(session_version),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(REFRESH_TOKEN_TTL_SECS)).timestamp(),
        })
    }

    pub fn issue_pair(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
        session_version: i64,
    ) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issue_access(user_id, email, role)?,
            refresh_token: self.issue_refresh(user_id, session_version)?,
            expires_in: ACCESS_TOKEN_TTL_SECS,
        })
    }

    /// Verifies signature and expiry and requires the given token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        if data.claims.token_type != expected {
            return Err(AuthError::WrongTokenType);
        }
        Ok(data.claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}
