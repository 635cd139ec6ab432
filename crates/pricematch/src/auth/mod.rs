//! Account registration, login, token refresh and request authentication.
//!
//! Every authenticated request re-reads the user from the database, so
//! role changes and deactivation take effect immediately.

pub mod password;
pub mod token;

use serde::Serialize;
use thiserror::Error;

use crate::db::{new_id, now_millis, user_repo, Database, DatabaseError};

pub use password::{hash_password, validate_password, verify_password, MIN_PASSWORD_LEN};
pub use token::{Claims, TokenPair, TokenService, TokenType};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication token missing")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Wrong token type")]
    WrongTokenType,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is pending approval")]
    NotApproved,

    #[error("Account is disabled")]
    Inactive,

    #[error("User not found")]
    UserNotFound,

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Admin role required")]
    Forbidden,

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// The authenticated caller attached to each request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Fails with [`AuthError::Forbidden`] unless the caller is an admin.
    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Successful login payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub user: user_repo::UserRow,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Successful refresh payload. The refresh token is returned unchanged.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug)]
pub struct Authenticator {
    db: Database,
    tokens: TokenService,
}

impl Authenticator {
    pub fn new(db: Database, tokens: TokenService) -> Self {
        Self { db, tokens }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Creates an unapproved account with the `user` role.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<user_repo::UserRow, AuthError> {
        self.create_user(email, password, name, ROLE_USER, false)
    }

    /// Creates a user with an explicit role and approval flag.
    pub fn create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: &str,
        approved: bool,
    ) -> Result<user_repo::UserRow, AuthError> {
        let email = email.trim().to_lowercase();
        if !looks_like_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        validate_password(password)?;

        let row = user_repo::UserRow {
            id: new_id(),
            email,
            password_hash: hash_password(password)?,
            name: name.trim().to_string(),
            role: role.to_string(),
            is_approved: approved,
            is_active: true,
            created_at: now_millis(),
            last_login: None,
            session_version: 0,
        };

        user_repo::insert(&self.db, &row).map_err(|e| match e {
            DatabaseError::Conflict(_) => AuthError::EmailTaken,
            other => AuthError::Database(other),
        })?;

        log::info!("Registered user {}", row.id);
        Ok(row)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let user = user_repo::find_by_email(&self.db, email)?.ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        if !user.is_approved {
            return Err(AuthError::NotApproved);
        }

        let tokens = self
            .tokens
            .issue_pair(&user.id, &user.email, &user.role, user.session_version)?;
        let now = now_millis();
        user_repo::touch_last_login(&self.db, &user.id, now)?;

        Ok(LoginOutcome {
            user: user_repo::UserRow {
                last_login: Some(now),
                ..user
            },
            tokens,
        })
    }

    /// Issues a new access token for a valid refresh token.
    pub fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome, AuthError> {
        let claims = self.tokens.verify(refresh_token, TokenType::Refresh)?;
        let user = self.active_user(&claims.sub)?;
        if claims.ver.unwrap_or(0) != user.session_version {
            return Err(AuthError::TokenRevoked);
        }

        Ok(RefreshOutcome {
            access_token: self.tokens.issue_access(&user.id, &user.email, &user.role)?,
            refresh_token: refresh_token.to_string(),
            expires_in: token::ACCESS_TOKEN_TTL_SECS,
        })
    }

    /// Resolves a bearer access token to the current user.
    pub fn authenticate(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.tokens.verify(access_token, TokenType::Access)?;
        let user = self.active_user(&claims.sub)?;

        Ok(AuthUser {
            user_id: user.id,
            email: user.email,
            role: user.role,
        })
    }

    /// Revokes every refresh token the user holds.
    pub fn logout(&self, user_id: &str) -> Result<(), AuthError> {
        let version =
            user_repo::bump_session_version(&self.db, user_id)?.ok_or(AuthError::UserNotFound)?;
        log::info!("User {} logged out, session version {}", user_id, version);
        Ok(())
    }

    pub fn change_password(
        &self,
        user_id: &str,
        current: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = user_repo::find_by_id(&self.db, user_id)?.ok_or(AuthError::UserNotFound)?;
        if !verify_password(current, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        validate_password(new_password)?;
        user_repo::update_password(&self.db, user_id, &hash_password(new_password)?)?;
        Ok(())
    }

    /// Creates or promotes the bootstrap administrator.
    pub fn ensure_admin(&self, email: &str, password: &str) -> Result<(), AuthError> {
        match user_repo::find_by_email(&self.db, email)? {
            Some(existing) => {
                if !existing.is_admin() || !existing.is_approved {
                    user_repo::set_role(&self.db, &existing.id, ROLE_ADMIN)?;
                    user_repo::approve(&self.db, &existing.id)?;
                    log::info!("Promoted bootstrap admin {}", existing.id);
                }
            }
            None => {
                let row = self.create_user(email, password, "Administrator", ROLE_ADMIN, true)?;
                log::info!("Created bootstrap admin {}", row.id);
            }
        }
        Ok(())
    }

    fn active_user(&self, user_id: &str) -> Result<user_repo::UserRow, AuthError> {
        let user = user_repo::find_by_id(&self.db, user_id)?.ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        Ok(user)
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}
