//! Request extractors: the authenticated caller, client metadata and JSON
//! bodies with envelope-shaped rejections.

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::Json;
use secrecy::ExposeSecret;

use pricematch::db::activity_repo::NewActivity;
use pricematch::sanitize::token_fingerprint;
use pricematch::AuthUser;

use crate::error::ApiError;
use crate::state::SharedState;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The caller behind a valid access token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
        Ok(CurrentUser(state.auth.authenticate(token)?))
    }
}

/// A caller with the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<SharedState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        user.require_admin()?;
        Ok(AdminUser(user))
    }
}

/// Allows the request when no cron secret is configured, or when the bearer
/// token equals it.
#[derive(Debug, Clone, Copy)]
pub struct CronAuthorized;

#[async_trait]
impl FromRequestParts<SharedState> for CronAuthorized {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = &state.cron_secret else {
            return Ok(CronAuthorized);
        };
        let presented = bearer_token(&parts.headers);
        if presented == Some(secret.expose_secret()) {
            return Ok(CronAuthorized);
        }
        tracing::warn!(
            path = %parts.uri.path(),
            token = %presented_fingerprint(presented),
            "Rejected cron request"
        );
        Err(ApiError::unauthorized("Unauthorized"))
    }
}

/// Log-safe label for a presented bearer token.
fn presented_fingerprint(token: Option<&str>) -> String {
    token.map_or_else(|| "none".to_string(), token_fingerprint)
}

/// Forwarded address and user agent for activity logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| "unknown".to_string())
        };
        Self {
            ip_address: header("x-forwarded-for"),
            user_agent: header(USER_AGENT.as_str()),
        }
    }

    /// Stamps an activity entry with this client's metadata.
    pub fn stamp(&self, mut entry: NewActivity) -> NewActivity {
        entry.ip_address = Some(self.ip_address.clone());
        entry.user_agent = Some(self.user_agent.clone());
        entry
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientInfo::from_headers(&parts.headers))
    }
}

/// `Json<T>` whose rejection renders as a 400 envelope.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}
