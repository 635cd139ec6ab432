//! Authentication routes

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tracing::info;

use pricematch::auth::AuthError;
use pricematch::db::activity_repo::{self, NewActivity};
use pricematch::db::{now_millis, user_repo};

use super::{created, message, ok, ApiResult};
use crate::error::ApiError;
use crate::extract::{ApiJson, ClientInfo, CurrentUser};
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/change-password", post(change_password))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn register(
    State(state): State<SharedState>,
    client: ClientInfo,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult {
    let (Some(email), Some(password), Some(name)) = (
        required(req.email),
        required(req.password),
        required(req.name),
    ) else {
        return Err(ApiError::bad_request(
            "Email, password, and name are required",
        ));
    };

    let user = state.auth.register(email.trim(), &password, name.trim())?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&user.id, "register")
                .entity("users", &user.id)
                .details("User registered"),
        ),
        now_millis(),
    )?;
    info!(user_id = %user.id, "User registered, awaiting approval");

    Ok(created(serde_json::json!({
        "user": user,
        "message": "Registration successful. Your account is awaiting admin approval.",
    })))
}

pub async fn login(
    State(state): State<SharedState>,
    client: ClientInfo,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult {
    let (Some(email), Some(password)) = (required(req.email), required(req.password)) else {
        return Err(ApiError::bad_request("Email and password are required"));
    };

    let outcome = state.auth.login(email.trim(), &password)?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&outcome.user.id, "login")
                .entity("users", &outcome.user.id)
                .details("User logged in"),
        ),
        now_millis(),
    )?;

    Ok(ok(outcome))
}

pub async fn refresh(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> ApiResult {
    let Some(token) = required(req.refresh_token) else {
        return Err(ApiError::bad_request("Refresh token is required"));
    };

    match state.auth.refresh(&token) {
        Ok(outcome) => Ok(ok(outcome)),
        Err(AuthError::WrongTokenType) => Err(ApiError::unauthorized("Invalid token type")),
        Err(AuthError::UserNotFound) => Err(ApiError::unauthorized("User not found")),
        Err(AuthError::InvalidToken(_) | AuthError::TokenExpired | AuthError::TokenRevoked) => {
            Err(ApiError::unauthorized("Invalid refresh token"))
        }
        Err(other) => Err(other.into()),
    }
}

pub async fn logout(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
) -> ApiResult {
    state.auth.logout(&caller.user_id)?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "logout")
                .entity("users", &caller.user_id)
                .details("User logged out"),
        ),
        now_millis(),
    )?;

    Ok(message("Logged out successfully"))
}

pub async fn me(State(state): State<SharedState>, CurrentUser(caller): CurrentUser) -> ApiResult {
    let user = user_repo::find_by_id(&state.db, &caller.user_id)?
        .ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
    Ok(ok(user))
}

pub async fn change_password(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult {
    let (Some(current), Some(new_password)) =
        (required(req.current_password), required(req.new_password))
    else {
        return Err(ApiError::bad_request(
            "Current password and new password are required",
        ));
    };

    match state
        .auth
        .change_password(&caller.user_id, &current, &new_password)
    {
        Ok(()) => {}
        Err(AuthError::InvalidCredentials) => {
            return Err(ApiError::bad_request("Current password is incorrect"))
        }
        Err(other) => return Err(other.into()),
    }
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "changed_password").entity("users", &caller.user_id),
        ),
        now_millis(),
    )?;

    Ok(message("Password changed successfully"))
}
