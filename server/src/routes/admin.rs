//! Admin-only routes: settings, user approval and system statistics.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use pricematch::auth::{ROLE_ADMIN, ROLE_USER};
use pricematch::db::activity_repo::{self, NewActivity};
use pricematch::db::{now_millis, stats_repo, user_repo};

use super::{message, ok, ApiResult};
use crate::error::ApiError;
use crate::extract::{AdminUser, ApiJson, ClientInfo};
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/settings", get(list_settings).post(update_setting))
        .route("/settings/api-keys", get(list_api_keys))
        .route("/users", get(list_users))
        .route("/users/:userId/approve", post(approve_user))
        .route("/users/:userId/role", post(set_user_role))
        .route("/system/stats", get(system_stats))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub key: Option<String>,
    pub value: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Option<String>,
}

pub async fn list_settings(State(state): State<SharedState>, _admin: AdminUser) -> ApiResult {
    Ok(ok(state.settings.list_public()?))
}

pub async fn list_api_keys(State(state): State<SharedState>, _admin: AdminUser) -> ApiResult {
    Ok(ok(state.settings.list_api_keys_masked()?))
}

pub async fn update_setting(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    client: ClientInfo,
    ApiJson(req): ApiJson<UpdateSettingRequest>,
) -> ApiResult {
    let (Some(key), Some(value)) = (req.key.filter(|k| !k.trim().is_empty()), req.value) else {
        return Err(ApiError::bad_request("Key and value are required"));
    };

    let row = state
        .settings
        .set(key.trim(), &value, req.description.as_deref(), &admin.user_id)?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&admin.user_id, "updated_setting")
                .entity("applicationSettings", &row.key)
                .details(format!("Updated setting: {}", row.key)),
        ),
        row.updated_at,
    )?;

    Ok(ok(serde_json::json!({
        "message": "Setting updated successfully",
        "setting": row,
    })))
}

pub async fn list_users(State(state): State<SharedState>, _admin: AdminUser) -> ApiResult {
    Ok(ok(user_repo::list_all(&state.db)?))
}

pub async fn approve_user(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    client: ClientInfo,
    Path(user_id): Path<String>,
) -> ApiResult {
    if !user_repo::approve(&state.db, &user_id)? {
        return Err(ApiError::not_found("User not found"));
    }
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&admin.user_id, "approved_user")
                .entity("users", &user_id)
                .details("Approved user account"),
        ),
        now_millis(),
    )?;

    Ok(message("User approved successfully"))
}

pub async fn set_user_role(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    client: ClientInfo,
    Path(user_id): Path<String>,
    ApiJson(req): ApiJson<SetRoleRequest>,
) -> ApiResult {
    let role = match req.role.as_deref() {
        Some(role @ (ROLE_USER | ROLE_ADMIN)) => role.to_string(),
        _ => return Err(ApiError::bad_request("Invalid role")),
    };
    if !user_repo::set_role(&state.db, &user_id, &role)? {
        return Err(ApiError::not_found("User not found"));
    }
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&admin.user_id, "changed_user_role")
                .entity("users", &user_id)
                .details(format!("Changed user role to {}", role)),
        ),
        now_millis(),
    )?;

    Ok(message("User role updated successfully"))
}

pub async fn system_stats(State(state): State<SharedState>, _admin: AdminUser) -> ApiResult {
    Ok(ok(stats_repo::system_stats(&state.db)?))
}
