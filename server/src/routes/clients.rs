//! Client routes

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::Router;
use serde::Deserialize;

use pricematch::db::activity_repo::{self, NewActivity};
use pricematch::db::client_repo::{self, ClientRow, ClientUpdate};
use pricematch::db::{new_id, now_millis};

use super::{created, ok, ApiResult};
use crate::error::ApiError;
use crate::extract::{ApiJson, ClientInfo, CurrentUser};
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_clients).post(create_client))
        .route("/active", get(list_active_clients))
        .route(
            "/:id",
            put(update_client).patch(update_client).delete(delete_client),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub notes: Option<String>,
}

pub async fn list_clients(
    State(state): State<SharedState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult {
    Ok(ok(client_repo::list(&state.db, false)?))
}

pub async fn list_active_clients(
    State(state): State<SharedState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult {
    Ok(ok(client_repo::list(&state.db, true)?))
}

pub async fn create_client(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    ApiJson(req): ApiJson<CreateClientRequest>,
) -> ApiResult {
    let Some(name) = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
        return Err(ApiError::bad_request("Client name is required"));
    };

    let now = now_millis();
    let row = ClientRow {
        id: new_id(),
        name,
        email: req.email,
        phone: req.phone,
        address: req.address,
        contact_person: req.contact_person,
        notes: req.notes,
        is_active: true,
        created_by: caller.user_id.clone(),
        created_at: now,
        updated_at: now,
    };
    client_repo::insert(&state.db, &row)?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "created_client")
                .entity("clients", &row.id)
                .details(format!("Created client: {}", row.name)),
        ),
        now,
    )?;

    Ok(created(row))
}

pub async fn update_client(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<ClientUpdate>,
) -> ApiResult {
    if matches!(&changes.name, Some(name) if name.trim().is_empty()) {
        return Err(ApiError::bad_request("Client name cannot be empty"));
    }
    let now = now_millis();
    if !client_repo::update(&state.db, &id, &changes, now)? {
        return Err(ApiError::not_found("Client not found"));
    }
    activity_repo::insert(
        &state.db,
        &client.stamp(NewActivity::new(&caller.user_id, "updated_client").entity("clients", &id)),
        now,
    )?;

    let updated = client_repo::find_by_id(&state.db, &id)?
        .ok_or_else(|| ApiError::not_found("Client not found"))?;
    Ok(ok(updated))
}

/// Deactivates the client; its projects keep the reference.
pub async fn delete_client(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    Path(id): Path<String>,
) -> ApiResult {
    let now = now_millis();
    if !client_repo::deactivate(&state.db, &id, now)? {
        return Err(ApiError::not_found("Client not found"));
    }
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "deactivated_client").entity("clients", &id),
        ),
        now,
    )?;

    Ok(ok(serde_json::json!({ "id": id })))
}
