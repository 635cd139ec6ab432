//! Price list routes: CRUD, CSV and workbook import, CSV export, statistics
//! and ranked search.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use pricematch::db::activity_repo::{self, NewActivity};
use pricematch::db::price_item_repo::{self, PriceItemFilter, PriceItemRow};
use pricematch::db::{new_id, now_millis};
use pricematch::price_list::{self, CSV_CONTENT_TYPE, MIN_SEARCH_LEN};

use super::{created, ok, page_offset, ApiResult};
use crate::error::ApiError;
use crate::extract::{AdminUser, ApiJson, ClientInfo, CurrentUser};
use crate::state::SharedState;

const DEFAULT_PAGE_SIZE: u64 = 50;
const MAX_PAGE_SIZE: u64 = 500;
const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_items).post(create_item))
        .route("/stats", get(stats))
        .route("/export", get(export))
        .route("/import", post(import))
        .route("/search", post(search))
        .route("/all", delete(delete_all))
        .route(
            "/:id",
            get(get_item).put(update_item).delete(delete_item),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PriceItemPage {
    pub items: Vec<PriceItemRow>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Fields accepted on create and update. Update applies only those present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceItemInput {
    pub code: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub unit: Option<String>,
    pub rate: Option<f64>,
    pub keywords: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl PriceItemInput {
    fn apply(self, item: &mut PriceItemRow) {
        if let Some(code) = self.code {
            item.code = Some(code);
        }
        if let Some(description) = self.description {
            item.description = description;
        }
        if let Some(category) = self.category {
            item.category = Some(category);
        }
        if let Some(subcategory) = self.subcategory {
            item.subcategory = Some(subcategory);
        }
        if let Some(unit) = self.unit {
            item.unit = Some(unit);
        }
        if let Some(rate) = self.rate {
            item.rate = rate;
        }
        if let Some(keywords) = self.keywords {
            item.keywords = keywords;
        }
        if let Some(is_active) = self.is_active {
            item.is_active = is_active;
        }
    }
}

fn validate(item: &PriceItemRow) -> Result<(), ApiError> {
    if item.description.trim().is_empty() {
        return Err(ApiError::bad_request("Description is required"));
    }
    if !item.rate.is_finite() || item.rate < 0.0 {
        return Err(ApiError::bad_request("Rate must be a non-negative number"));
    }
    Ok(())
}

pub async fn list_items(
    State(state): State<SharedState>,
    CurrentUser(_): CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let filter = PriceItemFilter {
        search: query.search.filter(|s| !s.trim().is_empty()),
        category: query.category.filter(|c| !c.trim().is_empty()),
        include_inactive: false,
        limit: Some(limit),
        offset: Some(page_offset(page, limit)),
    };
    let (items, total) = price_item_repo::query(&state.db, &filter)?;
    Ok(ok(PriceItemPage {
        items,
        total,
        page,
        limit,
    }))
}

pub async fn create_item(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    client: ClientInfo,
    ApiJson(input): ApiJson<PriceItemInput>,
) -> ApiResult {
    let now = now_millis();
    let mut item = PriceItemRow {
        id: new_id(),
        code: None,
        description: String::new(),
        category: None,
        subcategory: None,
        unit: None,
        rate: 0.0,
        keywords: Vec::new(),
        embedding: None,
        embedding_provider: None,
        is_active: true,
        created_by: Some(admin.user_id.clone()),
        created_at: now,
        updated_at: now,
    };
    input.apply(&mut item);
    validate(&item)?;

    price_item_repo::insert(&state.db, &item)?;
    state.catalogue.invalidate();
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&admin.user_id, "create_price_item")
                .entity("priceItems", &item.id)
                .details(format!("Created price item: {}", item.description)),
        ),
        now,
    )?;

    Ok(created(serde_json::json!({ "id": item.id })))
}

pub async fn get_item(
    State(state): State<SharedState>,
    CurrentUser(_): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let item = price_item_repo::find_by_id(&state.db, &id)?
        .ok_or_else(|| ApiError::not_found("Price item not found"))?;
    Ok(ok(item))
}

pub async fn update_item(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    client: ClientInfo,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<PriceItemInput>,
) -> ApiResult {
    let mut item = price_item_repo::find_by_id(&state.db, &id)?
        .ok_or_else(|| ApiError::not_found("Price item not found"))?;
    input.apply(&mut item);
    validate(&item)?;
    item.updated_at = now_millis();

    price_item_repo::update(&state.db, &item)?;
    state.catalogue.invalidate();
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&admin.user_id, "update_price_item")
                .entity("priceItems", &id)
                .details(format!("Updated price item: {}", id)),
        ),
        item.updated_at,
    )?;

    Ok(ok(serde_json::json!({ "id": id })))
}

/// Deactivates the item; match results keep referring to it.
pub async fn delete_item(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    client: ClientInfo,
    Path(id): Path<String>,
) -> ApiResult {
    let now = now_millis();
    if !price_item_repo::deactivate(&state.db, &id, now)? {
        return Err(ApiError::not_found("Price item not found"));
    }
    state.catalogue.invalidate();
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&admin.user_id, "delete_price_item")
                .entity("priceItems", &id)
                .details(format!("Deleted price item: {}", id)),
        ),
        now,
    )?;

    Ok(ok(serde_json::json!({ "id": id })))
}

pub async fn stats(State(state): State<SharedState>, CurrentUser(_): CurrentUser) -> ApiResult {
    let items = price_item_repo::list_active(&state.db)?;
    Ok(ok(price_list::stats(&items)))
}

pub async fn export(State(state): State<SharedState>, CurrentUser(_): CurrentUser) -> ApiResult {
    let items = price_item_repo::list_active(&state.db)?;
    let body = price_list::export_csv(&items)
        .map_err(|e| ApiError::internal("Failed to export price list", e))?;
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(CSV_CONTENT_TYPE)),
            (
                CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=\"price_list.csv\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// Replaces or adds price items from an uploaded CSV or `.xlsx` file.
pub async fn import(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    client: ClientInfo,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult {
    let mut multipart = multipart.map_err(|_| ApiError::bad_request("No file uploaded"))?;
    let bad_form =
        |e: MultipartError| ApiError::bad_request(format!("Invalid upload: {}", e.body_text()));

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(bad_form)?;
        upload = Some((file_name, bytes));
    }
    let Some((file_name, bytes)) = upload.filter(|(_, bytes)| !bytes.is_empty()) else {
        return Err(ApiError::bad_request("No file uploaded"));
    };

    let now = now_millis();
    let parsed = price_list::parse_import(&file_name, &bytes)?;
    let summary = price_list::import_items(&state.db, parsed, &admin.user_id, now)?;
    state.catalogue.invalidate();
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&admin.user_id, "imported_price_list")
                .entity("priceItems", "bulk")
                .details(format!(
                    "Imported {}: {} created, {} updated, {} skipped",
                    file_name, summary.created, summary.updated, summary.skipped
                )),
        ),
        now,
    )?;

    Ok(ok(summary))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub limit: Option<usize>,
}

pub async fn search(
    State(state): State<SharedState>,
    CurrentUser(_): CurrentUser,
    ApiJson(req): ApiJson<SearchRequest>,
) -> ApiResult {
    let query = req.query.unwrap_or_default();
    if query.trim().chars().count() < MIN_SEARCH_LEN {
        return Err(ApiError::bad_request(
            "Search query must be at least 2 characters",
        ));
    }
    let limit = req
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);
    let items = state.catalogue.active_items()?;
    let hits: Vec<&PriceItemRow> = price_list::search(&items, &query, limit);
    Ok(ok(hits))
}

/// Deactivates every price item.
pub async fn delete_all(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    client: ClientInfo,
) -> ApiResult {
    let now = now_millis();
    let deleted = price_item_repo::deactivate_all(&state.db, now)?;
    state.catalogue.invalidate();
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&admin.user_id, "deleted_all_price_items")
                .entity("priceItems", "all")
                .details(format!("Deleted {} price items", deleted)),
        ),
        now,
    )?;

    Ok(ok(serde_json::json!({
        "message": format!("Deleted {} price items", deleted),
        "deletedCount": deleted,
    })))
}
