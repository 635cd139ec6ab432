#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use pricematch::db::user_repo;
use pricematch::spreadsheet::{write_workbook, Cell, Sheet, Workbook};
use pricematch::storage::FilesystemStore;
use pricematch::{Database, ServerConfig};
use pricematch_server::{router, AppState, SharedState};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const PASSWORD: &str = "correct-horse-battery";

pub struct TestApp {
    pub state: SharedState,
    pub router: Router,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig {
            jwt_secret: Some("integration-test-signing-secret".to_string()),
            ..ServerConfig::default()
        };
        configure(&mut config);

        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(FilesystemStore::new(dir.path().join("objects")));
        let state = Arc::new(AppState::new(db, store, &config).unwrap());
        Self {
            router: router(state.clone()),
            state,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Sends `request` and decodes the JSON body.
    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.send(request).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    /// Access token for the bootstrap administrator.
    pub fn admin_token(&self) -> String {
        self.state.auth.ensure_admin(ADMIN_EMAIL, PASSWORD).unwrap();
        let admin = user_repo::find_by_email(&self.state.db, ADMIN_EMAIL)
            .unwrap()
            .unwrap();
        self.state
            .auth
            .tokens()
            .issue_access(&admin.id, &admin.email, &admin.role)
            .unwrap()
    }

    /// Registers and approves a user, returning `(user_id, access_token)`.
    pub fn approved_user(&self, email: &str) -> (String, String) {
        let user = self.state.auth.register(email, PASSWORD, "Quantity Surveyor").unwrap();
        user_repo::approve(&self.state.db, &user.id).unwrap();
        let token = self
            .state
            .auth
            .tokens()
            .issue_access(&user.id, &user.email, &user.role)
            .unwrap();
        (user.id, token)
    }
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

const BOUNDARY: &str = "pricematch-test-boundary";

pub fn delete(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("DELETE").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// BOQ upload with an optional `file` part and plain text fields.
pub fn upload(token: &str, file: Option<(&str, Vec<u8>)>, fields: &[(&str, &str)]) -> Request<Body> {
    multipart("/api/price-matching/upload", token, file, fields)
}

/// Multipart POST to `uri` with an optional `file` part and plain text fields.
pub fn multipart(
    uri: &str,
    token: &str,
    file: Option<(&str, Vec<u8>)>,
    fields: &[(&str, &str)],
) -> Request<Body> {
    let mut body = Vec::new();
    if let Some((file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&bytes);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// A one-sheet BOQ with a header row and `rows` line items.
pub fn boq_workbook(rows: usize) -> Vec<u8> {
    let mut sheet = Sheet::new("Groundworks");
    sheet.push_row(vec![
        Cell::text("Description"),
        Cell::text("Qty"),
        Cell::text("Unit"),
    ]);
    for i in 0..rows {
        sheet.push_row(vec![
            Cell::text(format!("Excavate topsoil area {}", i + 1)),
            Cell::Number(10.0 + i as f64),
            Cell::text("m2"),
        ]);
    }
    write_workbook(&Workbook {
        sheets: vec![sheet],
    })
    .unwrap()
}
