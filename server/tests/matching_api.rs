mod common;

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};

use common::{boq_workbook, delete, get, json, upload, TestApp};
use pricematch::storage::XLSX_CONTENT_TYPE;

async fn seed_price_item(app: &TestApp, admin: &str) -> String {
    let (status, body) = app
        .call(json(
            "POST",
            "/api/price-list",
            Some(admin),
            json!({
                "code": "EX-001",
                "description": "Excavate topsoil",
                "category": "Groundworks",
                "unit": "m2",
                "rate": 4.5,
                "keywords": ["excavate", "topsoil"],
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn upload_boq(app: &TestApp, token: &str, rows: usize) -> Value {
    let (status, body) = app
        .call(upload(
            token,
            Some(("Tender BOQ.xlsx", boq_workbook(rows))),
            &[("matchingMethod", "LOCAL")],
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["data"].clone()
}

async fn process(app: &TestApp, job_id: &str) -> (StatusCode, Value) {
    app.call(json(
        "POST",
        "/api/price-matching/process-job",
        None,
        json!({ "jobId": job_id }),
    ))
    .await
}

#[tokio::test]
async fn test_upload_process_download() {
    let app = TestApp::new();
    let admin = app.admin_token();
    seed_price_item(&app, &admin).await;
    let (_, token) = app.approved_user("qs@example.com");

    let summary = upload_boq(&app, &token, 12).await;
    assert_eq!(summary["itemCount"], 12);
    assert_eq!(summary["fileName"], "Tender BOQ.xlsx");
    assert_eq!(
        summary["sheets"],
        json!([{ "name": "Groundworks", "itemCount": 12 }])
    );
    let job_id = summary["jobId"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(get(&format!("/api/price-matching/status/{}", job_id), Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["progress"], 0);

    let (status, body) = app
        .call(get(&format!("/api/price-matching/download/{}", job_id), Some(&token)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Job is not completed yet");

    let (status, body) = process(&app, &job_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({ "message": "Batch processed", "hasMore": true, "processedCount": 10 })
    );

    let (_, body) = app
        .call(get(&format!("/api/jobs/{}/status", job_id), Some(&token)))
        .await;
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["progress"], 83);

    let (_, body) = process(&app, &job_id).await;
    assert_eq!(
        body["data"],
        json!({ "message": "Job completed", "hasMore": false, "processedCount": 2 })
    );

    let (status, body) = process(&app, &job_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Job not found or not in processing state");

    let (_, body) = app
        .call(get(&format!("/api/price-matching/status/{}", job_id), Some(&token)))
        .await;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["progress"], 100);
    assert_eq!(body["data"]["matchedCount"], 12);

    let (_, body) = app
        .call(get(&format!("/api/price-matching/{}/results", job_id), Some(&token)))
        .await;
    let results = body["data"].as_array().unwrap();
    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|r| r["matchedCode"] == "EX-001"));

    let response = app
        .send(get(&format!("/api/price-matching/download/{}", job_id), Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], XLSX_CONTENT_TYPE);
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename=\"matched-Tender_BOQ.xlsx\""
    );
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    assert!(bytes.starts_with(b"PK"));

    let job = pricematch::db::job_repo::find_by_id(&app.state.db, &job_id)
        .unwrap()
        .unwrap();
    assert!(job.result_file_url.is_some());
}

#[tokio::test]
async fn test_jobs_are_private_to_their_owner() {
    let app = TestApp::new();
    let (_, owner) = app.approved_user("owner@example.com");
    let (_, other) = app.approved_user("other@example.com");
    let job_id = upload_boq(&app, &owner, 3).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    for uri in [
        format!("/api/price-matching/status/{}", job_id),
        format!("/api/price-matching/download/{}", job_id),
        format!("/api/jobs/{}/status", job_id),
    ] {
        let (status, body) = app.call(get(&uri, Some(&other))).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["error"], "Job not found");
    }

    let (_, body) = app.call(get("/api/price-matching/jobs", Some(&other))).await;
    assert_eq!(body["data"]["total"], 0);
    let (_, body) = app.call(get("/api/price-matching/jobs", Some(&owner))).await;
    assert_eq!(body["data"]["total"], 1);
}

/// Uploads `rows` items and processes the job to completion.
async fn completed_job(app: &TestApp, token: &str, rows: usize) -> String {
    let job_id = upload_boq(app, token, rows).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();
    loop {
        let (status, body) = process(app, &job_id).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        if body["data"]["hasMore"] == false {
            return job_id;
        }
    }
}

#[tokio::test]
async fn test_results_can_be_corrected_and_rematched() {
    let app = TestApp::new();
    let admin = app.admin_token();
    seed_price_item(&app, &admin).await;
    let (_, owner) = app.approved_user("owner@example.com");
    let (_, other) = app.approved_user("other@example.com");
    let job_id = completed_job(&app, &owner, 2).await;

    let (_, body) = app
        .call(get(&format!("/api/price-matching/{}/results", job_id), Some(&owner)))
        .await;
    let result_id = body["data"][0]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/price-matching/results/{}", result_id);
    let correction = json!({ "matchedRate": 5.0, "notes": "Agreed with supplier" });

    let (status, body) = app
        .call(json("PATCH", &uri, Some(&other), correction.clone()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Result not found");

    let (status, body) = app
        .call(json("PATCH", &uri, Some(&owner), correction))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["matchedRate"], 5.0);
    assert_eq!(body["data"]["totalPrice"], 50.0);
    assert_eq!(body["data"]["confidence"], 1.0);
    assert_eq!(body["data"]["method"], "MANUAL");
    assert_eq!(body["data"]["isManuallyEdited"], true);
    assert_eq!(body["data"]["matchedCode"], "EX-001");

    let (status, _) = app
        .call(json("PATCH", &uri, Some(&owner), json!({ "confidence": 2.0 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .call(json(
            "PATCH",
            "/api/price-matching/results/missing",
            Some(&owner),
            json!({ "notes": "x" }),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let rematch = Request::builder()
        .method("POST")
        .uri(format!("{}/rematch", uri))
        .header("authorization", format!("Bearer {}", owner))
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.call(rematch).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["id"], result_id.as_str());
    assert_eq!(body["data"]["matchedRate"], 4.5);
    assert_eq!(body["data"]["totalPrice"], 45.0);
    assert_eq!(body["data"]["method"], "LOCAL");
    assert_eq!(body["data"]["isManuallyEdited"], false);
    assert_eq!(body["data"]["notes"], "Agreed with supplier");

    let (status, body) = app
        .call(json(
            "POST",
            &format!("{}/rematch", uri),
            Some(&owner),
            json!({ "method": "COHERE" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("COHERE"));

    let (_, body) = app
        .call(get(&format!("/api/price-matching/status/{}", job_id), Some(&owner)))
        .await;
    assert_eq!(body["data"]["matchedCount"], 2);
}

#[tokio::test]
async fn test_owner_can_delete_job() {
    let app = TestApp::new();
    let (_, owner) = app.approved_user("owner@example.com");
    let (_, other) = app.approved_user("other@example.com");
    let job_id = completed_job(&app, &owner, 3).await;
    let (_, body) = app
        .call(get(&format!("/api/price-matching/{}/results", job_id), Some(&owner)))
        .await;
    let result_id = body["data"][0]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/price-matching/{}", job_id);

    let (status, body) = app.call(delete(&uri, Some(&other))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Job not found");

    let (status, body) = app.call(delete(&uri, Some(&owner))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Job deleted successfully");

    let (status, _) = app
        .call(get(&format!("/api/price-matching/status/{}", job_id), Some(&owner)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .call(json(
            "PATCH",
            &format!("/api/price-matching/results/{}", result_id),
            Some(&owner),
            json!({ "notes": "gone" }),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = app.call(get("/api/price-matching/jobs", Some(&owner))).await;
    assert_eq!(body["data"]["total"], 0);
    let (status, _) = app.call(delete(&uri, Some(&owner))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_validation() {
    let app = TestApp::new();
    let (_, token) = app.approved_user("upload@example.com");

    let (status, body) = app.call(upload(&token, None, &[("matchingMethod", "LOCAL")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file uploaded");

    let (status, _) = app
        .call(upload(&token, Some(("notes.txt", b"hello".to_vec())), &[]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .call(upload(&token, Some(("empty.xlsx", boq_workbook(0))), &[]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No valid data found in Excel file");

    let (status, _) = app
        .call(upload(
            &token,
            Some(("boq.xlsx", boq_workbook(1))),
            &[("matchingMethod", "TELEPATHY")],
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_workbooks_are_rejected() {
    let app = TestApp::new();
    let (_, token) = app.approved_user("malformed@example.com");

    let valid = boq_workbook(3);
    let truncated = valid[..valid.len() / 2].to_vec();
    for (name, bytes) in [
        ("truncated.xlsx", truncated),
        ("fake.xlsx", b"PK\x03\x04 not really a zip".to_vec()),
    ] {
        let (status, body) = app
            .call(upload(&token, Some((name, bytes)), &[("matchingMethod", "LOCAL")]))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", name);
        assert_eq!(body["error"], "No valid data found in Excel file");
    }

    let (_, body) = app.call(get("/api/price-matching/jobs", Some(&token))).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_concurrent_process_calls_store_results_once() {
    let app = TestApp::new();
    let admin = app.admin_token();
    seed_price_item(&app, &admin).await;
    let (_, token) = app.approved_user("parallel@example.com");
    let job_id = upload_boq(&app, &token, 10).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    let ((first, a), (second, b)) = tokio::join!(process(&app, &job_id), process(&app, &job_id));
    let completed = [&a, &b]
        .iter()
        .filter(|body| body["data"]["message"] == "Job completed")
        .count();
    assert_eq!(completed, 1, "{} {}", a, b);
    assert!(first == StatusCode::OK || second == StatusCode::OK);

    let (_, body) = app
        .call(get(&format!("/api/price-matching/{}/results", job_id), Some(&token)))
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 10);
    let (_, body) = app
        .call(get(&format!("/api/price-matching/status/{}", job_id), Some(&token)))
        .await;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["matchedCount"], 10);
}

#[tokio::test]
async fn test_huge_page_numbers_return_empty_pages() {
    let app = TestApp::new();
    let admin = app.admin_token();
    seed_price_item(&app, &admin).await;
    let (_, token) = app.approved_user("paging@example.com");
    upload_boq(&app, &token, 1).await;

    let (status, body) = app
        .call(get("/api/price-list?page=18446744073709551615&limit=500", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"], json!([]));

    let (status, body) = app
        .call(get("/api/price-matching/jobs?page=18446744073709551615", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["jobs"], json!([]));
}

#[tokio::test]
async fn test_process_job_validation() {
    let app = TestApp::new();

    let (status, body) = app
        .call(json("POST", "/api/price-matching/process-job", None, json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Job ID is required");

    let (status, body) = process(&app, "missing-job").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Job not found or not in processing state");
}

#[tokio::test]
async fn test_cron_requires_secret_when_configured() {
    let app = TestApp::with_config(|config| {
        config.cron_secret = Some("cron-secret".to_string());
    });

    let (status, body) = app.call(get("/api/cron/process-jobs", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = process(&app, "any").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(get("/api/cron/process-jobs", Some("cron-secret")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "No pending jobs" }));
}

#[tokio::test]
async fn test_cron_dispatches_pending_jobs() {
    let app = TestApp::new();
    let (_, token) = app.approved_user("cron@example.com");
    let job_id = upload_boq(&app, &token, 2).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/api/cron/process-jobs")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Processed 1 jobs");
    assert_eq!(body["results"][0]["jobId"], job_id.as_str());
    assert_eq!(body["results"][0]["success"], true);
}

#[tokio::test]
async fn test_price_list_crud() {
    let app = TestApp::new();
    let admin = app.admin_token();
    let (_, user) = app.approved_user("viewer@example.com");
    let id = seed_price_item(&app, &admin).await;

    let (status, _) = app
        .call(json(
            "POST",
            "/api/price-list",
            Some(&user),
            json!({ "description": "Not allowed", "rate": 1.0 }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app
        .call(get("/api/price-list?search=topsoil&limit=10", Some(&user)))
        .await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["code"], "EX-001");

    let uri = format!("/api/price-list/{}", id);
    let (status, _) = app
        .call(json("PUT", &uri, Some(&admin), json!({ "rate": 5.25 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.call(get(&uri, Some(&user))).await;
    assert_eq!(body["data"]["rate"], 5.25);
    assert_eq!(body["data"]["description"], "Excavate topsoil");

    let (status, _) = app
        .call(json("PUT", &uri, Some(&admin), json!({ "rate": -1.0 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .header("authorization", format!("Bearer {}", admin))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.call(request).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.call(get("/api/price-list", Some(&user))).await;
    assert_eq!(body["data"]["total"], 0);

    let (status, body) = app.call(get("/api/price-list/missing", Some(&user))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Price item not found");
}

#[tokio::test]
async fn test_projects_and_clients() {
    let app = TestApp::new();
    let (_, token) = app.approved_user("pm@example.com");

    let (status, body) = app
        .call(json(
            "POST",
            "/api/clients",
            Some(&token),
            json!({ "name": "Acme Developments", "email": "buyer@acme.test" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let client_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(json(
            "POST",
            "/api/projects",
            Some(&token),
            json!({ "name": "Riverside Phase 2", "clientId": client_id }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["clientName"], "Acme Developments");
    let project_id = body["data"]["id"].as_str().unwrap().to_string();

    let job_id = upload_boq(&app, &token, 1).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();
    let (status, _) = app
        .call(json(
            "POST",
            &format!("/api/projects/jobs/{}/link", job_id),
            Some(&token),
            json!({ "projectId": project_id }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .call(get(&format!("/api/projects/{}/jobs", project_id), Some(&token)))
        .await;
    assert_eq!(body["data"][0]["jobId"], job_id.as_str());

    let (_, body) = app.call(get("/api/projects", Some(&token))).await;
    assert_eq!(body["data"][0]["jobCount"], 1);

    let (status, _) = app
        .call(json(
            "PATCH",
            &format!("/api/clients/{}", client_id),
            Some(&token),
            json!({ "phone": "020 7946 0000" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/clients/{}", client_id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.call(request).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.call(get("/api/clients/active", Some(&token))).await;
    assert_eq!(body["data"], json!([]));
    let (_, body) = app.call(get("/api/clients", Some(&token))).await;
    assert_eq!(body["data"][0]["phone"], "020 7946 0000");
}

#[tokio::test]
async fn test_dashboard_stats() {
    let app = TestApp::new();
    let (_, token) = app.approved_user("dash@example.com");
    upload_boq(&app, &token, 2).await;

    let (status, body) = app.call(get("/api/dashboard/stats", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalProjects"], 1);
    assert_eq!(body["data"]["activeProjects"], 1);

    let (_, body) = app
        .call(get("/api/dashboard/recent-jobs", Some(&token)))
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
