//! Handing a claimed job to whatever processes its next batch.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::retry::{send_with_retry, RetryPolicy};

use super::JobProcessor;

/// Result of one dispatch, as reported by the cron endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub job_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn accepted(job_id: &str, result: Option<Value>) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: true,
            result,
            error: None,
        }
    }

    pub fn rejected(job_id: &str, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Starts processing of one batch of a job.
///
/// Implementations report whether the dispatch was accepted; they do not
/// wait for the job to finish.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job_id: &str) -> DispatchResult;
}

/// Dispatches by POSTing `{jobId}` to the process-job endpoint.
///
/// A timed-out POST may still be running on the server, so timeouts are
/// never retried.
pub struct HttpDispatcher {
    client: Client,
    url: String,
    cron_secret: Option<SecretString>,
    retry: RetryPolicy,
}

impl HttpDispatcher {
    pub const TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(url: impl Into<String>, cron_secret: Option<SecretString>) -> Self {
        Self {
            client: Self::client(Self::TIMEOUT),
            url: url.into(),
            cron_secret,
            retry: RetryPolicy {
                retry_timeouts: false,
                ..RetryPolicy::default()
            },
        }
    }

    fn client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            retry_timeouts: false,
            ..retry
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = Self::client(timeout);
        self
    }

    fn request(&self, job_id: &str) -> RequestBuilder {
        let request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "jobId": job_id }));
        match &self.cron_secret {
            Some(secret) => request.bearer_auth(secret.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl JobDispatcher for HttpDispatcher {
    async fn dispatch(&self, job_id: &str) -> DispatchResult {
        let response =
            match send_with_retry(&self.retry, "jobs.dispatch", || self.request(job_id)).await {
                Ok(response) => response,
                Err(e) => {
                    error!(job_id, error = %e, "Failed to dispatch job");
                    return DispatchResult::rejected(job_id, e.to_string());
                }
            };

        let status = response.status();
        let body: Option<Value> = response.json().await.ok();
        if status.is_success() {
            debug!(job_id, %status, "Job dispatched");
            DispatchResult::accepted(job_id, body)
        } else {
            warn!(job_id, %status, "Process-job endpoint refused dispatch");
            DispatchResult {
                job_id: job_id.to_string(),
                success: false,
                result: body,
                error: Some(format!("process-job returned {}", status)),
            }
        }
    }
}

/// Runs the batch on a spawned task in this process.
pub struct InProcessDispatcher {
    processor: JobProcessor,
}

impl InProcessDispatcher {
    pub fn new(processor: JobProcessor) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl JobDispatcher for InProcessDispatcher {
    async fn dispatch(&self, job_id: &str) -> DispatchResult {
        let processor = self.processor.clone();
        let id = job_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = processor.process_next_batch(&id).await {
                warn!(job_id = %id, error = %e, "In-process batch failed");
            }
        });
        DispatchResult::accepted(job_id, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::{self, tests::pending_job};
    use crate::db::test_support::seed_user;
    use crate::db::Database;
    use crate::matching::{MethodRouter, PriceCatalogue};
    use std::sync::Arc;

    #[test]
    fn test_request_carries_job_and_bearer() {
        let dispatcher = HttpDispatcher::new(
            "http://localhost:3001/api/price-matching/process-job",
            Some(SecretString::from("cron-secret".to_string())),
        );
        let request = dispatcher.request("job-1").build().unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.headers()["authorization"].to_str().unwrap(),
            "Bearer cron-secret"
        );
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let json: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json, serde_json::json!({ "jobId": "job-1" }));
    }

    #[test]
    fn test_request_without_secret_has_no_auth() {
        let dispatcher = HttpDispatcher::new("http://localhost:3001/process", None);
        let request = dispatcher.request("job-1").build().unwrap();
        assert!(request.headers().get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_rejected() {
        let dispatcher = HttpDispatcher::new("http://127.0.0.1:1/process", None)
            .with_retry(RetryPolicy::immediate(0));
        let result = dispatcher.dispatch("job-1").await;
        assert!(!result.success);
        assert!(result.error.is_some());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert!(json.get("result").is_none());
    }

    #[tokio::test]
    async fn test_timed_out_dispatch_is_not_repeated() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let server = tokio::spawn(async move {
            let mut open = Vec::new();
            // accept and never answer
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                open.push(stream);
            }
        });

        let dispatcher = HttpDispatcher::new(format!("http://{}/process", addr), None)
            .with_timeout(Duration::from_millis(100))
            .with_retry(RetryPolicy::immediate(3));
        let result = dispatcher.dispatch("job-1").await;
        assert!(!result.success);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connections.load(Ordering::SeqCst), 1);
        server.abort();
    }

    #[tokio::test]
    async fn test_in_process_dispatch_runs_batch() {
        let db = Database::open_in_memory().unwrap();
        let user = seed_user(&db, "dispatch@example.com");
        let job = pending_job(&user, 0);
        job_repo::insert_with_batches(&db, &job, &[]).unwrap();

        let processor = JobProcessor::new(
            db.clone(),
            PriceCatalogue::new(db.clone()),
            Arc::new(MethodRouter::new(None)),
        );
        let result = InProcessDispatcher::new(processor).dispatch(&job.id).await;
        assert!(result.success);

        let mut status = String::new();
        for _ in 0..50 {
            status = job_repo::find_by_id(&db, &job.id).unwrap().unwrap().status;
            if status == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, "completed");
    }
}
