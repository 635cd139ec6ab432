use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::price_item_repo::PriceItemRow;
use crate::error::MatchError;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::spreadsheet::BoqLineItem;

use super::{MatchOutcome, MatchingMethod};

/// Client for the external matching service (embeddings and reranking).
pub struct RemoteMatcher {
    client: Client,
    endpoint: String,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchRequest<'a> {
    description: &'a str,
    method: MatchingMethod,
    context_headers: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchResponse {
    matched_item_id: String,
    confidence: f64,
}

impl RemoteMatcher {
    /// `base_url` is the service root; requests go to `{base_url}/match`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/match", base_url.trim_end_matches('/')),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn match_item(
        &self,
        item: &BoqLineItem,
        method: MatchingMethod,
        catalogue: &[PriceItemRow],
    ) -> Result<MatchOutcome, MatchError> {
        let request = MatchRequest {
            description: &item.description,
            method,
            context_headers: &item.context_headers,
            unit: item.unit.as_deref(),
        };

        let response = send_with_retry(&self.retry, "matching.match", || {
            self.client.post(&self.endpoint).json(&request)
        })
        .await
        .map_err(|e| MatchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MatchError::Service {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let body: MatchResponse = response
            .json()
            .await
            .map_err(|e| MatchError::Request(format!("invalid response: {}", e)))?;
        debug!(
            method = %method,
            item_id = %body.matched_item_id,
            confidence = body.confidence,
            "Matching service answered"
        );
        resolve(body, method, catalogue)
    }
}

fn resolve(
    body: MatchResponse,
    method: MatchingMethod,
    catalogue: &[PriceItemRow],
) -> Result<MatchOutcome, MatchError> {
    catalogue
        .iter()
        .find(|p| p.id == body.matched_item_id)
        .map(|p| MatchOutcome::from_item(p, body.confidence, method))
        .ok_or(MatchError::UnknownItem(body.matched_item_id))
}
