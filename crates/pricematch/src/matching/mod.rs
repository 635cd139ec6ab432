//! Matching BOQ line items against the price list.
//!
//! `LOCAL` runs in-process over the active catalogue. Every other method is
//! delegated to the external matching service.

mod catalogue;
mod local;
mod remote;

pub use catalogue::{PriceCatalogue, CATALOGUE_TTL};
pub use local::{normalize_unit, LocalMatcher, MIN_LOCAL_SCORE};
pub use remote::RemoteMatcher;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::price_item_repo::PriceItemRow;
use crate::error::{JobError, MatchError};
use crate::spreadsheet::BoqLineItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchingMethod {
    #[default]
    Local,
    Cohere,
    Openai,
    CohereRerank,
    Qwen,
    QwenRerank,
}

impl MatchingMethod {
    pub const ALL: [MatchingMethod; 6] = [
        MatchingMethod::Local,
        MatchingMethod::Cohere,
        MatchingMethod::Openai,
        MatchingMethod::CohereRerank,
        MatchingMethod::Qwen,
        MatchingMethod::QwenRerank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchingMethod::Local => "LOCAL",
            MatchingMethod::Cohere => "COHERE",
            MatchingMethod::Openai => "OPENAI",
            MatchingMethod::CohereRerank => "COHERE_RERANK",
            MatchingMethod::Qwen => "QWEN",
            MatchingMethod::QwenRerank => "QWEN_RERANK",
        }
    }

    pub fn is_remote(&self) -> bool {
        *self != MatchingMethod::Local
    }
}

impl fmt::Display for MatchingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchingMethod {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| JobError::UnknownMethod(s.to_string()))
    }
}

/// Best price item for one line item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub matched_item_id: String,
    pub matched_description: String,
    pub matched_code: Option<String>,
    pub matched_unit: Option<String>,
    pub matched_rate: f64,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub method: MatchingMethod,
}

impl MatchOutcome {
    pub fn from_item(item: &PriceItemRow, confidence: f64, method: MatchingMethod) -> Self {
        Self {
            matched_item_id: item.id.clone(),
            matched_description: item.description.clone(),
            matched_code: item.code.clone(),
            matched_unit: item.unit.clone(),
            matched_rate: item.rate,
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }

    pub fn total_price(&self, quantity: f64) -> f64 {
        line_total(self.matched_rate, quantity)
    }
}

/// `rate * quantity` rounded to cents.
pub fn line_total(rate: f64, quantity: f64) -> f64 {
    ((rate * quantity) * 100.0).round() / 100.0
}

#[async_trait]
pub trait PriceMatcher: Send + Sync {
    async fn match_item(
        &self,
        item: &BoqLineItem,
        method: MatchingMethod,
        catalogue: &[PriceItemRow],
    ) -> Result<MatchOutcome, MatchError>;
}

/// Routes `LOCAL` to the lexical matcher and everything else to the
/// matching service, when one is configured.
pub struct MethodRouter {
    local: LocalMatcher,
    remote: Option<RemoteMatcher>,
}

impl MethodRouter {
    pub fn new(remote: Option<RemoteMatcher>) -> Self {
        Self {
            local: LocalMatcher::default(),
            remote,
        }
    }
}

#[async_trait]
impl PriceMatcher for MethodRouter {
    async fn match_item(
        &self,
        item: &BoqLineItem,
        method: MatchingMethod,
        catalogue: &[PriceItemRow],
    ) -> Result<MatchOutcome, MatchError> {
        if catalogue.is_empty() {
            return Err(MatchError::EmptyCatalogue);
        }
        match (method, &self.remote) {
            (MatchingMethod::Local, _) => self.local.best_match(item, catalogue),
            (_, Some(remote)) => remote.match_item(item, method, catalogue).await,
            (_, None) => Err(MatchError::NotConfigured(method.to_string())),
        }
    }
}
