//! Lexical matcher used for the `LOCAL` method.
//!
//! Score per candidate, out of 1.0:
//! - 0.60 description token overlap (Dice coefficient)
//! - 0.15 item keywords found in the line item
//! - 0.15 unit agreement (0.10 for compatible units)
//! - 0.10 context header agreeing with the item's category

use std::collections::HashSet;

use crate::db::price_item_repo::PriceItemRow;
use crate::error::MatchError;
use crate::spreadsheet::BoqLineItem;

use super::{MatchOutcome, MatchingMethod};

/// Candidates scoring at or below this are not considered a match.
pub const MIN_LOCAL_SCORE: f64 = 0.3;

const STOP_WORDS: [&str; 16] = [
    "and", "the", "to", "of", "in", "with", "for", "on", "or", "a", "an", "as", "at", "by", "be",
    "all",
];

/// Unit spellings grouped by what they measure, canonical form first.
const UNIT_GROUPS: [&[&str]; 7] = [
    &["m", "lm", "lin.m", "metre", "meter", "m1"],
    &["m2", "sqm", "sq.m", "m²"],
    &["m3", "cum", "cu.m", "m³"],
    &["nr", "no", "no.", "each", "ea", "item"],
    &["kg", "kgs"],
    &["t", "tonne", "ton", "tonnes"],
    &["sum", "ls", "l.s.", "lump sum"],
];

/// Maps a unit to its canonical spelling, or the trimmed lowercase input
/// when it is not a known unit.
pub fn normalize_unit(unit: &str) -> String {
    let lowered = unit.trim().to_lowercase();
    UNIT_GROUPS
        .iter()
        .find(|group| group.contains(&lowered.as_str()))
        .map(|group| group[0].to_string())
        .unwrap_or(lowered)
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2 && !STOP_WORDS.contains(t))
        .map(String::from)
        .collect()
}

fn dice(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    2.0 * shared / (a.len() + b.len()) as f64
}

#[derive(Debug, Default)]
pub struct LocalMatcher;

impl LocalMatcher {
    pub fn score(&self, item: &BoqLineItem, candidate: &PriceItemRow) -> f64 {
        let query = tokens(&item.description);
        let description = tokens(&candidate.description);
        let mut score = 0.60 * dice(&query, &description);

        if !candidate.keywords.is_empty() {
            let found = candidate
                .keywords
                .iter()
                .filter(|k| query.contains(&k.to_lowercase()))
                .count();
            score += 0.15 * found as f64 / candidate.keywords.len() as f64;
        }

        if let (Some(wanted), Some(offered)) = (&item.unit, &candidate.unit) {
            let wanted = normalize_unit(wanted);
            let offered = normalize_unit(offered);
            if wanted == offered {
                score += 0.15;
            } else if wanted.trim_end_matches(char::is_numeric)
                == offered.trim_end_matches(char::is_numeric)
            {
                score += 0.10;
            }
        }

        if let Some(category) = &candidate.category {
            let category = tokens(category);
            let in_context = item
                .context_headers
                .iter()
                .any(|header| !tokens(header).is_disjoint(&category));
            if in_context {
                score += 0.10;
            }
        }

        score.min(1.0)
    }

    pub fn best_match(
        &self,
        item: &BoqLineItem,
        catalogue: &[PriceItemRow],
    ) -> Result<MatchOutcome, MatchError> {
        let best = catalogue
            .iter()
            .map(|candidate| (candidate, self.score(item, candidate)))
            .filter(|(_, score)| *score > MIN_LOCAL_SCORE)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((candidate, score)) => Ok(MatchOutcome::from_item(
                candidate,
                score,
                MatchingMethod::Local,
            )),
            None => Err(MatchError::NoMatch(MatchingMethod::Local.to_string())),
        }
    }
}
