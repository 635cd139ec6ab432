//! Helpers for sanitizing data before it reaches storage keys or logs.
//!
//! Object keys must be stable and safe across every storage backend, and
//! log lines must never carry signed URLs or bearer tokens.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Replaces every character outside `[A-Za-z0-9.-]` with `_`.
///
/// - `Tender BOQ (rev 2).xlsx` → `Tender_BOQ__rev_2_.xlsx`
/// - `boq.xlsx` → `boq.xlsx` (no change)
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Strips userinfo and query strings from a URL.
///
/// - `https://bucket.s3.amazonaws.com/key?X-Amz-Signature=abc` → `https://bucket.s3.amazonaws.com/key`
/// - `https://user:pw@host/path` → `https://****@host/path`
pub fn redact_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].find('@') {
            let scheme = &without_query[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    without_query.to_string()
}

/// Returns a short deterministic fingerprint of a token so rejected
/// credentials can be correlated in logs without exposing them.
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
