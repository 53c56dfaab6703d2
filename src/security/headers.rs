//! Upgrade request header allowlist.
//!
//! # Responsibilities
//! - Copy allowlisted upgrade headers onto the session
//! - Normalize names to lowercase
//!
//! # Design Decisions
//! - Nothing is copied unless configured (`false` is the default)
//! - Non-UTF-8 values are dropped rather than lossily decoded

use std::collections::HashMap;

use axum::http::HeaderMap;

use crate::config::HeaderAllowlist;

/// Headers from `headers` that pass `allowlist`.
pub fn filter_headers(headers: &HeaderMap, allowlist: &HeaderAllowlist) -> HashMap<String, String> {
    let allowed = |name: &str| match allowlist {
        HeaderAllowlist::Names(names) => names.iter().any(|n| n == name),
        HeaderAllowlist::Wildcard(w) => w == "*",
        HeaderAllowlist::Switch(_) => false,
    };

    let mut filtered = HashMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if !allowed(name) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            filtered.insert(name.to_string(), value.to_string());
        }
    }
    filtered
}
