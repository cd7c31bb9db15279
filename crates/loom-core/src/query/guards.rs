//! Shared guardrails for query payload bounds.

use crate::errors::{LoomError, LoomResult};

pub const MAX_QUERY_LENGTH: usize = 512;
pub const MAX_SEARCH_LIMIT: i64 = 100;
pub const MAX_QUERY_TERMS: usize = 16;
pub const MAX_COCHANGE_PARTNERS: usize = 5;
/// Indegree at which a file counts as a hub.
pub const HUB_INDEGREE: i64 = 5;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_limit(value: i64, maximum: i64) -> i64 {
    clamp_int(value, 1, maximum)
}

/// Trim and cap a query at [`MAX_QUERY_LENGTH`] bytes on a char boundary.
pub fn truncate_query(query: &str) -> String {
    let stripped = query.trim();
    if stripped.len() <= MAX_QUERY_LENGTH {
        return stripped.to_string();
    }
    let mut end = MAX_QUERY_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    stripped[..end].to_string()
}

/// Reject queries carrying control characters.
pub fn validate_query(query: &str) -> LoomResult<()> {
    if let Some(c) = query.chars().find(|c| c.is_control()) {
        return Err(LoomError::InvalidInput(format!(
            "query contains control character U+{:04X}",
            c as u32
        )));
    }
    Ok(())
}

/// Split a `|`-separated query into trimmed, deduplicated terms in order.
pub fn split_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in query.split('|') {
        let term = raw.trim();
        if term.is_empty() || terms.iter().any(|t| t == term) {
            continue;
        }
        terms.push(term.to_string());
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }
    terms
}
