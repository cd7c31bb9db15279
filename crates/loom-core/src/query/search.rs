//! Structural file search backend.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::errors::LoomResult;
use crate::models::{EnrichedMatch, SearchResponse};
use crate::query::guards::{
    clamp_limit, split_terms, truncate_query, validate_query, HUB_INDEGREE, MAX_COCHANGE_PARTNERS,
    MAX_SEARCH_LIMIT,
};
use crate::query::scoring::score_files;
use crate::store::database::Database;

/// Rank the repository's files against a `|`-separated query and return the
/// hits grouped per term, in query order.
///
/// Co-change partners are only reported once a pair has changed together at
/// least `min_cochange_count` times.
pub fn search(
    db: &Database,
    repository_id: i64,
    query: &str,
    limit: i64,
    min_cochange_count: i64,
) -> LoomResult<SearchResponse> {
    let query = truncate_query(query);
    validate_query(&query)?;
    let terms = split_terms(&query);
    if terms.is_empty() {
        return Ok(SearchResponse::default());
    }
    let limit = clamp_limit(limit, MAX_SEARCH_LIMIT) as usize;

    let files = db.load_file_metadata(repository_id)?;
    let indegrees = db.import_indegrees(repository_id)?;
    let stats = db.load_file_stats(repository_id)?;
    let scored = score_files(&files, &terms, &indegrees, &stats, limit);

    let mut importers: HashMap<String, Vec<String>> = HashMap::new();
    if !scored.is_empty() {
        for edge in db.load_import_edges(repository_id)? {
            importers
                .entry(edge.target_path)
                .or_default()
                .push(edge.source_path);
        }
    }
    let max_indegree = indegrees.values().copied().max().unwrap_or(0);

    let mut matches = Vec::with_capacity(scored.len());
    for hit in scored {
        let file = &files[hit.file_index];
        let indegree = indegrees.get(&file.path).copied().unwrap_or(0);
        let mut file_importers = importers.remove(&file.path).unwrap_or_default();
        file_importers.sort();
        matches.push(EnrichedMatch {
            path: file.path.clone(),
            score: hit.score,
            language: file.language.clone(),
            matched_terms: hit.matched_terms,
            importers: file_importers,
            cochanges: db.cochange_partners(
                repository_id,
                &file.path,
                min_cochange_count,
                MAX_COCHANGE_PARTNERS,
            )?,
            is_hub: indegree >= HUB_INDEGREE,
            hub_score: if max_indegree > 0 {
                indegree as f64 / max_indegree as f64
            } else {
                0.0
            },
            exports: file.exports.clone(),
            docstring: file.docstring.clone(),
        });
    }

    let mut results: IndexMap<String, Vec<EnrichedMatch>> = IndexMap::new();
    for term in &terms {
        let group = matches
            .iter()
            .filter(|m| m.matched_terms.iter().any(|t| t == term))
            .cloned()
            .collect();
        results.insert(term.clone(), group);
    }
    tracing::debug!(
        repository_id,
        terms = terms.len(),
        hits = matches.len(),
        "search complete"
    );
    Ok(SearchResponse { terms, results })
}
