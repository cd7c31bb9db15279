//! Structural multi-term scoring over per-file metadata.
//!
//! Pure functions: the caller loads metadata, import indegrees and git stats;
//! nothing here touches the store, the filesystem or git.

use std::collections::HashMap;

use crate::models::{FileMetadata, FileStat};

pub const WEIGHT_FILENAME: f64 = 10.0;
pub const WEIGHT_EXPORT: f64 = 8.0;
pub const WEIGHT_INTERNAL: f64 = 5.0;
pub const WEIGHT_DIRECTORY: f64 = 3.0;
pub const WEIGHT_DOCSTRING: f64 = 3.0;
pub const WEIGHT_SECTION: f64 = 3.0;

pub const MAX_IDF: f64 = 10.0;
pub const MAX_HOTNESS_BOOST: f64 = 2.0;
/// Recent commits at which the hotness boost saturates.
pub const HOTNESS_SATURATION: i64 = 10;
pub const CENTRALITY_MIN_INDEGREE: i64 = 3;
pub const CENTRALITY_FACTOR: f64 = 0.15;
pub const EXPORT_DAMPENING_THRESHOLD: usize = 20;
pub const EXPORT_DAMPENING_FACTOR: f64 = 0.5;

/// Which metadata field a term matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    FileName,
    Export,
    Internal,
    Directory,
    Docstring,
    Section,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::FileName,
        Field::Export,
        Field::Internal,
        Field::Directory,
        Field::Docstring,
        Field::Section,
    ];

    pub fn weight(self) -> f64 {
        match self {
            Field::FileName => WEIGHT_FILENAME,
            Field::Export => WEIGHT_EXPORT,
            Field::Internal => WEIGHT_INTERNAL,
            Field::Directory => WEIGHT_DIRECTORY,
            Field::Docstring => WEIGHT_DOCSTRING,
            Field::Section => WEIGHT_SECTION,
        }
    }
}

// ---------------------------------------------------------------------------
// Term normalization and matching
// ---------------------------------------------------------------------------

/// Lowercase with separators and whitespace removed.
fn compact(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A query term prepared for matching.
#[derive(Clone, Debug)]
pub struct PreparedTerm {
    pub raw: String,
    /// Lowercase, whitespace-collapsed.
    phrase: String,
    /// Lowercase alphanumerics only.
    compact: String,
}

impl PreparedTerm {
    pub fn new(raw: &str) -> Self {
        PreparedTerm {
            raw: raw.to_string(),
            phrase: raw
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
            compact: compact(raw),
        }
    }

    /// Identifier match: the term appears in the identifier once both are
    /// lowercased and stripped of separators, so `session store` matches
    /// `createSessionStore` and `json value` matches `parse_json_value`.
    fn matches_identifier(&self, ident: &str) -> bool {
        !self.compact.is_empty() && compact(ident).contains(&self.compact)
    }

    /// Free-text match: the phrase appears anywhere, case-insensitively.
    fn matches_text(&self, text: &str) -> bool {
        !self.phrase.is_empty() && text.to_lowercase().contains(&self.phrase)
    }

    /// Fields of `file` this term matches.
    pub fn matched_fields(&self, file: &FileMetadata) -> Vec<Field> {
        let (dir, name) = match file.path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", file.path.as_str()),
        };
        let stem = name.split('.').next().unwrap_or(name);

        Field::ALL
            .into_iter()
            .filter(|field| match field {
                Field::FileName => self.matches_text(name) || self.matches_identifier(stem),
                Field::Export => file.exports.iter().any(|e| self.matches_identifier(e)),
                Field::Internal => file.internals.iter().any(|i| self.matches_identifier(i)),
                Field::Directory => {
                    self.matches_text(dir)
                        || dir
                            .split('/')
                            .filter(|s| !s.is_empty())
                            .any(|segment| self.matches_identifier(segment))
                }
                Field::Docstring => file
                    .docstring
                    .as_deref()
                    .is_some_and(|doc| self.matches_text(doc)),
                Field::Section => file.sections.iter().any(|s| self.matches_text(s)),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// `clamp(1 + ln(N / df), 1, MAX_IDF)`; unseen terms get `MAX_IDF`.
pub fn idf(total_files: usize, document_frequency: usize) -> f64 {
    if document_frequency == 0 || total_files == 0 {
        return MAX_IDF;
    }
    (1.0 + (total_files as f64 / document_frequency as f64).ln()).clamp(1.0, MAX_IDF)
}

pub fn hotness_boost(recent_commits: i64) -> f64 {
    let saturated = recent_commits.clamp(0, HOTNESS_SATURATION) as f64;
    MAX_HOTNESS_BOOST * saturated / HOTNESS_SATURATION as f64
}

pub fn centrality_multiplier(indegree: i64) -> f64 {
    if indegree >= CENTRALITY_MIN_INDEGREE {
        1.0 + CENTRALITY_FACTOR * (indegree as f64).log2()
    } else {
        1.0
    }
}

pub fn export_dampening(export_count: usize) -> f64 {
    if export_count > EXPORT_DAMPENING_THRESHOLD {
        1.0 + EXPORT_DAMPENING_FACTOR
            * (export_count as f64 / EXPORT_DAMPENING_THRESHOLD as f64).log2()
    } else {
        1.0
    }
}

pub fn coverage_multiplier(matched_terms: usize, total_terms: usize) -> f64 {
    if total_terms <= 1 {
        return 1.0;
    }
    let coverage = matched_terms as f64 / total_terms as f64;
    1.0 + coverage * coverage
}

/// One scored file, referencing its metadata by index.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredFile {
    pub file_index: usize,
    pub score: f64,
    /// Raw query terms this file matched, in query order.
    pub matched_terms: Vec<String>,
}

/// Score every file against `terms` and return the top `limit`, sorted by
/// score descending then path ascending. Zero-score files are dropped.
pub fn score_files(
    files: &[FileMetadata],
    terms: &[String],
    indegrees: &HashMap<String, i64>,
    stats: &HashMap<String, FileStat>,
    limit: usize,
) -> Vec<ScoredFile> {
    if files.is_empty() || terms.is_empty() {
        return Vec::new();
    }
    let prepared: Vec<PreparedTerm> = terms.iter().map(|t| PreparedTerm::new(t)).collect();

    // matches[file][term] = fields matched
    let matches: Vec<Vec<Vec<Field>>> = files
        .iter()
        .map(|file| prepared.iter().map(|t| t.matched_fields(file)).collect())
        .collect();

    let idfs: Vec<f64> = (0..prepared.len())
        .map(|t| {
            let df = matches.iter().filter(|per_term| !per_term[t].is_empty()).count();
            idf(files.len(), df)
        })
        .collect();

    let mut scored: Vec<ScoredFile> = Vec::new();
    for (file_index, per_term) in matches.iter().enumerate() {
        let mut score = 0.0;
        let mut matched_terms = Vec::new();
        for (t, fields) in per_term.iter().enumerate() {
            if fields.is_empty() {
                continue;
            }
            matched_terms.push(prepared[t].raw.clone());
            score += fields.iter().map(|f| f.weight() * idfs[t]).sum::<f64>();
        }
        if score <= 0.0 {
            continue;
        }

        let file = &files[file_index];
        let recent = stats.get(&file.path).map(|s| s.recent_commits).unwrap_or(0);
        let indegree = indegrees.get(&file.path).copied().unwrap_or(0);
        score += hotness_boost(recent);
        score *= centrality_multiplier(indegree);
        score /= export_dampening(file.exports.len());
        score *= coverage_multiplier(matched_terms.len(), prepared.len());

        scored.push(ScoredFile {
            file_index,
            score,
            matched_terms,
        });
    }

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| files[a.file_index].path.cmp(&files[b.file_index].path))
    });
    scored.truncate(limit);
    scored
}
