//! Line-based, boundary-aware chunking with content-addressed identity.
//!
//! Chunks overlap by `overlap_lines` to give retrieval some context. Each
//! chunk's hash covers both its text and the chunking parameters, so bumping
//! `version` (or changing any parameter) re-chunks every file.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:export\s+(?:default\s+)?)?(?:pub(?:\([^)]*\))?\s+)?(?:public\s+|private\s+|protected\s+)?(?:static\s+)?(?:async\s+)?(?:def|fn|func|function|class|struct|enum|trait|impl|interface|type|mod|module)\b",
    )
    .expect("declaration pattern is valid")
});

/// Chunking parameters. Part of every chunk's identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkParams {
    pub target_lines: usize,
    pub overlap_lines: usize,
    /// Lines searched on either side of the target cut for a boundary.
    pub boundary_window: usize,
    pub version: u32,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            target_lines: 60,
            overlap_lines: 8,
            boundary_window: 8,
            version: 1,
        }
    }
}

/// One chunk produced from a file. Lines are 1-based and inclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub content_hash: String,
}

/// Hash chunk text together with the parameters that produced it.
pub fn chunk_hash(content: &str, params: &ChunkParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "v{}:{}:{}\n",
            params.version, params.target_lines, params.overlap_lines
        )
        .as_bytes(),
    );
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_declaration(line: &str) -> bool {
    DECLARATION_RE.is_match(line)
}

/// Pick the exclusive end (0-based) of the chunk starting at `start`.
///
/// `min_cut` guarantees forward progress once overlap is subtracted.
fn find_cut(lines: &[&str], start: usize, params: &ChunkParams) -> usize {
    let total = lines.len();
    let target = start + params.target_lines;
    let min_cut = start + params.overlap_lines + 1;
    let lo = target.saturating_sub(params.boundary_window).max(min_cut);
    let hi = (target + params.boundary_window).min(total - 1);
    if lo > hi {
        return target.max(min_cut).min(total);
    }

    // Candidates ordered by distance from the target, earlier cut first on ties.
    let mut candidates: Vec<usize> = (lo..=hi).collect();
    candidates.sort_by_key(|&c| (c.abs_diff(target), c));

    // A blank line closes the chunk: cut right after it.
    for &cut in &candidates {
        if lines[cut - 1].trim().is_empty() {
            return cut;
        }
    }
    // A declaration opens the next chunk: cut right before it.
    for &cut in &candidates {
        if is_declaration(lines[cut]) {
            return cut;
        }
    }
    target.max(min_cut).min(total)
}

/// Split `content` into ordered, overlapping chunks.
pub fn chunk_content(content: &str, params: &ChunkParams) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    if total == 0 {
        return Vec::new();
    }
    let target = params.target_lines.max(1);
    let params = ChunkParams {
        target_lines: target,
        overlap_lines: params.overlap_lines.min(target - 1),
        ..params.clone()
    };

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut start = 0usize;
    loop {
        if total - start <= target {
            ranges.push((start, total));
            break;
        }
        let cut = find_cut(&lines, start, &params);
        ranges.push((start, cut));
        if cut >= total {
            break;
        }
        let next = cut.saturating_sub(params.overlap_lines);
        start = if next > start { next } else { start + 1 };
    }

    ranges
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (begin, end))| {
            let text = lines[begin..end].join("\n");
            Chunk {
                chunk_index,
                start_line: begin + 1,
                end_line: end,
                content_hash: chunk_hash(&text, &params),
                content: text,
            }
        })
        .collect()
}

/// Rebuild file text from chunks, dropping the overlapped lines.
///
/// Accepts `(chunk_index, start_line, end_line, content)` in any order.
pub fn reassemble<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = (i64, i64, i64, &'a str)>,
{
    let mut sorted: Vec<(i64, i64, i64, &str)> = chunks.into_iter().collect();
    sorted.sort_by_key(|c| c.0);

    let mut out: Vec<&str> = Vec::new();
    let mut last_line = 0i64;
    for (_, start_line, _, content) in sorted {
        for (offset, line) in content.split('\n').enumerate() {
            let line_no = start_line + offset as i64;
            if line_no > last_line {
                out.push(line);
                last_line = line_no;
            }
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(target: usize, overlap: usize) -> ChunkParams {
        ChunkParams {
            target_lines: target,
            overlap_lines: overlap,
            boundary_window: 3,
            version: 1,
        }
    }

    fn numbered(n: usize) -> String {
        (1..=n)
            .map(|i| format!("let value_{i} = {i};"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_empty_content_has_no_chunks() {
        assert!(chunk_content("", &params(10, 2)).is_empty());
    }

    #[test]
    fn test_small_file_is_single_chunk() {
        let chunks = chunk_content("a\nb\nc\n", &params(10, 2));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
        assert_eq!(chunks[0].content, "a\nb\nc");
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let src = numbered(250);
        let a = chunk_content(&src, &params(40, 5));
        let b = chunk_content(&src, &params(40, 5));
        assert_eq!(a, b);
        assert!(a.len() > 1);
    }

    #[test]
    fn test_chunks_cover_whole_file_in_order() {
        let src = numbered(137);
        let chunks = chunk_content(&src, &params(20, 4));
        assert_eq!(chunks.first().unwrap().start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 137);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line > pair[0].start_line);
            assert!(pair[1].start_line <= pair[0].end_line + 1);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn test_prefers_blank_line_near_target() {
        let mut lines: Vec<String> = (1..=30).map(|i| format!("x{i}")).collect();
        // Line 9 (1-based) is blank, inside the window around target 10.
        lines[8] = String::new();
        let chunks = chunk_content(&lines.join("\n"), &params(10, 0));
        assert_eq!(chunks[0].end_line, 9);
        assert_eq!(chunks[1].start_line, 10);
    }

    #[test]
    fn test_falls_back_to_declaration_start() {
        let mut lines: Vec<String> = (1..=30).map(|i| format!("x{i}")).collect();
        lines[11] = "fn helper() {".to_string();
        let chunks = chunk_content(&lines.join("\n"), &params(10, 0));
        assert_eq!(chunks[0].end_line, 11);
        assert!(chunks[1].content.starts_with("fn helper"));
    }

    #[test]
    fn test_falls_back_to_exact_target() {
        let src = numbered(30);
        let chunks = chunk_content(&src, &params(10, 0));
        assert_eq!(chunks[0].end_line, 10);
        assert_eq!(chunks[1].start_line, 11);
    }

    #[test]
    fn test_overlap_never_stalls() {
        let src = numbered(50);
        let chunks = chunk_content(&src, &params(3, 10));
        assert_eq!(chunks.last().unwrap().end_line, 50);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line > pair[0].start_line);
        }
    }

    #[test]
    fn test_hash_depends_on_parameters() {
        let a = chunk_hash("same", &params(10, 2));
        let mut bumped = params(10, 2);
        bumped.version = 2;
        assert_ne!(a, chunk_hash("same", &bumped));
        assert_eq!(a, chunk_hash("same", &params(10, 2)));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_edit_only_touches_covering_chunk() {
        let src = numbered(200);
        let before = chunk_content(&src, &params(40, 0));
        let edited = src.replace("let value_150 = 150;", "let value_150 = 9999;");
        let after = chunk_content(&edited, &params(40, 0));
        assert_eq!(before.len(), after.len());
        let changed: Vec<usize> = before
            .iter()
            .zip(&after)
            .filter(|(a, b)| a.content_hash != b.content_hash)
            .map(|(a, _)| a.chunk_index)
            .collect();
        assert_eq!(changed.len(), 1);
        let chunk = &after[changed[0]];
        assert!(chunk.start_line <= 150 && 150 <= chunk.end_line);
    }

    #[test]
    fn test_reassemble_removes_overlap() {
        let src = numbered(97);
        let chunks = chunk_content(&src, &params(20, 5));
        let rebuilt = reassemble(chunks.iter().rev().map(|c| {
            (
                c.chunk_index as i64,
                c.start_line as i64,
                c.end_line as i64,
                c.content.as_str(),
            )
        }));
        assert_eq!(rebuilt, src);
    }

    #[test]
    fn test_reassemble_keeps_blank_lines_at_chunk_edges() {
        let mut lines: Vec<String> = (1..=40).map(|i| format!("x{i}")).collect();
        lines[8] = String::new();
        lines[25] = String::new();
        let src = lines.join("\n");
        let chunks = chunk_content(&src, &params(10, 2));
        let rebuilt = reassemble(chunks.iter().map(|c| {
            (
                c.chunk_index as i64,
                c.start_line as i64,
                c.end_line as i64,
                c.content.as_str(),
            )
        }));
        assert_eq!(rebuilt, src);
    }
}
