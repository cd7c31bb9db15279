//! Per-file structural metadata extraction.
//!
//! Pattern-based, not a parser: each [`Profile`] contributes a handful of
//! line-anchored regexes for exports, imports and internal declarations.
//! Docstring and section detection are shared across profiles. Extraction
//! always runs on whole-file content, never on a single chunk.

use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::Regex;

use crate::indexer::languages::{Language, Profile};
use crate::models::FileMetadata;

/// Docstrings are truncated to this many characters.
pub const MAX_DOCSTRING_CHARS: usize = 500;
/// Internal (non-exported) declarations kept per file.
pub const MAX_INTERNALS: usize = 20;
pub const MAX_SECTIONS: usize = 50;
const MAX_SECTION_LABEL_CHARS: usize = 80;

const STOPLIST: &[&str] = &[
    "if", "else", "elif", "for", "while", "do", "switch", "case", "return", "match", "loop",
    "catch", "try", "finally", "except", "raise", "new", "delete", "typeof", "await", "yield",
    "break", "continue", "with", "pass", "lambda", "import", "export", "from", "function", "def",
    "class", "fn", "let", "const", "var", "self", "this", "super", "default",
];

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("extraction pattern is valid")
}

// ---------------------------------------------------------------------------
// EcmaScript (TypeScript / JavaScript)
// ---------------------------------------------------------------------------

static ES_EXPORT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*export\s+(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum|namespace)\s+([A-Za-z_$][\w$]*)")
});
static ES_EXPORT_LIST: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^\s*export\s+(?:type\s+)?\{([^}]*)\}"));
static ES_IMPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?m)^\s*(?:import|export)\s[^'"`;]*?\bfrom\s+['"]([^'"]+)['"]"#)
});
static ES_IMPORT_BARE: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?m)^\s*import\s+['"]([^'"]+)['"]"#));
static ES_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"\b(?:require|import)\(\s*['"]([^'"]+)['"]\s*\)"#)
});
static ES_INTERNAL: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)")
});

fn ecmascript(content: &str, out: &mut Extraction) {
    for cap in ES_EXPORT_DECL.captures_iter(content) {
        out.export(&cap[1]);
    }
    for cap in ES_EXPORT_LIST.captures_iter(content) {
        for item in cap[1].split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            // `a as b` exports `b`.
            let name = item.rsplit(" as ").next().unwrap_or(item).trim();
            let name = name.strip_prefix("type ").unwrap_or(name).trim();
            out.export(name);
        }
    }
    for cap in ES_IMPORT_FROM.captures_iter(content) {
        out.import(&cap[1]);
    }
    for cap in ES_IMPORT_BARE.captures_iter(content) {
        out.import(&cap[1]);
    }
    for cap in ES_REQUIRE.captures_iter(content) {
        out.import(&cap[1]);
    }
    for cap in ES_INTERNAL.captures_iter(content) {
        out.internal(&cap[1]);
    }
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

static PY_DECL: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^(?:async\s+)?(?:def|class)\s+([A-Za-z_]\w*)"));
static PY_CONSTANT: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^([A-Z][A-Z0-9_]*)\s*(?::[^=\n]*)?=[^=]"));
static PY_ALL: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?ms)^__all__\s*(?::[^=\n]*)?=\s*[\[(](.*?)[\])]"));
static PY_QUOTED: LazyLock<Regex> = LazyLock::new(|| re(r#"['"]([A-Za-z_]\w*)['"]"#));
static PY_FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*from\s+(\.+[\w.]*|[A-Za-z_][\w.]*)\s+import\s+\(?([^)\n]*)")
});
static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^\s*import\s+([A-Za-z_][\w.]*(?:\s+as\s+\w+)?(?:\s*,\s*[A-Za-z_][\w.]*(?:\s+as\s+\w+)?)*)"));

fn python(content: &str, out: &mut Extraction) {
    let declared_all: Vec<String> = PY_ALL
        .captures(content)
        .map(|cap| {
            PY_QUOTED
                .captures_iter(&cap[1])
                .map(|c| c[1].to_string())
                .collect()
        })
        .unwrap_or_default();

    for cap in PY_DECL.captures_iter(content) {
        let name = &cap[1];
        let public = if declared_all.is_empty() {
            !name.starts_with('_')
        } else {
            declared_all.iter().any(|n| n == name)
        };
        if public {
            out.export(name);
        } else {
            out.internal(name);
        }
    }
    for cap in PY_CONSTANT.captures_iter(content) {
        if declared_all.is_empty() || declared_all.iter().any(|n| n == &cap[1]) {
            out.export(&cap[1]);
        }
    }
    for name in &declared_all {
        out.export(name);
    }

    for cap in PY_FROM_IMPORT.captures_iter(content) {
        let module = &cap[1];
        if module.chars().all(|c| c == '.') {
            // `from . import a, b` names sibling modules.
            for name in cap[2].split(',') {
                let name = name.split_whitespace().next().unwrap_or("");
                if !name.is_empty() && name != "*" {
                    out.import(&format!("{module}{name}"));
                }
            }
        } else {
            out.import(module);
        }
    }
    for cap in PY_IMPORT.captures_iter(content) {
        for module in cap[1].split(',') {
            if let Some(name) = module.split_whitespace().next() {
                out.import(name);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------------

static RS_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?m)^\s*pub\s+(?:(?:const|async|unsafe|extern(?:\s+"[^"]*")?)\s+)*(?:fn|struct|enum|trait|type|const|static|mod|union)\s+([A-Za-z_]\w*)"#)
});
static RS_INTERNAL: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^(?:pub\([^)]*\)\s+)?(?:(?:const|async|unsafe)\s+)*(?:fn|struct|enum|trait|type|const|static|mod|union)\s+([A-Za-z_]\w*)")
});
static RS_USE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([A-Za-z_][\w:]*)")
});
static RS_MOD_DECL: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_]\w*)\s*;")
});

fn rust(content: &str, out: &mut Extraction) {
    for cap in RS_EXPORT.captures_iter(content) {
        out.export(&cap[1]);
    }
    for cap in RS_USE.captures_iter(content) {
        out.import(cap[1].trim_end_matches(':'));
    }
    for cap in RS_MOD_DECL.captures_iter(content) {
        out.import(&format!("./{}", &cap[1]));
    }
    for cap in RS_INTERNAL.captures_iter(content) {
        out.internal(&cap[1]);
    }
}

// ---------------------------------------------------------------------------
// Go
// ---------------------------------------------------------------------------

static GO_DECL: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^(?:func\s+(?:\([^)]*\)\s*)?|type\s+|var\s+|const\s+)([A-Za-z_]\w*)")
});
static GO_IMPORT_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?m)^import\s+(?:[\w.]+\s+)?"([^"]+)""#));
static GO_IMPORT_BLOCK: LazyLock<Regex> = LazyLock::new(|| re(r"(?ms)^import\s*\((.*?)\)"));
static GO_QUOTED: LazyLock<Regex> = LazyLock::new(|| re(r#""([^"]+)""#));

fn go(content: &str, out: &mut Extraction) {
    for cap in GO_DECL.captures_iter(content) {
        let name = &cap[1];
        if name.starts_with(|c: char| c.is_ascii_uppercase()) {
            out.export(name);
        } else {
            out.internal(name);
        }
    }
    for cap in GO_IMPORT_SINGLE.captures_iter(content) {
        out.import(&cap[1]);
    }
    for cap in GO_IMPORT_BLOCK.captures_iter(content) {
        for quoted in GO_QUOTED.captures_iter(&cap[1]) {
            out.import(&quoted[1]);
        }
    }
}

// ---------------------------------------------------------------------------
// Java
// ---------------------------------------------------------------------------

static JAVA_PUBLIC_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*public\s+(?:(?:abstract|final|static|sealed|non-sealed|strictfp)\s+)*(?:class|interface|enum|record|@interface)\s+([A-Za-z_]\w*)")
});
static JAVA_PUBLIC_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*public\s+(?:(?:static|final|abstract|synchronized|default|native)\s+)*(?:<[^>]*>\s+)?[\w<>\[\],.?]+\s+([A-Za-z_]\w*)\s*\(")
});
static JAVA_PRIVATE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*(?:private|protected)\s+(?:(?:static|final|abstract|synchronized|native)\s+)*(?:(?:class|interface|enum|record)\s+([A-Za-z_]\w*)|(?:<[^>]*>\s+)?[\w<>\[\],.?]+\s+([A-Za-z_]\w*)\s*\()")
});
static JAVA_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^\s*import\s+(?:static\s+)?([\w.]+(?:\.\*)?)\s*;"));

fn java(content: &str, out: &mut Extraction) {
    for cap in JAVA_PUBLIC_TYPE.captures_iter(content) {
        out.export(&cap[1]);
    }
    for cap in JAVA_PUBLIC_METHOD.captures_iter(content) {
        out.export(&cap[1]);
    }
    for cap in JAVA_IMPORT.captures_iter(content) {
        out.import(&cap[1]);
    }
    for cap in JAVA_PRIVATE_DECL.captures_iter(content) {
        if let Some(name) = cap.get(1).or_else(|| cap.get(2)) {
            out.internal(name.as_str());
        }
    }
}

// ---------------------------------------------------------------------------
// Shared: docstring and section banners
// ---------------------------------------------------------------------------

static DELIMITER_ONLY: LazyLock<Regex> =
    LazyLock::new(|| re(r"^\s*(?://+!?|#+|/\*+|\*+|--|;+)\s*[-=─━]{3,}\s*(?:\*/)?\s*$"));
static INLINE_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^\s*(?://+!?|#+|/\*+|--|;+)\s*([-=─━]{2,})\s*([^-=─━]+?)\s*([-=─━]*)\s*(?:\*/)?\s*$")
});
static COMMENT_TEXT: LazyLock<Regex> =
    LazyLock::new(|| re(r"^\s*(?://+!?|#+|\*+|--|;+)\s*(.+?)\s*$"));

fn clean_label(label: &str) -> Option<String> {
    let label = label.trim().trim_end_matches("*/").trim();
    if !label.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(label.chars().take(MAX_SECTION_LABEL_CHARS).collect())
}

/// Banner-style section labels, in file order.
pub fn extract_sections(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let mut labels: IndexSet<String> = IndexSet::new();
    let mut i = 0;
    while i < lines.len() && labels.len() < MAX_SECTIONS {
        let line = lines[i];
        // Boxed banner: delimiter / label / delimiter.
        if DELIMITER_ONLY.is_match(line)
            && i + 2 < lines.len()
            && DELIMITER_ONLY.is_match(lines[i + 2])
            && !DELIMITER_ONLY.is_match(lines[i + 1])
        {
            if let Some(label) = COMMENT_TEXT
                .captures(lines[i + 1])
                .and_then(|c| clean_label(&c[1]))
            {
                labels.insert(label);
                i += 3;
                continue;
            }
        }
        if let Some(cap) = INLINE_BANNER.captures(line) {
            let lead = cap[1].chars().count();
            let trail = cap[3].chars().count();
            if lead >= 3 || trail >= 3 {
                if let Some(label) = clean_label(&cap[2]) {
                    labels.insert(label);
                }
            }
        }
        i += 1;
    }
    labels.into_iter().collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

fn finish_docstring(raw: &[String]) -> Option<String> {
    let text = collapse_whitespace(&raw.join(" "));
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(&text, MAX_DOCSTRING_CHARS))
    }
}

/// Index of the first line that is not blank, a shebang, or a pragma.
fn first_meaningful_line(lines: &[&str], profile: Profile) -> usize {
    let mut i = 0;
    while i < lines.len() {
        let t = lines[i].trim();
        let skip = t.is_empty()
            || (i == 0 && t.starts_with("#!"))
            || (profile == Profile::Python && t.starts_with('#') && t.contains("coding"))
            || (profile == Profile::EcmaScript
                && (t == "'use strict';" || t == "\"use strict\";" || t == "'use client';"));
        if !skip {
            break;
        }
        i += 1;
    }
    i
}

fn python_triple_quoted(lines: &[&str], start: usize) -> Option<String> {
    let first = lines.get(start)?.trim();
    let body = first.trim_start_matches(|c: char| matches!(c, 'r' | 'u' | 'R' | 'U'));
    let quote = if body.starts_with("\"\"\"") {
        "\"\"\""
    } else if body.starts_with("'''") {
        "'''"
    } else {
        return None;
    };
    let rest = &body[3..];
    if let Some(end) = rest.find(quote) {
        return finish_docstring(&[rest[..end].to_string()]);
    }
    let mut collected = vec![rest.to_string()];
    for line in &lines[start + 1..] {
        if let Some(end) = line.find(quote) {
            collected.push(line[..end].to_string());
            return finish_docstring(&collected);
        }
        collected.push((*line).to_string());
    }
    finish_docstring(&collected)
}

fn leading_comment(lines: &[&str], start: usize) -> Option<String> {
    let first = lines.get(start)?.trim();
    if first.starts_with("/*") {
        let mut collected = Vec::new();
        for line in &lines[start..] {
            let t = line.trim();
            let done = t.ends_with("*/");
            let body = t
                .trim_end_matches("*/")
                .trim_start_matches("/*")
                .trim_start_matches(['*', '!']);
            if !DELIMITER_ONLY.is_match(t) {
                collected.push(body.to_string());
            }
            if done {
                break;
            }
        }
        return finish_docstring(&collected);
    }

    let marker = ["//!", "///", "//", "#", "--"]
        .into_iter()
        .find(|m| first.starts_with(m))?;
    let mut collected = Vec::new();
    for line in &lines[start..] {
        let t = line.trim();
        if !t.starts_with(marker) {
            break;
        }
        // `///` documents the next item, not the file.
        if marker == "//" && t.starts_with("///") {
            break;
        }
        if DELIMITER_ONLY.is_match(t) {
            continue;
        }
        collected.push(t[marker.len()..].trim().to_string());
    }
    finish_docstring(&collected)
}

/// File-level documentation: a leading block/line comment, or for Python a
/// leading triple-quoted string.
pub fn extract_docstring(content: &str, profile: Profile) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let start = first_meaningful_line(&lines, profile);
    if profile == Profile::Python {
        let mut i = start;
        while i < lines.len() && lines[i].trim().starts_with('#') {
            i += 1;
        }
        while i < lines.len() && lines[i].trim().is_empty() {
            i += 1;
        }
        if let Some(doc) = python_triple_quoted(&lines, i) {
            return Some(doc);
        }
    }
    if profile == Profile::Rust {
        // Only inner doc comments describe the module.
        let t = lines.get(start)?.trim();
        if !(t.starts_with("//!") || t.starts_with("/*!")) {
            return None;
        }
    }
    leading_comment(&lines, start)
}

// ---------------------------------------------------------------------------
// Extraction entry point
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Extraction {
    exports: IndexSet<String>,
    imports: IndexSet<String>,
    internals: IndexSet<String>,
}

impl Extraction {
    fn export(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.exports.insert(name.to_string());
        }
    }

    fn import(&mut self, specifier: &str) {
        let specifier = specifier.trim();
        if !specifier.is_empty() {
            self.imports.insert(specifier.to_string());
        }
    }

    fn internal(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.internals.insert(name.to_string());
        }
    }

    /// Internals exclude exports and control-flow keywords, capped.
    fn finish_internals(&self) -> Vec<String> {
        self.internals
            .iter()
            .filter(|n| !self.exports.contains(*n))
            .filter(|n| !STOPLIST.contains(&n.as_str()))
            .take(MAX_INTERNALS)
            .cloned()
            .collect()
    }
}

/// Extract structural metadata from a whole file's content.
pub fn extract_metadata(path: &str, content: &str, language: Option<Language>) -> FileMetadata {
    let profile = Profile::for_language(language);
    let mut extraction = Extraction::default();
    match profile {
        Profile::EcmaScript => ecmascript(content, &mut extraction),
        Profile::Python => python(content, &mut extraction),
        Profile::Rust => rust(content, &mut extraction),
        Profile::Go => go(content, &mut extraction),
        Profile::Java => java(content, &mut extraction),
        Profile::Generic => {}
    }

    FileMetadata {
        path: path.to_string(),
        language: language.map(|l| l.id().to_string()),
        internals: extraction.finish_internals(),
        exports: extraction.exports.into_iter().collect(),
        imports: extraction.imports.into_iter().collect(),
        docstring: extract_docstring(content, profile),
        sections: extract_sections(content),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
