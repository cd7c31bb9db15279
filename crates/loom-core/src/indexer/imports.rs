//! Import resolution from raw specifiers to repository files.
//!
//! Only relative specifiers are resolved. Package imports (`react`,
//! `std::sync`, `java.util.List`) never produce edges.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::indexer::languages::{Language, Profile};
use crate::models::{FileMetadata, ImportEdge};

/// Collapse `.` and `..` segments. Returns `None` when the path climbs above
/// the repository root.
pub fn normalize_posix_path(path: &str) -> Option<String> {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            _ => stack.push(part),
        }
    }
    Some(stack.join("/"))
}

/// Directory that relative specifiers in `source_path` are resolved against.
fn base_dir(source_path: &str, profile: Profile) -> String {
    let path = Path::new(source_path);
    if profile == Profile::Rust {
        // `mod x;` in `src/foo.rs` refers to `src/foo/x.rs`.
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if !matches!(stem, "lib" | "main" | "mod") {
            if let Some(stripped) = source_path.strip_suffix(".rs") {
                return stripped.to_string();
            }
        }
    }
    path.parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}

/// Resolve one specifier from `source_path` to a known repository file.
pub fn resolve_specifier(
    source_path: &str,
    specifier: &str,
    profile: Profile,
    known_paths: &HashSet<&str>,
) -> Option<String> {
    let relative = profile.relative_specifier(specifier)?;
    let dir = base_dir(source_path, profile);
    let joined = if dir.is_empty() {
        relative
    } else {
        format!("{dir}/{relative}")
    };
    let base = normalize_posix_path(&joined)?;

    if !base.is_empty() && known_paths.contains(base.as_str()) {
        return Some(base);
    }
    for suffix in profile.resolution_suffixes() {
        let candidate = if base.is_empty() {
            suffix.trim_start_matches('/').to_string()
        } else {
            format!("{base}{suffix}")
        };
        if known_paths.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    None
}

/// Build the deduplicated, sorted file-level import graph.
///
/// Edges only point at files in `files`; self-imports are dropped.
pub fn build_import_edges(files: &[FileMetadata]) -> Vec<ImportEdge> {
    let known: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let mut edges: BTreeSet<ImportEdge> = BTreeSet::new();

    for file in files {
        let language = file.language.as_deref().and_then(Language::from_id);
        let profile = Profile::for_language(language);
        for specifier in &file.imports {
            let Some(target) = resolve_specifier(&file.path, specifier, profile, &known) else {
                continue;
            };
            if target == file.path {
                continue;
            }
            edges.insert(ImportEdge {
                source_path: file.path.clone(),
                target_path: target,
            });
        }
    }
    tracing::debug!(edges = edges.len(), files = files.len(), "built import graph");
    edges.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, language: &str, imports: &[&str]) -> FileMetadata {
        FileMetadata {
            path: path.to_string(),
            language: Some(language.to_string()),
            imports: imports.iter().map(|s| s.to_string()).collect(),
            ..FileMetadata::default()
        }
    }

    fn edge(source: &str, target: &str) -> ImportEdge {
        ImportEdge {
            source_path: source.to_string(),
            target_path: target.to_string(),
        }
    }

    #[test]
    fn test_normalize_posix_path() {
        assert_eq!(normalize_posix_path("src/./a/../b.ts").as_deref(), Some("src/b.ts"));
        assert_eq!(normalize_posix_path("a//b").as_deref(), Some("a/b"));
        assert_eq!(normalize_posix_path("../outside"), None);
    }

    #[test]
    fn test_typescript_resolution_order() {
        let files = vec![
            file("src/app.ts", "typescript", &["./foo", "./widgets", "react"]),
            file("src/foo.ts", "typescript", &[]),
            file("src/widgets/index.ts", "typescript", &[]),
        ];
        let edges = build_import_edges(&files);
        assert_eq!(
            edges,
            vec![
                edge("src/app.ts", "src/foo.ts"),
                edge("src/app.ts", "src/widgets/index.ts"),
            ]
        );
    }

    #[test]
    fn test_unresolvable_specifier_produces_no_edge() {
        let files = vec![file("src/app.ts", "typescript", &["./missing", "../../x"])];
        assert!(build_import_edges(&files).is_empty());
    }

    #[test]
    fn test_parent_directory_and_exact_match() {
        let files = vec![
            file("src/ui/button.tsx", "typescript", &["../theme.js", "../util"]),
            file("src/theme.js", "javascript", &[]),
            file("src/util.tsx", "typescript", &[]),
        ];
        let edges = build_import_edges(&files);
        assert_eq!(
            edges,
            vec![
                edge("src/ui/button.tsx", "src/theme.js"),
                edge("src/ui/button.tsx", "src/util.tsx"),
            ]
        );
    }

    #[test]
    fn test_python_relative_imports() {
        let files = vec![
            file("pkg/billing/invoice.py", "python", &[".models", "..core.db", ".", "os"]),
            file("pkg/billing/models.py", "python", &[]),
            file("pkg/billing/__init__.py", "python", &[]),
            file("pkg/core/db/__init__.py", "python", &[]),
        ];
        let edges = build_import_edges(&files);
        assert_eq!(
            edges,
            vec![
                edge("pkg/billing/invoice.py", "pkg/billing/__init__.py"),
                edge("pkg/billing/invoice.py", "pkg/billing/models.py"),
                edge("pkg/billing/invoice.py", "pkg/core/db/__init__.py"),
            ]
        );
    }

    #[test]
    fn test_rust_mod_declarations() {
        let files = vec![
            file("src/lib.rs", "rust", &["./store", "std::fmt"]),
            file("src/store.rs", "rust", &["./schema"]),
            file("src/store/schema.rs", "rust", &[]),
        ];
        let edges = build_import_edges(&files);
        assert_eq!(
            edges,
            vec![
                edge("src/lib.rs", "src/store.rs"),
                edge("src/store.rs", "src/store/schema.rs"),
            ]
        );
    }

    #[test]
    fn test_self_and_duplicate_imports_collapse() {
        let files = vec![
            file("src/a.ts", "typescript", &["./a", "./b", "./b.ts"]),
            file("src/b.ts", "typescript", &[]),
        ];
        assert_eq!(build_import_edges(&files), vec![edge("src/a.ts", "src/b.ts")]);
    }
}
