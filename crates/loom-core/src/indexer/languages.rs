//! Language detection and the closed set of extraction profiles.

use std::path::Path;

use serde::{Deserialize, Serialize};

const LANGUAGE_BY_EXTENSION: &[(&str, Language)] = &[
    ("ts", Language::TypeScript),
    ("tsx", Language::TypeScript),
    ("mts", Language::TypeScript),
    ("cts", Language::TypeScript),
    ("js", Language::JavaScript),
    ("jsx", Language::JavaScript),
    ("mjs", Language::JavaScript),
    ("cjs", Language::JavaScript),
    ("py", Language::Python),
    ("pyi", Language::Python),
    ("rs", Language::Rust),
    ("go", Language::Go),
    ("java", Language::Java),
];

/// A detected source language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Rust,
    Go,
    Java,
}

impl Language {
    pub fn id(self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
        }
    }

    pub fn from_id(id: &str) -> Option<Language> {
        match id {
            "typescript" => Some(Language::TypeScript),
            "javascript" => Some(Language::JavaScript),
            "python" => Some(Language::Python),
            "rust" => Some(Language::Rust),
            "go" => Some(Language::Go),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    pub fn profile(self) -> Profile {
        match self {
            Language::TypeScript | Language::JavaScript => Profile::EcmaScript,
            Language::Python => Profile::Python,
            Language::Rust => Profile::Rust,
            Language::Go => Profile::Go,
            Language::Java => Profile::Java,
        }
    }
}

/// Detect a language from the file extension.
pub fn detect_language(path: &str) -> Option<Language> {
    let ext = Path::new(path).extension()?.to_str()?.to_lowercase();
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Extraction profile: every variant provides the same capability set
/// (exports, imports, docstring, sections, internals, import resolution).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Profile {
    EcmaScript,
    Python,
    Rust,
    Go,
    Java,
    Generic,
}

const ECMASCRIPT_SUFFIXES: &[&str] = &[
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".mjs",
    ".cjs",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];
const PYTHON_SUFFIXES: &[&str] = &[".py", "/__init__.py"];
const RUST_SUFFIXES: &[&str] = &[".rs", "/mod.rs"];
const GENERIC_SUFFIXES: &[&str] = &[
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    "/index.ts",
    "/index.js",
    ".py",
    "/__init__.py",
    ".rs",
    "/mod.rs",
];

impl Profile {
    pub fn for_language(language: Option<Language>) -> Profile {
        language.map(Language::profile).unwrap_or(Profile::Generic)
    }

    /// Ordered suffixes tried after the exact path; first hit wins.
    pub fn resolution_suffixes(self) -> &'static [&'static str] {
        match self {
            Profile::EcmaScript => ECMASCRIPT_SUFFIXES,
            Profile::Python => PYTHON_SUFFIXES,
            Profile::Rust => RUST_SUFFIXES,
            Profile::Go | Profile::Java => &[],
            Profile::Generic => GENERIC_SUFFIXES,
        }
    }

    /// Rewrite a raw specifier into `./` / `../` path form when it is a
    /// relative reference. Module-style specifiers return `None`.
    pub fn relative_specifier(self, specifier: &str) -> Option<String> {
        let spec = specifier.trim();
        if spec.is_empty() {
            return None;
        }
        match self {
            Profile::Python => python_relative(spec),
            _ => {
                if spec == "." || spec == ".." || spec.starts_with("./") || spec.starts_with("../")
                {
                    Some(spec.to_string())
                } else {
                    None
                }
            }
        }
    }
}

/// `.pkg.mod` -> `./pkg/mod`, `..mod` -> `../mod`, `.` -> `.`
fn python_relative(spec: &str) -> Option<String> {
    if !spec.starts_with('.') {
        return None;
    }
    let levels = spec.chars().take_while(|&c| c == '.').count();
    let suffix = spec[levels..].replace('.', "/");
    let mut base = String::from(".");
    for _ in 1..levels {
        base.push_str("/..");
    }
    if suffix.is_empty() {
        Some(base)
    } else {
        Some(format!("{base}/{suffix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language_by_extension() {
        assert_eq!(detect_language("src/app.tsx"), Some(Language::TypeScript));
        assert_eq!(detect_language("lib/util.MJS"), Some(Language::JavaScript));
        assert_eq!(detect_language("pkg/mod.py"), Some(Language::Python));
        assert_eq!(detect_language("src/main.rs"), Some(Language::Rust));
        assert_eq!(detect_language("README.md"), None);
        assert_eq!(detect_language("Makefile"), None);
    }

    #[test]
    fn test_language_ids_round_trip() {
        for lang in [
            Language::TypeScript,
            Language::JavaScript,
            Language::Python,
            Language::Rust,
            Language::Go,
            Language::Java,
        ] {
            assert_eq!(Language::from_id(lang.id()), Some(lang));
        }
    }

    #[test]
    fn test_ecmascript_relative_specifiers() {
        let p = Profile::EcmaScript;
        assert_eq!(p.relative_specifier("./foo"), Some("./foo".to_string()));
        assert_eq!(p.relative_specifier("../lib/x"), Some("../lib/x".to_string()));
        assert_eq!(p.relative_specifier("react"), None);
        assert_eq!(p.relative_specifier("@scope/pkg"), None);
    }

    #[test]
    fn test_python_relative_specifiers() {
        let p = Profile::Python;
        assert_eq!(p.relative_specifier(".models"), Some("./models".to_string()));
        assert_eq!(p.relative_specifier("..core.db"), Some("./../core/db".to_string()));
        assert_eq!(p.relative_specifier("."), Some(".".to_string()));
        assert_eq!(p.relative_specifier("os.path"), None);
    }

    #[test]
    fn test_profile_for_unknown_language_is_generic() {
        assert_eq!(Profile::for_language(None), Profile::Generic);
        assert_eq!(
            Profile::for_language(Some(Language::JavaScript)),
            Profile::EcmaScript
        );
    }
}
