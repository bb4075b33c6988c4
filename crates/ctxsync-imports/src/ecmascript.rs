//! ECMAScript / TypeScript imports.
//!
//! Only relative (`./`, `../`) and absolute specifiers are followed; bare
//! specifiers name registry packages and are skipped.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{first_file, ImportExtractor};

/// Extensions tried, in order, for extensionless specifiers.
const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "json"];

static STATIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:type\s+)?(?:[\w*$\s{},]+?\s+from\s+)?['"]([^'"\n]+)['"]"#)
        .expect("static import pattern is valid")
});

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^\s*export\s+(?:type\s+)?(?:\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s*from\s+['"]([^'"\n]+)['"]"#,
    )
    .expect("export-from pattern is valid")
});

static REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\brequire\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#).expect("require pattern is valid")
});

static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
        .expect("dynamic import pattern is valid")
});

/// Import extraction for `.js`, `.jsx`, `.ts`, `.tsx`, `.mjs` and `.cjs`
pub struct EcmaScriptExtractor;

fn is_local(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
}

impl ImportExtractor for EcmaScriptExtractor {
    fn extract(&self, content: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();
        for pattern in [&*STATIC_IMPORT, &*EXPORT_FROM, &*REQUIRE, &*DYNAMIC_IMPORT] {
            for caps in pattern.captures_iter(content) {
                if let Some(m) = caps.get(1) {
                    if is_local(m.as_str()) {
                        found.push((m.start(), m.as_str().to_string()));
                    }
                }
            }
        }
        found.sort_by_key(|(offset, _)| *offset);
        found.into_iter().map(|(_, specifier)| specifier).collect()
    }

    fn resolve(&self, source: &Path, specifier: &str, _root: Option<&Path>) -> Option<PathBuf> {
        if !is_local(specifier) {
            return None;
        }

        let base = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            source.parent()?.join(specifier)
        };

        let mut candidates = vec![base.clone()];

        // TypeScript sources commonly import their own output name: './x.js' -> './x.ts'
        if let Some(stem) = specifier
            .strip_suffix(".js")
            .or_else(|| specifier.strip_suffix(".jsx"))
        {
            let stem_path = base.with_file_name(
                Path::new(stem)
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_default(),
            );
            for ext in ["ts", "tsx"] {
                candidates.push(append_extension(&stem_path, ext));
            }
        }

        candidates.extend(EXTENSIONS.iter().map(|ext| append_extension(&base, ext)));
        candidates.extend(
            EXTENSIONS
                .iter()
                .map(|ext| base.join(format!("index.{ext}"))),
        );

        first_file(candidates)
    }
}

/// `foo.service` + `ts` -> `foo.service.ts` (never replaces an extension)
fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".");
    raw.push(ext);
    PathBuf::from(raw)
}
