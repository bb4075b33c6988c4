//! Solidity imports.
//!
//! Relative targets resolve against the importing file. Package-style
//! targets (`@openzeppelin/...`, `forge-std/...`) are looked up from the
//! importing directory upward, in the directory itself and in its
//! `node_modules/` and `lib/` folders.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{ancestors_within, first_file, ImportExtractor};

static IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:[^'";]*?\s+from\s+)?["']([^"'\n]+)["']\s*(?:as\s+\w+\s*)?;"#)
        .expect("solidity import pattern is valid")
});

/// Package roots searched in each ancestor directory.
const PACKAGE_DIRS: &[&str] = &["node_modules", "lib"];

/// Import extraction for `.sol`
pub struct SolidityExtractor;

impl ImportExtractor for SolidityExtractor {
    fn extract(&self, content: &str) -> Vec<String> {
        IMPORT
            .captures_iter(content)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn resolve(&self, source: &Path, specifier: &str, root: Option<&Path>) -> Option<PathBuf> {
        let dir = source.parent()?;

        if specifier.starts_with("./") || specifier.starts_with("../") {
            return first_file([dir.join(specifier)]);
        }

        ancestors_within(dir, root).find_map(|ancestor| {
            let mut candidates = vec![ancestor.join(specifier)];
            candidates.extend(
                PACKAGE_DIRS
                    .iter()
                    .map(|pkg| ancestor.join(pkg).join(specifier)),
            );
            first_file(candidates)
        })
    }
}
