//! C / C++ includes. Only quoted includes are local; `<...>` is the system path.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{first_file, ImportExtractor};

static INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*#[ \t]*include[ \t]*"([^"\n]+)""#).expect("include pattern is valid")
});

pub struct CFamilyExtractor;

impl ImportExtractor for CFamilyExtractor {
    fn extract(&self, content: &str) -> Vec<String> {
        INCLUDE
            .captures_iter(content)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn resolve(&self, source: &Path, specifier: &str, _root: Option<&Path>) -> Option<PathBuf> {
        first_file([source.parent()?.join(specifier)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_extracts_quoted_includes_only() {
        let content = "#include <stdio.h>\n#include \"util.h\"\n  # include \"../common/log.h\"\n";
        assert_eq!(
            CFamilyExtractor.extract(content),
            vec!["util.h", "../common/log.h"]
        );
    }

    #[test]
    fn test_resolves_relative_to_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("util.h"), "").unwrap();
        let source = dir.path().join("main.c");
        assert_eq!(
            CFamilyExtractor.resolve(&source, "util.h", None),
            Some(dir.path().join("util.h"))
        );
        assert_eq!(CFamilyExtractor.resolve(&source, "missing.h", None), None);
    }
}
