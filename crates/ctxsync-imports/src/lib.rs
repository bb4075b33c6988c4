//! ctxsync Imports - Import graph resolution
//!
//! Given a file's content and language, finds the local files it imports.
//! Each supported language has its own submodule implementing
//! [`ImportExtractor`], which keeps language-specific quirks isolated.
//!
//! Extraction is pattern-based (no full parse): good enough to pull the
//! neighbours of a file into an assistant's context, and tolerant of files
//! that do not compile yet.
//!
//! ## Supported languages
//!
//! - ECMAScript / TypeScript - `import`, `export … from`, `require()`, dynamic `import()`
//! - Python - `import a.b`, `from .x import y`
//! - Solidity - `import "…"`, `import {A} from "…"`, `import * as X from "…"`
//! - C / C++ - quoted `#include "…"`

mod c_family;
mod ecmascript;
mod python;
mod solidity;

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use ctxsync_core::domain::Language;
use tracing::debug;

pub use c_family::CFamilyExtractor;
pub use ecmascript::EcmaScriptExtractor;
pub use python::PythonExtractor;
pub use solidity::SolidityExtractor;

/// Language-specific import extraction and resolution
pub trait ImportExtractor: Send + Sync {
    /// Raw import specifiers in source order, duplicates allowed
    fn extract(&self, content: &str) -> Vec<String>;

    /// Map a specifier to an existing file
    ///
    /// `root`, when given, bounds any upward directory search.
    fn resolve(&self, source: &Path, specifier: &str, root: Option<&Path>) -> Option<PathBuf>;
}

/// Gets the extractor for a language.
///
/// Returns None for languages without local imports worth following.
pub fn extractor_for(language: Language) -> Option<Box<dyn ImportExtractor>> {
    match language {
        Language::JavaScript | Language::TypeScript => Some(Box::new(EcmaScriptExtractor)),
        Language::Python => Some(Box::new(PythonExtractor)),
        Language::Solidity => Some(Box::new(SolidityExtractor)),
        Language::C | Language::Cpp => Some(Box::new(CFamilyExtractor)),
        _ => None,
    }
}

/// Resolves the local imports of a file to absolute paths
#[derive(Debug, Clone, Default)]
pub struct ImportGraphResolver {
    root: Option<PathBuf>,
}

impl ImportGraphResolver {
    /// Resolver whose upward searches stop at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Resolver whose upward searches run to the filesystem root
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Local files imported by `path`
    ///
    /// # Arguments
    /// * `path` - Absolute path of the importing file
    /// * `content` - Its current content
    /// * `language` - Its language
    ///
    /// # Returns
    /// Existing files in first-import order, without duplicates and without
    /// `path` itself. Unresolvable imports are dropped.
    pub fn resolve_imports(&self, path: &Path, content: &str, language: Language) -> Vec<PathBuf> {
        let Some(extractor) = extractor_for(language) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for specifier in extractor.extract(content) {
            match extractor.resolve(path, &specifier, self.root.as_deref()) {
                Some(target) => {
                    let target = normalize(&target);
                    if target != path && seen.insert(target.clone()) {
                        resolved.push(target);
                    }
                }
                None => {
                    debug!(source = %path.display(), specifier, "Unresolved import");
                }
            }
        }
        resolved
    }
}

/// Lexically resolve `.` and `..` so equal files compare equal
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Directories from `start` upward, ending at `root` when it is an ancestor
pub(crate) fn ancestors_within<'a>(
    start: &'a Path,
    root: Option<&'a Path>,
) -> impl Iterator<Item = &'a Path> + 'a {
    let bounded = root.filter(|r| start.starts_with(r));
    let mut done = false;
    start.ancestors().take_while(move |dir| {
        if done {
            return false;
        }
        if let Some(root) = bounded {
            if *dir == root {
                done = true;
            }
        }
        true
    })
}

/// First candidate that is an existing regular file
pub(crate) fn first_file(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|c| c.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d.ts")),
            PathBuf::from("/a/c/d.ts")
        );
    }

    #[test]
    fn test_ancestors_stop_at_root() {
        let dirs: Vec<_> =
            ancestors_within(Path::new("/ws/a/b"), Some(Path::new("/ws"))).collect();
        assert_eq!(
            dirs,
            vec![Path::new("/ws/a/b"), Path::new("/ws/a"), Path::new("/ws")]
        );
    }

    #[test]
    fn test_ancestors_unbounded_when_root_unrelated() {
        let dirs: Vec<_> =
            ancestors_within(Path::new("/x/y"), Some(Path::new("/ws"))).collect();
        assert_eq!(dirs, vec![Path::new("/x/y"), Path::new("/x"), Path::new("/")]);
    }

    #[test]
    fn test_resolves_sibling_helper() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.js");
        fs::write(&main, "import { helper } from './helper'\n").unwrap();
        fs::write(dir.path().join("helper.js"), "export const helper = 1;\n").unwrap();

        let resolver = ImportGraphResolver::new(dir.path());
        let content = fs::read_to_string(&main).unwrap();
        let imports = resolver.resolve_imports(&main, &content, Language::JavaScript);

        assert_eq!(imports.len(), 1);
        assert!(imports[0].ends_with("helper.js"));
    }

    #[test]
    fn test_duplicates_and_self_imports_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.ts");
        fs::write(dir.path().join("a.ts"), "").unwrap();
        let content = "import a from './a';\nconst b = require('./a');\nimport './main';\n";
        fs::write(&main, content).unwrap();

        let resolver = ImportGraphResolver::new(dir.path());
        let imports = resolver.resolve_imports(&main, content, Language::TypeScript);
        assert_eq!(imports, vec![dir.path().join("a.ts")]);
    }

    #[test]
    fn test_unsupported_language_is_empty() {
        let resolver = ImportGraphResolver::unbounded();
        let imports =
            resolver.resolve_imports(Path::new("/x/readme.md"), "[a](./b.md)", Language::Markdown);
        assert!(imports.is_empty());
        assert!(extractor_for(Language::Rust).is_none());
    }

    #[test]
    fn test_unresolved_imports_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.ts");
        let resolver = ImportGraphResolver::new(dir.path());
        let imports =
            resolver.resolve_imports(&main, "import x from './missing';", Language::TypeScript);
        assert!(imports.is_empty());
    }
}
