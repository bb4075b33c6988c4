//! Python imports.
//!
//! Specifiers keep Python's dotted form (`..pkg.mod`). Relative imports climb
//! one directory per extra leading dot; absolute ones are searched from the
//! importing file's directory upward. Standard-library modules are skipped.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{ancestors_within, first_file, ImportExtractor};

static FROM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*from[ \t]+(\.*[\w.]*)[ \t]+import[ \t]+\(?([^)\n#]*)")
        .expect("from-import pattern is valid")
});

static PLAIN_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*import[ \t]+([\w.]+(?:[ \t]+as[ \t]+\w+)?(?:[ \t]*,[ \t]*[\w.]+(?:[ \t]+as[ \t]+\w+)?)*)")
        .expect("import pattern is valid")
});

/// Top-level standard-library modules never resolved locally.
const STDLIB_MODULES: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "base64", "binascii", "bisect",
    "builtins", "bz2", "calendar", "cmath", "codecs", "collections", "concurrent", "configparser",
    "contextlib", "contextvars", "copy", "csv", "ctypes", "dataclasses", "datetime", "decimal",
    "difflib", "dis", "email", "enum", "errno", "fnmatch", "fractions", "functools", "gc",
    "getpass", "gettext", "glob", "gzip", "hashlib", "heapq", "hmac", "html", "http", "importlib",
    "inspect", "io", "ipaddress", "itertools", "json", "keyword", "locale", "logging", "lzma",
    "math", "mimetypes", "multiprocessing", "numbers", "operator", "os", "pathlib", "pickle",
    "platform", "pprint", "queue", "random", "re", "secrets", "select", "selectors", "shlex",
    "shutil", "signal", "socket", "sqlite3", "ssl", "stat", "statistics", "string", "struct",
    "subprocess", "sys", "tarfile", "tempfile", "textwrap", "threading", "time", "timeit",
    "tokenize", "traceback", "types", "typing", "unicodedata", "unittest", "urllib", "uuid",
    "warnings", "weakref", "xml", "zipfile", "zlib", "zoneinfo",
];

/// Import extraction for `.py` and `.pyi`
pub struct PythonExtractor;

fn is_stdlib(module: &str) -> bool {
    let top = module.split('.').next().unwrap_or(module);
    STDLIB_MODULES.contains(&top)
}

impl ImportExtractor for PythonExtractor {
    fn extract(&self, content: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();

        for caps in FROM_IMPORT.captures_iter(content) {
            let (Some(module), Some(names)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let module_str = module.as_str();
            if module_str.is_empty() {
                continue;
            }
            if module_str.chars().all(|c| c == '.') {
                // `from . import a, b` names sibling modules
                for name in names.as_str().split(',') {
                    let name = name.split_whitespace().next().unwrap_or("");
                    if !name.is_empty() && name != "*" {
                        found.push((module.start(), format!("{module_str}{name}")));
                    }
                }
            } else {
                found.push((module.start(), module_str.to_string()));
            }
        }

        for caps in PLAIN_IMPORT.captures_iter(content) {
            let Some(list) = caps.get(1) else {
                continue;
            };
            for entry in list.as_str().split(',') {
                if let Some(module) = entry.split_whitespace().next() {
                    found.push((list.start(), module.to_string()));
                }
            }
        }

        found.sort_by_key(|(offset, _)| *offset);
        found
            .into_iter()
            .map(|(_, module)| module)
            .filter(|module| module.starts_with('.') || !is_stdlib(module))
            .collect()
    }

    fn resolve(&self, source: &Path, specifier: &str, root: Option<&Path>) -> Option<PathBuf> {
        let dots = specifier.chars().take_while(|c| *c == '.').count();
        let module = &specifier[dots..];
        let relative: PathBuf = module.split('.').filter(|s| !s.is_empty()).collect();
        let dir = source.parent()?;

        if dots > 0 {
            let mut base = dir.to_path_buf();
            for _ in 1..dots {
                base = base.parent()?.to_path_buf();
            }
            return first_file(module_candidates(&base, &relative));
        }

        ancestors_within(dir, root).find_map(|base| first_file(module_candidates(base, &relative)))
    }
}

fn module_candidates(base: &Path, relative: &Path) -> Vec<PathBuf> {
    if relative.as_os_str().is_empty() {
        return vec![base.join("__init__.py")];
    }
    let target = base.join(relative);
    let mut as_file = target.clone().into_os_string();
    as_file.push(".py");
    vec![
        PathBuf::from(as_file),
        target.join("__init__.py"),
    ]
}
