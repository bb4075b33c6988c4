//! Path filtering: include globs, exclude globs and `.gitignore`
//!
//! A path is tracked only when all three layers agree:
//!
//! 1. it matches at least one include glob (directories are never rejected here),
//! 2. it matches no exclude glob,
//! 3. the workspace root's `.gitignore` does not ignore it.
//!
//! ## Gitignore subset
//!
//! | Rule form     | Matches against                                     |
//! |---------------|-----------------------------------------------------|
//! | `name`        | any single path segment                             |
//! | `a/b`         | any contiguous run of segments                      |
//! | `/name`       | runs starting at the workspace root                 |
//! | `name/`       | only runs that end at a directory                   |
//! | `!rule`       | re-includes; the last matching rule wins            |
//!
//! A run ending before the last segment always ends at a directory, so
//! `node_modules/` ignores everything below any `node_modules` directory.
//! Unlike git, a negated rule can re-include a file under an ignored
//! directory.
//!
//! The parsed rules are cached and reloaded when the file's mtime changes.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tracing::{debug, warn};

use ctxsync_core::config::WorkspaceConfig;

const GITIGNORE: &str = ".gitignore";

/// Child name used to ask "would anything inside this directory be excluded"
const DIR_PROBE: &str = "\u{0}";

/// Errors building a [`PatternFilter`]
#[derive(Debug, Error)]
pub enum FilterError {
    /// A configured include/exclude glob does not parse
    #[error("Invalid glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },
}

// ============================================================================
// Gitignore rules
// ============================================================================

#[derive(Debug)]
struct GitignoreRule {
    matcher: GlobMatcher,
    negated: bool,
    dir_only: bool,
    anchored: bool,
    has_slash: bool,
}

impl GitignoreRule {
    /// Parse one `.gitignore` line. `Ok(None)` for blanks and comments.
    fn parse(line: &str) -> Result<Option<Self>, globset::Error> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (negated, mut pattern) = if let Some(rest) = line.strip_prefix('!') {
            (true, rest)
        } else if let Some(rest) = line.strip_prefix('\\') {
            // `\#` and `\!` escape the first character
            (false, rest)
        } else {
            (false, line)
        };

        let dir_only = pattern.ends_with('/');
        pattern = pattern.trim_end_matches('/');

        let anchored = pattern.starts_with('/');
        pattern = pattern.trim_start_matches('/');

        if pattern.is_empty() {
            return Ok(None);
        }

        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()?
            .compile_matcher();

        Ok(Some(Self {
            matcher,
            negated,
            dir_only,
            anchored,
            has_slash: pattern.contains('/'),
        }))
    }

    /// Whether the rule matches `segments` (relative to the root) or any ancestor
    fn matches(&self, segments: &[&str], is_dir: bool) -> bool {
        let n = segments.len();
        let ends_at_dir = |end: usize| end < n || is_dir;

        let window = |start: usize, end: usize| {
            (ends_at_dir(end) || !self.dir_only)
                && self.matcher.is_match(segments[start..end].join("/"))
        };

        if self.anchored {
            (1..=n).any(|end| window(0, end))
        } else if self.has_slash {
            (0..n).any(|start| (start + 1..=n).any(|end| window(start, end)))
        } else {
            (0..n).any(|start| window(start, start + 1))
        }
    }
}

fn parse_gitignore(content: &str) -> Vec<GitignoreRule> {
    content
        .lines()
        .filter_map(|line| match GitignoreRule::parse(line) {
            Ok(rule) => rule,
            Err(e) => {
                warn!(rule = line, error = %e, "Skipping malformed .gitignore rule");
                None
            }
        })
        .collect()
}

#[derive(Debug, Default)]
struct GitignoreCache {
    loaded: bool,
    mtime: Option<SystemTime>,
    rules: Arc<Vec<GitignoreRule>>,
}

// ============================================================================
// PatternFilter
// ============================================================================

/// Decides which workspace paths are tracked
#[derive(Debug)]
pub struct PatternFilter {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    respect_gitignore: bool,
    gitignore: Mutex<GitignoreCache>,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, FilterError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| FilterError::InvalidGlob {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| FilterError::InvalidGlob {
        pattern: patterns.join(", "),
        reason: e.to_string(),
    })
}

impl PatternFilter {
    /// Build a filter for the workspace at `root`
    ///
    /// # Errors
    /// Returns `FilterError::InvalidGlob` if an include or exclude glob does not parse
    pub fn new(
        root: impl Into<PathBuf>,
        include: &[String],
        exclude: &[String],
        respect_gitignore: bool,
    ) -> Result<Self, FilterError> {
        Ok(Self {
            root: root.into(),
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
            respect_gitignore,
            gitignore: Mutex::new(GitignoreCache::default()),
        })
    }

    /// Build a filter from the `workspace` config section
    pub fn from_config(root: impl Into<PathBuf>, config: &WorkspaceConfig) -> Result<Self, FilterError> {
        Self::new(
            root,
            &config.include_patterns,
            &config.exclude_patterns,
            config.respect_gitignore,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is excluded, checking the filesystem for its kind
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.is_excluded_entry(path, path.is_dir())
    }

    /// Whether `path` is excluded, given whether it is a directory
    ///
    /// Paths outside the workspace root are always excluded, as are names
    /// that are not valid UTF-8; the root itself never is.
    pub fn is_excluded_entry(&self, path: &Path, is_dir: bool) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };

        // Globs only see UTF-8; a name they cannot see is never tracked
        let mut segments: Vec<&str> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => match name.to_str() {
                    Some(name) => segments.push(name),
                    None => return true,
                },
                Component::CurDir => {}
                _ => return true,
            }
        }
        if segments.is_empty() {
            return false;
        }
        let relative_str = segments.join("/");

        if is_dir {
            let probe = format!("{relative_str}/{DIR_PROBE}");
            if self.exclude.is_match(&relative_str) || self.exclude.is_match(&probe) {
                return true;
            }
        } else {
            if self.exclude.is_match(&relative_str) {
                return true;
            }
            if !self.include.is_match(&relative_str) {
                return true;
            }
        }

        self.respect_gitignore && self.is_gitignored(&segments, is_dir)
    }

    fn is_gitignored(&self, segments: &[&str], is_dir: bool) -> bool {
        let rules = self.gitignore_rules();
        let mut ignored = false;
        for rule in rules.iter() {
            if rule.matches(segments, is_dir) {
                ignored = !rule.negated;
            }
        }
        ignored
    }

    /// Current rules, reparsing `.gitignore` when its mtime changed
    fn gitignore_rules(&self) -> Arc<Vec<GitignoreRule>> {
        let path = self.root.join(GITIGNORE);
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        let mut cache = self.gitignore.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.loaded && cache.mtime == mtime {
            return Arc::clone(&cache.rules);
        }

        let rules = match std::fs::read_to_string(&path) {
            Ok(content) => parse_gitignore(&content),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Cannot read .gitignore");
                }
                Vec::new()
            }
        };
        debug!(rules = rules.len(), "Loaded .gitignore");

        cache.loaded = true;
        cache.mtime = mtime;
        cache.rules = Arc::new(rules);
        Arc::clone(&cache.rules)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    fn filter_with(root: &Path, gitignore: &str) -> PatternFilter {
        fs::write(root.join(GITIGNORE), gitignore).unwrap();
        PatternFilter::new(root, &["**/*".to_string()], &[], true).unwrap()
    }

    fn excluded(filter: &PatternFilter, rel: &str) -> bool {
        filter.is_excluded_entry(&filter.root().join(rel), false)
    }

    // -- Gitignore literal cases --

    #[test]
    fn test_dir_rule_excludes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "node_modules/\n");
        assert!(excluded(&filter, "node_modules/pkg/index.js"));
        assert!(excluded(&filter, "packages/a/node_modules/pkg/index.js"));
        assert!(!excluded(&filter, "src/index.js"));
    }

    #[test]
    fn test_dir_rule_does_not_match_file_of_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "logs/\n");
        assert!(!excluded(&filter, "src/logs"));
        assert!(filter.is_excluded_entry(&dir.path().join("src/logs"), true));
    }

    #[test]
    fn test_bare_glob_matches_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "*.log\n");
        assert!(excluded(&filter, "src/app.log"));
        assert!(excluded(&filter, "app.log"));
        assert!(!excluded(&filter, "src/app.ts"));
    }

    #[test]
    fn test_rooted_rule() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "/dist\n");
        assert!(!excluded(&filter, "src/dist/app.js"));
        assert!(excluded(&filter, "dist/app.js"));
    }

    #[test]
    fn test_slash_rule_matches_any_ancestor_run() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "generated/*.ts\n");
        assert!(excluded(&filter, "generated/api.ts"));
        assert!(excluded(&filter, "pkg/generated/api.ts"));
        assert!(!excluded(&filter, "generated/deep/api.ts"));
    }

    #[test]
    fn test_negation_last_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "*.env\n!example.env\n");
        assert!(excluded(&filter, "prod.env"));
        assert!(!excluded(&filter, "example.env"));

        let filter = filter_with(dir.path(), "!example.env\n*.env\n");
        assert!(excluded(&filter, "example.env"));
    }

    #[test]
    fn test_comments_blanks_and_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "# comment\n\n\\#notes.md\n\\!bang.txt\ntrailing.txt   \n");
        assert!(!excluded(&filter, "comment"));
        assert!(excluded(&filter, "#notes.md"));
        assert!(excluded(&filter, "!bang.txt"));
        assert!(excluded(&filter, "trailing.txt"));
    }

    #[test]
    fn test_malformed_rule_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "[unclosed\n*.tmp\n");
        assert!(excluded(&filter, "a.tmp"));
        assert!(!excluded(&filter, "a.ts"));
    }

    #[test]
    fn test_missing_gitignore_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PatternFilter::new(dir.path(), &["**/*".to_string()], &[], true).unwrap();
        assert!(!excluded(&filter, "anything.log"));
    }

    #[test]
    fn test_gitignore_disabled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(GITIGNORE), "*.log\n").unwrap();
        let filter = PatternFilter::new(dir.path(), &["**/*".to_string()], &[], false).unwrap();
        assert!(!excluded(&filter, "app.log"));
    }

    #[test]
    fn test_gitignore_reloaded_when_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_with(dir.path(), "*.log\n");
        assert!(excluded(&filter, "a.log"));
        assert!(!excluded(&filter, "a.tmp"));

        let path = dir.path().join(GITIGNORE);
        fs::write(&path, "*.tmp\n").unwrap();
        let later = SystemTime::now() + Duration::from_secs(10);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(!excluded(&filter, "a.log"));
        assert!(excluded(&filter, "a.tmp"));
    }

    // -- Include / exclude globs --

    #[test]
    fn test_include_and_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PatternFilter::new(
            dir.path(),
            &["**/*.{ts,js}".to_string()],
            &["**/node_modules/**".to_string(), "**/dist/**".to_string()],
            true,
        )
        .unwrap();

        assert!(!excluded(&filter, "src/a.ts"));
        assert!(!excluded(&filter, "a.js"));
        assert!(excluded(&filter, "README.md"));
        assert!(excluded(&filter, "node_modules/x/a.js"));
        assert!(excluded(&filter, "pkg/dist/a.js"));

        // directories: never rejected by includes, pruned by excludes
        assert!(!filter.is_excluded_entry(&dir.path().join("src"), true));
        assert!(filter.is_excluded_entry(&dir.path().join("node_modules"), true));
        assert!(filter.is_excluded_entry(&dir.path().join("pkg/dist"), true));
    }

    #[test]
    fn test_outside_root_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PatternFilter::new(dir.path(), &["**/*".to_string()], &[], true).unwrap();
        assert!(filter.is_excluded_entry(Path::new("/definitely/elsewhere.ts"), false));
        assert!(!filter.is_excluded_entry(dir.path(), true));
        assert!(filter.is_excluded_entry(&dir.path().join("../escape.ts"), false));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_are_excluded() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let filter = PatternFilter::new(dir.path(), &["**/*.ts".to_string()], &[], false).unwrap();
        let name = OsStr::from_bytes(b"\xffimage.png");

        assert!(filter.is_excluded_entry(&dir.path().join(name), false));
        assert!(filter.is_excluded_entry(&dir.path().join(name).join("a.ts"), false));
        assert!(filter.is_excluded_entry(&dir.path().join(name), true));
        assert!(!excluded(&filter, "src/a.ts"));
    }

    #[test]
    fn test_invalid_config_glob_is_error() {
        let result = PatternFilter::new("/ws", &["[bad".to_string()], &[], true);
        assert!(matches!(result, Err(FilterError::InvalidGlob { .. })));
    }

    #[test]
    fn test_from_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PatternFilter::from_config(dir.path(), &WorkspaceConfig::default()).unwrap();
        assert!(!excluded(&filter, "src/main.ts"));
        assert!(!excluded(&filter, "lib/util.py"));
        assert!(excluded(&filter, "node_modules/react/index.js"));
        assert!(excluded(&filter, "image.png"));
    }

    #[test]
    fn test_is_excluded_checks_kind_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build")).unwrap();
        let filter = filter_with(dir.path(), "build/\n");
        assert!(filter.is_excluded(&dir.path().join("build")));
    }
}
