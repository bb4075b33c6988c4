//! Configuration module for ctxsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for ctxsync.
///
/// Every section is optional in the YAML file; omitted sections and fields
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub tracker: TrackerConfig,
    pub sync: SyncConfig,
    pub context: ContextConfig,
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Which files are tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root directory of the workspace. `~` is expanded at runtime.
    pub root: PathBuf,
    /// Globs a file must match to be tracked.
    pub include_patterns: Vec<String>,
    /// Globs that exclude whole directory trees.
    pub exclude_patterns: Vec<String>,
    /// Whether the root's `.gitignore` is honoured.
    pub respect_gitignore: bool,
}

/// Change detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Quiet period (ms) a path needs before its events are processed.
    pub debounce_ms: u64,
    /// Mtime drift (ms) tolerated before an unchanged hash still counts as a change.
    pub mtime_tolerance_ms: u64,
    /// Files hashed concurrently per batch during the startup scan.
    pub batch_size: usize,
}

/// Upload scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Milliseconds between sync ticks.
    pub interval_ms: u64,
    /// Retries after the initial attempt before a batch is dropped.
    pub max_retries: u32,
    /// Fixed delay (ms) before each retry.
    pub retry_delay_ms: u64,
}

/// Context assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Whether imports of the primary file are followed.
    pub resolve_imports: bool,
    /// How many import hops are followed from the primary file.
    pub max_depth: usize,
}

/// Remote context service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the context service.
    pub endpoint: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Session to sync into. Nothing is uploaded until one is set.
    pub session_id: Option<String>,
    /// Bearer token sent with uploads.
    pub auth_token: Option<String>,
}

/// Local persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding file metadata.
    pub database: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/ctxsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("ctxsync")
            .join("config.yaml")
    }

    /// Absolute, canonical workspace root with `~` expanded.
    pub fn workspace_root(&self) -> anyhow::Result<PathBuf> {
        let root = expand_tilde(&self.workspace.root);
        root.canonicalize()
            .with_context(|| format!("Workspace root not accessible: {}", root.display()))
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_tilde(&self.storage.database)
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Source and text files tracked out of the box.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "**/*.{js,jsx,mjs,cjs,ts,tsx,mts,cts}",
    "**/*.{py,pyi}",
    "**/*.sol",
    "**/*.{c,h,cc,cpp,cxx,hh,hpp,hxx}",
    "**/*.{rs,go,java}",
    "**/*.{json,yaml,yml,toml}",
    "**/*.{md,markdown,txt}",
    "**/*.{html,htm,css,scss,less}",
    "**/*.{sh,bash,zsh}",
];

/// Dependency, build and VCS trees never tracked.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/target/**",
    "**/__pycache__/**",
    "**/.venv/**",
    "**/venv/**",
    "**/coverage/**",
];

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include_patterns: DEFAULT_INCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            respect_gitignore: true,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            mtime_tolerance_ms: 1000,
            batch_size: 50,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            max_retries: 3,
            retry_delay_ms: 5000,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            resolve_imports: true,
            max_depth: 2,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api".to_string(),
            timeout_secs: 30,
            session_id: None,
            auth_token: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("ctxsync");
        Self {
            database: data_dir.join("ctxsync.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.interval_ms"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Upper bound for `context.max_depth`.
const MAX_CONTEXT_DEPTH: usize = 10;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- workspace ---
        let root_str = self.workspace.root.to_string_lossy();
        if !root_str.starts_with('~') && !self.workspace.root.is_dir() {
            errors.push(ValidationError {
                field: "workspace.root".into(),
                message: format!("directory does not exist: {}", self.workspace.root.display()),
            });
        }
        if self.workspace.include_patterns.is_empty() {
            errors.push(ValidationError {
                field: "workspace.include_patterns".into(),
                message: "must contain at least one pattern".into(),
            });
        }

        // --- tracker ---
        if self.tracker.debounce_ms == 0 {
            errors.push(ValidationError {
                field: "tracker.debounce_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.tracker.batch_size == 0 {
            errors.push(ValidationError {
                field: "tracker.batch_size".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- sync ---
        if self.sync.interval_ms == 0 {
            errors.push(ValidationError {
                field: "sync.interval_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.retry_delay_ms == 0 {
            errors.push(ValidationError {
                field: "sync.retry_delay_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- context ---
        if self.context.max_depth > MAX_CONTEXT_DEPTH {
            errors.push(ValidationError {
                field: "context.max_depth".into(),
                message: format!("must be in range 0..={MAX_CONTEXT_DEPTH}"),
            });
        }

        // --- remote ---
        match url::Url::parse(&self.remote.endpoint) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError {
                field: "remote.endpoint".into(),
                message: format!("unsupported scheme '{}'; expected http or https", url.scheme()),
            }),
            Err(e) => errors.push(ValidationError {
                field: "remote.endpoint".into(),
                message: format!("invalid URL '{}': {e}", self.remote.endpoint),
            }),
        }
        if self.remote.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "remote.timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use ctxsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .workspace_root(PathBuf::from("/home/user/project"))
///     .sync_interval_ms(5000)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- workspace ---

    pub fn workspace_root(mut self, root: PathBuf) -> Self {
        self.config.workspace.root = root;
        self
    }

    pub fn include_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.workspace.include_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.workspace.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn respect_gitignore(mut self, respect: bool) -> Self {
        self.config.workspace.respect_gitignore = respect;
        self
    }

    // --- tracker ---

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.tracker.debounce_ms = ms;
        self
    }

    pub fn mtime_tolerance_ms(mut self, ms: u64) -> Self {
        self.config.tracker.mtime_tolerance_ms = ms;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.tracker.batch_size = n;
        self
    }

    // --- sync ---

    pub fn sync_interval_ms(mut self, ms: u64) -> Self {
        self.config.sync.interval_ms = ms;
        self
    }

    pub fn sync_max_retries(mut self, n: u32) -> Self {
        self.config.sync.max_retries = n;
        self
    }

    pub fn sync_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.retry_delay_ms = ms;
        self
    }

    // --- context ---

    pub fn resolve_imports(mut self, resolve: bool) -> Self {
        self.config.context.resolve_imports = resolve;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.context.max_depth = depth;
        self
    }

    // --- remote ---

    pub fn remote_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.remote.endpoint = endpoint.into();
        self
    }

    pub fn remote_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote.timeout_secs = secs;
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.config.remote.session_id = Some(session_id.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.remote.auth_token = Some(token.into());
        self
    }

    // --- storage ---

    pub fn database(mut self, path: PathBuf) -> Self {
        self.config.storage.database = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
