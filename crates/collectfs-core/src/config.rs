//! Configuration module for collectfs.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! Command-line flags are layered on top through [`ConfigBuilder`].

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for collectfs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source directories in ascending priority order.
    pub sources: Vec<PathBuf>,
    /// Destination directory holding the merged view.
    pub target: Option<PathBuf>,
    /// Keep the merged view live instead of merging once and exiting.
    pub watch: bool,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Live synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of worker queues events are sharded across by path.
    pub shards: usize,
    /// Capacity of the channel between the watchers and the dispatcher.
    pub channel_capacity: usize,
    /// Feed every pre-existing source file to the overlay at startup.
    pub initial_scan: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/collectfs/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("collectfs")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            channel_capacity: 1024,
            initial_scan: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.shards"`.
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

/// Lexically normalise a path (drop `.`, fold `..`) without touching disk.
fn lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Absolute form of `path` with symlinks resolved as far as it exists.
///
/// A relative path is taken against the current directory. Components below
/// the deepest existing ancestor are appended as written, so a target that
/// has not been created yet still resolves.
pub fn resolve_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        lexical(path)
    } else {
        lexical(&std::env::current_dir()?.join(path))
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        match std::fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for name in missing.iter().rev() {
                    resolved.push(name);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Ok(absolute.clone()),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

impl Config {
    /// Replace every source and the target with its [`resolve_path`] form.
    ///
    /// Run this before [`validate`](Self::validate): the nesting check
    /// compares paths component by component and only sees through
    /// relative paths and symlinks once they are resolved.
    pub fn resolve_paths(mut self) -> std::io::Result<Self> {
        self.sources = self
            .sources
            .iter()
            .map(|source| resolve_path(source))
            .collect::<std::io::Result<_>>()?;
        if let Some(target) = &self.target {
            self.target = Some(resolve_path(target)?);
        }
        Ok(self)
    }

    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sources / target ---
        if self.sources.is_empty() {
            errors.push(ValidationError {
                field: "sources".into(),
                message: "at least one source directory is required".into(),
            });
        }

        match &self.target {
            None => errors.push(ValidationError {
                field: "target".into(),
                message: "a target directory is required".into(),
            }),
            Some(target) => {
                let target = lexical(target);
                for source in &self.sources {
                    if target.starts_with(lexical(source)) {
                        errors.push(ValidationError {
                            field: "target".into(),
                            message: format!(
                                "target {} must not be inside source {}",
                                target.display(),
                                source.display()
                            ),
                        });
                    }
                }
            }
        }

        // --- sync ---
        if self.sync.shards == 0 {
            errors.push(ValidationError {
                field: "sync.shards".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.channel_capacity == 0 {
            errors.push(ValidationError {
                field: "sync.channel_capacity".into(),
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

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] (or an existing config) and allows
/// selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use collectfs_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sources(vec![PathBuf::from("/srv/base"), PathBuf::from("/srv/overrides")])
///     .target(PathBuf::from("/srv/merged"))
///     .watch(true)
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

    /// Start from an existing configuration, typically one loaded from disk.
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.config.sources = sources;
        self
    }

    pub fn target(mut self, target: PathBuf) -> Self {
        self.config.target = Some(target);
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.config.watch = watch;
        self
    }

    pub fn sync_shards(mut self, shards: usize) -> Self {
        self.config.sync.shards = shards;
        self
    }

    pub fn sync_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.sync.channel_capacity = capacity;
        self
    }

    pub fn sync_initial_scan(mut self, enabled: bool) -> Self {
        self.config.sync.initial_scan = enabled;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the final [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
