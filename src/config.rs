/*!
 * Configuration support for the analytics engine
 *
 * Layers built-in defaults, the user config file and `DIABSTATS_*` environment
 * variables into a single [`AnalyticsConfig`].
 */

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::schema::KeySchema;

/// Environment variable prefix (`DIABSTATS_REDIS_URL`, ...)
pub const ENV_PREFIX: &str = "DIABSTATS";

/// Global configuration for the analytics library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Connection URL of the store
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Bound on establishing a connection (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on every store command (milliseconds)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Keys per SCAN page and members per SADD batch
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Number of threads for parallel operations (None = use all available)
    #[serde(default)]
    pub parallel_threads: Option<usize>,

    /// Fetch independent categories, ranges and groups in parallel
    #[serde(default = "default_true")]
    pub enable_parallel: bool,

    /// Whether to show progress indicators during long operations
    #[serde(default = "default_true")]
    pub enable_progress_bar: bool,

    /// Default tracing filter for the CLI
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Key layout of the store
    #[serde(default)]
    pub keys: KeySchema,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            scan_batch_size: default_scan_batch_size(),
            parallel_threads: None,
            enable_parallel: true,
            enable_progress_bar: true,
            log_level: default_log_level(),
            keys: KeySchema::default(),
        }
    }
}

// Default value functions for serde
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_scan_batch_size() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AnalyticsConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Load configuration from environment variables over the defaults
    ///
    /// Supported environment variables:
    /// - `DIABSTATS_REDIS_URL`: store URL
    /// - `DIABSTATS_CONNECT_TIMEOUT_MS`, `DIABSTATS_COMMAND_TIMEOUT_MS`: milliseconds
    /// - `DIABSTATS_SCAN_BATCH_SIZE`: number
    /// - `DIABSTATS_PARALLEL_THREADS`: number
    /// - `DIABSTATS_ENABLE_PARALLEL`, `DIABSTATS_ENABLE_PROGRESS_BAR`: "true" or "false"
    /// - `DIABSTATS_LOG_LEVEL`: tracing filter
    pub fn from_env() -> crate::Result<Self> {
        Self::layered(None)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| crate::AnalyticsError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                suggestion: Some("Check that the file is valid TOML format".to_string()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::AnalyticsError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                suggestion: None,
            })?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/diabetes-analytics/config.toml` on Linux
    /// or `%APPDATA%\diabetes-analytics\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "diabetes-analytics")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from defaults, a config file, then the environment
    ///
    /// Priority order (highest last):
    /// 1. Built-in defaults
    /// 2. `path`, or the default config file when `path` is `None` (optional)
    /// 3. Environment variables
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(Self::default_config_path);
        Self::layered(file)
    }

    fn layered(file: Option<PathBuf>) -> crate::Result<Self> {
        let defaults = config::Config::try_from(&Self::default()).map_err(config_error)?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(false));
        }
        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.scan_batch_size == 0 {
            return Err(crate::AnalyticsError::Configuration {
                message: "scan_batch_size must be greater than zero".to_string(),
                suggestion: Some("Use a batch size between 100 and 10000".to_string()),
            });
        }
        if self.command_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(crate::AnalyticsError::Configuration {
                message: "store timeouts must be greater than zero".to_string(),
                suggestion: Some("Every store operation needs a bounded timeout".to_string()),
            });
        }
        if self.keys.ephemeral_prefix.is_empty() {
            return Err(crate::AnalyticsError::Configuration {
                message: "keys.ephemeral_prefix must not be empty".to_string(),
                suggestion: Some("The default prefix is \"temp:\"".to_string()),
            });
        }
        Ok(())
    }

    /// Create a configuration optimized for performance
    pub fn performance() -> Self {
        Self {
            scan_batch_size: 5_000,
            parallel_threads: None, // Use all available
            enable_parallel: true,
            enable_progress_bar: false,
            ..Self::default()
        }
    }

    /// Create a configuration optimized for a busy shared store
    pub fn safe() -> Self {
        Self {
            command_timeout_ms: 1_000,
            scan_batch_size: 100,
            parallel_threads: Some(1), // Single-threaded for predictability
            enable_parallel: false,
            ..Self::default()
        }
    }
}

fn config_error(e: config::ConfigError) -> crate::AnalyticsError {
    crate::AnalyticsError::Configuration {
        message: format!("Failed to load configuration: {}", e),
        suggestion: Some(format!(
            "Check the config file and {}_* environment variables",
            ENV_PREFIX
        )),
    }
}

// Global configuration support
use std::sync::RwLock;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Option<AnalyticsConfig>> = RwLock::new(None);
}

/// Set the global configuration
pub fn set_global_config(config: AnalyticsConfig) {
    let mut slot = GLOBAL_CONFIG.write().unwrap_or_else(|e| e.into_inner());
    *slot = Some(config);
}

/// Get the global configuration (or the layered default if not set)
pub fn global_config() -> AnalyticsConfig {
    let current = GLOBAL_CONFIG
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .cloned();
    current.unwrap_or_else(|| AnalyticsConfig::load(None).unwrap_or_default())
}

/// Clear the global configuration
pub fn clear_global_config() {
    let mut slot = GLOBAL_CONFIG.write().unwrap_or_else(|e| e.into_inner());
    *slot = None;
}

/// Builder for customizing configuration
pub struct ConfigBuilder {
    config: AnalyticsConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl From<AnalyticsConfig> for ConfigBuilder {
    /// Start from an existing configuration or preset
    fn from(config: AnalyticsConfig) -> Self {
        Self { config }
    }
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: AnalyticsConfig::default(),
        }
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = url.into();
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.config.command_timeout_ms = ms;
        self
    }

    pub fn scan_batch_size(mut self, size: usize) -> Self {
        self.config.scan_batch_size = size;
        self
    }

    /// Set number of parallel threads
    pub fn parallel_threads(mut self, threads: Option<usize>) -> Self {
        self.config.parallel_threads = threads;
        self
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.config.enable_parallel = enabled;
        self
    }

    /// Set progress bar enabled
    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.config.enable_progress_bar = enabled;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    pub fn keys(mut self, keys: KeySchema) -> Self {
        self.config.keys = keys;
        self
    }

    /// Build the configuration
    pub fn build(self) -> AnalyticsConfig {
        self.config
    }
}
