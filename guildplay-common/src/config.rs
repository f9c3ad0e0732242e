//! Configuration loading
//!
//! Bootstrap configuration is read from a TOML file. Every field carries a
//! built-in default, so a missing file or a partial file still yields a
//! complete configuration.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments / environment variables (applied by the binary)
//! 2. TOML configuration file
//! 3. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default transport readiness deadline
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Default inactivity delay before a session tears itself down (3 minutes)
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 3 * 60 * 1000;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// How long `join` waits for the transport to become ready
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Inactivity delay before an idle session is destroyed
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Directory the console front end writes audio into
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// External extractor process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Extractor executable (looked up on PATH when relative)
    #[serde(default = "default_extractor_binary")]
    pub binary: PathBuf,

    /// Format selector passed to the extractor
    #[serde(default = "default_extractor_format")]
    pub format: String,

    /// Delay before probing the extractor's output
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    /// Number of leading bytes sniffed to detect the container
    #[serde(default = "default_probe_bytes")]
    pub probe_bytes: usize,

    /// Upper bound on waiting for the first bytes of a stream
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Netscape-format cookies file forwarded to the extractor
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
}

/// Provider chain composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Providers in the order they are attempted
    #[serde(default = "default_provider_order")]
    pub order: Vec<ProviderKind>,
}

/// Stream providers known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Companion extractor subprocess
    Extractor,
    /// Primary in-process streaming library
    Primary,
    /// Secondary in-process streaming library
    Secondary,
    /// Direct catalog client
    Catalog,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Extractor => write!(f, "extractor"),
            ProviderKind::Primary => write!(f, "primary"),
            ProviderKind::Secondary => write!(f, "secondary"),
            ProviderKind::Catalog => write!(f, "catalog"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

fn default_extractor_binary() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_extractor_format() -> String {
    "bestaudio[ext=webm][acodec=opus]/bestaudio/best".to_string()
}

fn default_grace_ms() -> u64 {
    500
}

fn default_probe_bytes() -> usize {
    4096
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_provider_order() -> Vec<ProviderKind> {
    vec![
        ProviderKind::Extractor,
        ProviderKind::Primary,
        ProviderKind::Secondary,
        ProviderKind::Catalog,
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            output_dir: None,
            extractor: ExtractorConfig::default(),
            providers: ProvidersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: default_extractor_binary(),
            format: default_extractor_format(),
            grace_ms: default_grace_ms(),
            probe_bytes: default_probe_bytes(),
            probe_timeout_ms: default_probe_timeout_ms(),
            cookies_file: None,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: default_provider_order(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ExtractorConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl TomlConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!("Parsed configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to built-in defaults
    ///
    /// A missing file is not an error: defaults are used and the returned
    /// `ConfigSource` says so, leaving the caller to report it once logging
    /// is up. A file that exists but does not parse or validate is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => path,
            None => return Ok((Self::default(), ConfigSource::NoConfigDir)),
        };

        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Missing(path)));
        }

        let config = Self::load(&path)?;
        Ok((config, ConfigSource::File(path)))
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config("connect_timeout_ms must be greater than 0".to_string()));
        }
        if self.idle_timeout_ms == 0 {
            return Err(Error::Config("idle_timeout_ms must be greater than 0".to_string()));
        }
        if self.extractor.probe_bytes == 0 {
            return Err(Error::Config("extractor.probe_bytes must be greater than 0".to_string()));
        }
        if self.providers.order.is_empty() {
            return Err(Error::Config("providers.order must name at least one provider".to_string()));
        }
        for (index, kind) in self.providers.order.iter().enumerate() {
            if self.providers.order[..index].contains(kind) {
                return Err(Error::Config(format!("provider {} listed more than once", kind)));
            }
        }
        Ok(())
    }
}

/// Where `TomlConfig::load_or_default` found its values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// No file at this path; built-in defaults
    Missing(PathBuf),
    /// The platform has no config directory; built-in defaults
    NoConfigDir,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Missing(path) => write!(f, "built-in defaults ({} not found)", path.display()),
            ConfigSource::NoConfigDir => write!(f, "built-in defaults (no config directory)"),
        }
    }
}

/// Default configuration file path for the platform
///
/// `~/.config/guildplay/config.toml` on Linux, the platform config directory elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("guildplay").join("config.toml"))
}
