//! Host configuration.
//!
//! [`HostConfig`] carries the names a host uses to find guest exports and to
//! register imports, and which allocation protocol to expect. It can be built
//! in code or, with the `config` feature, loaded from TOML:
//!
//! ```toml
//! memory_export = "memory"
//! import_module = "env"
//! allocator = "malloc"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::fmt;

#[cfg(feature = "config")]
use serde::Deserialize;

/// Which guest allocation protocol to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "kebab-case"))]
pub enum AllocatorProtocol {
    /// Probe the guest's exports in priority order.
    #[default]
    Auto,
    /// `cabi_realloc`, which doubles as allocate and free.
    CabiRealloc,
    /// `canonical_abi_realloc`, optionally paired with `canonical_abi_free`.
    CanonicalAbiRealloc,
    /// Classic `malloc` / `free`.
    Malloc,
}

impl fmt::Display for AllocatorProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocatorProtocol::Auto => "auto",
            AllocatorProtocol::CabiRealloc => "cabi-realloc",
            AllocatorProtocol::CanonicalAbiRealloc => "canonical-abi-realloc",
            AllocatorProtocol::Malloc => "malloc",
        })
    }
}

/// Output format for the CLI's log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "lowercase"))]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Log subscriber settings. Only the CLI reads these; library consumers
/// install their own subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"wit_bridge=debug"`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Settings shared by [`Exporter`](crate::wasm::Exporter) and
/// [`GuestInstance`](crate::wasm::GuestInstance).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct HostConfig {
    /// Name of the guest's exported linear memory.
    pub memory_export: String,
    /// Module name host functions are registered under.
    pub import_module: String,
    pub allocator: AllocatorProtocol,
    pub logging: LoggingConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            memory_export: "memory".to_string(),
            import_module: "$root".to_string(),
            allocator: AllocatorProtocol::Auto,
            logging: LoggingConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_export(mut self, name: impl Into<String>) -> Self {
        self.memory_export = name.into();
        self
    }

    pub fn with_import_module(mut self, name: impl Into<String>) -> Self {
        self.import_module = name.into();
        self
    }

    pub fn with_allocator(mut self, protocol: AllocatorProtocol) -> Self {
        self.allocator = protocol;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

#[cfg(feature = "config")]
impl HostConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        content.parse()
    }
}

/// Parse configuration from a TOML string.
#[cfg(feature = "config")]
impl std::str::FromStr for HostConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }
}

/// Configuration error.
#[cfg(feature = "config")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("Failed to read config file '{0}': {1}")]
    Io(String, #[source] std::io::Error),
    /// TOML parse error.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
