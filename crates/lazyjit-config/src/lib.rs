//! Configuration system for lazyjit.
//!
//! Load engine configuration from TOML or YAML files to control code
//! generation, partitioning and symbol resolution without code changes.
//!
//! # Examples
//!
//! Load configuration from TOML string:
//!
//! ```
//! use lazyjit_config::{JitConfig, OptLevel, PartitionPolicy};
//!
//! let config = JitConfig::from_toml_str(r#"
//!     opt_level = "speed"
//!     partition_policy = "strongly_connected"
//!     entry_point = "start"
//! "#).unwrap();
//!
//! assert_eq!(config.opt_level, OptLevel::Speed);
//! assert_eq!(config.partition_policy, PartitionPolicy::StronglyConnected);
//! assert_eq!(config.entry_point, "start");
//! ```
//!
//! Use default config when file is missing:
//!
//! ```
//! use lazyjit_config::JitConfig;
//!
//! let config = JitConfig::load("lazyjit.toml").unwrap_or_default();
//! assert_eq!(config.entry_point, "main");
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct JitConfig {
    /// Code generator optimization level.
    pub opt_level: OptLevel,

    /// Run the IR verifier on every function before emission.
    pub verify_ir: bool,

    /// How units are split into lazily compiled partitions.
    pub partition_policy: PartitionPolicy,

    /// Consult the host process symbol table as the last resolution tier.
    pub host_symbols: bool,

    /// Logical name of the program entry point used by `run_main`.
    pub entry_point: String,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            verify_ir: true,
            partition_policy: PartitionPolicy::default(),
            host_symbols: true,
            entry_point: "main".to_string(),
        }
    }
}

impl JitConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file doesn't exist or contains invalid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)
    }

    /// Loads configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entry_point.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "entry_point must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn with_partition_policy(mut self, policy: PartitionPolicy) -> Self {
        self.partition_policy = policy;
        self
    }

    pub fn with_verify_ir(mut self, verify: bool) -> Self {
        self.verify_ir = verify;
        self
    }

    pub fn with_host_symbols(mut self, enabled: bool) -> Self {
        self.host_symbols = enabled;
        self
    }

    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = name.into();
        self
    }
}

/// Code generator optimization level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimization; fastest compile.
    #[default]
    None,

    /// Optimize for run time.
    Speed,

    /// Optimize for run time and code size.
    SpeedAndSize,
}

impl OptLevel {
    /// The value of the code generator's `opt_level` setting.
    pub fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// How a unit's functions are grouped into lazily compiled partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// One partition per function.
    #[default]
    PerFunction,

    /// Mutually recursive functions share a partition.
    StronglyConnected,

    /// The whole unit compiles as one partition on first call.
    WholeModule,
}
