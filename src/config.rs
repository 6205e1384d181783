//! Configuration file support
//!
//! ```toml
//! [invoke]
//! convention = "sysv-amd64"
//! spill = "stack"
//!
//! [loader]
//! default_mode = ["lazy", "global"]
//! search_paths = ["/opt/vendor/lib"]
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! spans = false
//! ```

use crate::interop::ConventionDescriptor;
use crate::logging::{self, LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up by `Config::discover`
pub const CONFIG_FILE_NAME: &str = ".crosscall.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub invoke: InvokeConfig,

    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeConfig {
    /// Calling convention descriptor name
    #[serde(default = "default_convention")]
    pub convention: String,

    #[serde(default)]
    pub spill: SpillMode,
}

/// Handling of arguments beyond a register class's capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpillMode {
    #[default]
    Stack,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Mode used by `Image::open_default`
    #[serde(default = "default_mode")]
    pub default_mode: Vec<ModeFlag>,

    /// Directories searched for bare library names before the system
    /// search path
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

/// Mode flag names accepted in `[loader] default_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeFlag {
    Lazy,
    Now,
    Local,
    Global,
    NoLoad,
    NoDelete,
    LookupFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub spans: bool,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            convention: default_convention(),
            spill: SpillMode::Stack,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            search_paths: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::Compact,
            file: None,
            spans: false,
        }
    }
}

fn default_convention() -> String {
    ConventionDescriptor::host().name.to_string()
}

fn default_mode() -> Vec<ModeFlag> {
    vec![ModeFlag::Lazy, ModeFlag::Global]
}

fn default_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// Logging setup described by this section. Unknown level names fall
    /// back to `info`.
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: logging::parse_level(&self.level).unwrap_or(tracing::Level::INFO),
            format: self.format,
            file: self.file.clone(),
            show_spans: self.spans,
            filter: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Find and load `.crosscall.toml` from the current directory or its
    /// parents; defaults if none is found or readable
    pub fn discover() -> Self {
        match std::env::current_dir() {
            Ok(dir) => Self::discover_from(&dir),
            Err(_) => Self::default(),
        }
    }

    /// Like `discover`, starting at `start`
    pub fn discover_from(start: &Path) -> Self {
        let mut current = Some(start);

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.is_file() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }
            current = dir.parent();
        }

        Self::default()
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
    }
}
