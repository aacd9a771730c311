//! Daemon configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Tick driver and settings file configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Path of the JSON file holding the operator-editable schedule
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    /// Milliseconds between scheduler ticks (default 1000)
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("camera_settings.json")
}

fn default_tick_millis() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            tick_millis: default_tick_millis(),
        }
    }
}

/// Still-image capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    /// Still-capture program invoked as `<program> -o <file> --width W --height H -n`
    #[serde(default = "default_capture_program")]
    pub program: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Directory captured images are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Upper bound on a single capture run
    #[serde(default = "default_capture_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_capture_program() -> String {
    "libcamera-still".to_string()
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_capture_timeout_secs() -> u64 {
    30
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_capture_program(),
            width: default_width(),
            height: default_height(),
            output_dir: default_output_dir(),
            timeout_secs: default_capture_timeout_secs(),
        }
    }
}

/// Discord REST configuration
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscordConfig {
    /// Bot token; usually supplied through `DISCORD_TOKEN` rather than the file
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Upper bound on channel lookup and upload requests
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_delivery_timeout_secs() -> u64 {
    60
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_api_base(),
            timeout_secs: default_delivery_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Local control endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlConfig {
    /// Address the control server listens on
    #[serde(default = "default_control_bind")]
    pub bind: String,
    /// Prefix operator commands start with
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

fn default_control_bind() -> String {
    "127.0.0.1:7879".to_string()
}

fn default_command_prefix() -> String {
    "$".to_string()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: default_control_bind(),
            command_prefix: default_command_prefix(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub schedule: SchedulerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - CAMERA_SETTINGS_PATH -> schedule.settings_path
    /// - CAMERA_TICK_MILLIS -> schedule.tick_millis
    /// - CAPTURE_PROGRAM -> capture.program
    /// - CAPTURE_OUTPUT_DIR -> capture.output_dir
    /// - CAPTURE_TIMEOUT_SECS -> capture.timeout_secs
    /// - DISCORD_TOKEN -> discord.token
    /// - DISCORD_API_BASE -> discord.api_base
    /// - DELIVERY_TIMEOUT_SECS -> discord.timeout_secs
    /// - CONTROL_BIND -> control.bind
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CAMERA_SETTINGS_PATH") {
            if !val.is_empty() {
                self.schedule.settings_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CAMERA_TICK_MILLIS") {
            if let Ok(millis) = val.parse::<u64>() {
                self.schedule.tick_millis = millis;
            }
        }

        if let Ok(val) = env::var("CAPTURE_PROGRAM") {
            if !val.is_empty() {
                self.capture.program = val;
            }
        }

        if let Ok(val) = env::var("CAPTURE_OUTPUT_DIR") {
            if !val.is_empty() {
                self.capture.output_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CAPTURE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.capture.timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("DISCORD_TOKEN") {
            let token = val.trim();
            if !token.is_empty() {
                self.discord.token = Some(token.to_string());
            }
        }

        if let Ok(val) = env::var("DISCORD_API_BASE") {
            if !val.is_empty() {
                self.discord.api_base = val.trim_end_matches('/').to_string();
            }
        }

        if let Ok(val) = env::var("DELIVERY_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.discord.timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("CONTROL_BIND") {
            if !val.is_empty() {
                self.control.bind = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    ///
    /// A missing file is not an error: every section falls back to its defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }
}
