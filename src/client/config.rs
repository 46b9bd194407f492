// Configuration for screeps-cap

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::constants::{
    DEFAULT_MIN_LEVEL, DEFAULT_PIN_DURATION, DEFAULT_RECENT_WINDOW, DEFAULT_ROTATION_INTERVAL,
    DEFAULT_TICK_SECONDS, ACTIVITY_LOG_WINDOW, SCOREBOARD_TOP_N,
};
use crate::core::room::RoomName;
use crate::core::scoreboard::TeamDef;

// =============================================================================
// CONFIGURATION STRUCTURES
// =============================================================================

/// Game server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL, e.g. "https://screeps.com" or "http://localhost:21025"
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Auth token; takes precedence over username/password
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Shard name (empty for unsharded private servers)
    #[serde(default)]
    pub shard: String,
}

fn default_server_url() -> String {
    "http://localhost:21025".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            token: String::new(),
            username: String::new(),
            password: String::new(),
            shard: String::new(),
        }
    }
}

impl ServerSettings {
    pub fn shard(&self) -> Option<&str> {
        (!self.shard.is_empty()).then_some(self.shard.as_str())
    }
}

/// Upstream feed timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    /// Tick duration (seconds) used until the server reports one
    #[serde(default = "default_tick_fallback_seconds")]
    pub tick_fallback_seconds: f32,
    #[serde(default = "default_tick_refresh_secs")]
    pub tick_refresh_secs: u64,
    #[serde(default = "default_map_stats_interval_secs")]
    pub map_stats_interval_secs: u64,
    /// Capacity of the queues between the feed thread and the main loop
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_tick_fallback_seconds() -> f32 {
    DEFAULT_TICK_SECONDS
}
fn default_tick_refresh_secs() -> u64 {
    60
}
fn default_map_stats_interval_secs() -> u64 {
    30
}
fn default_channel_capacity() -> usize {
    256
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            tick_fallback_seconds: default_tick_fallback_seconds(),
            tick_refresh_secs: default_tick_refresh_secs(),
            map_stats_interval_secs: default_map_stats_interval_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Which room-selection policy drives the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Follow recent PvP, then leveled rooms
    #[default]
    Pvp,
    /// Always show `focus_room`
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default)]
    pub mode: PolicyMode,
    /// Room for the fixed policy; also centres the map scan when set
    #[serde(default)]
    pub focus_room: String,
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
    #[serde(default = "default_pin_duration_secs")]
    pub pin_duration_secs: u64,
    /// Ticks a PvP event stays eligible
    #[serde(default = "default_recent_window")]
    pub recent_window: u64,
    #[serde(default = "default_min_level")]
    pub min_level: u32,
    /// Fixed RNG seed for reproducible rotations
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_rotation_interval_secs() -> u64 {
    DEFAULT_ROTATION_INTERVAL.as_secs()
}
fn default_pin_duration_secs() -> u64 {
    DEFAULT_PIN_DURATION.as_secs()
}
fn default_recent_window() -> u64 {
    DEFAULT_RECENT_WINDOW
}
fn default_min_level() -> u32 {
    DEFAULT_MIN_LEVEL
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            mode: PolicyMode::default(),
            focus_room: String::new(),
            rotation_interval_secs: default_rotation_interval_secs(),
            pin_duration_secs: default_pin_duration_secs(),
            recent_window: default_recent_window(),
            min_level: default_min_level(),
            seed: None,
        }
    }
}

impl PolicySettings {
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    pub fn pin_duration(&self) -> Duration {
        Duration::from_secs(self.pin_duration_secs)
    }
}

/// Dashboard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub teams: Vec<TeamDef>,
}

fn default_refresh_interval_secs() -> u64 {
    5
}
fn default_top_n() -> usize {
    SCOREBOARD_TOP_N
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            top_n: default_top_n(),
            teams: Vec::new(),
        }
    }
}

/// Renderer output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderSettings {
    /// JSON-lines file; empty means stdout
    #[serde(default)]
    pub output: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log to stderr
    #[serde(default = "default_console")]
    pub console: bool,
    /// Log file path; empty disables file logging
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_console() -> bool {
    true
}
fn default_log_file() -> String {
    "screeps_cap.log".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            console: default_console(),
            log_file: default_log_file(),
        }
    }
}

impl LoggingSettings {
    pub fn log_file_path(&self) -> Option<PathBuf> {
        (!self.log_file.is_empty()).then(|| PathBuf::from(&self.log_file))
    }
}

/// PvP activity log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogSettings {
    /// CSV path; empty disables the log
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_activity_window")]
    pub window: u64,
}

fn default_activity_window() -> u64 {
    ACTIVITY_LOG_WINDOW
}

impl Default for ActivityLogSettings {
    fn default() -> Self {
        Self {
            path: String::new(),
            window: default_activity_window(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub policy: PolicySettings,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub activity_log: ActivityLogSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    pub const CONFIG_FILENAME: &'static str = "screeps_cap.toml";

    /// Load configuration from `path`, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "[config] Looking for config");

        if !path.exists() {
            debug!("[config] No config found, using defaults");
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), "[config] Loaded config");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.url.starts_with("http://") && !self.server.url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "server.url must be http(s), got '{}'",
                self.server.url
            )));
        }
        let focus = self.focus_room()?;
        if self.policy.mode == PolicyMode::Fixed && focus.is_none() {
            return Err(ConfigError::Invalid(
                "policy.focus_room is required in fixed mode".to_string(),
            ));
        }
        if self.policy.rotation_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "policy.rotation_interval_secs must be positive".to_string(),
            ));
        }
        if self.feed.tick_fallback_seconds.is_nan() || self.feed.tick_fallback_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "feed.tick_fallback_seconds must be positive".to_string(),
            ));
        }
        if self.feed.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "feed.channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed focus room, if configured
    pub fn focus_room(&self) -> Result<Option<RoomName>, ConfigError> {
        if self.policy.focus_room.is_empty() {
            return Ok(None);
        }
        self.policy
            .focus_room
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("policy.focus_room: {}", e)))
    }

    pub fn render_output(&self) -> Option<PathBuf> {
        (!self.render.output.is_empty()).then(|| PathBuf::from(&self.render.output))
    }

    pub fn activity_log_path(&self) -> Option<PathBuf> {
        (!self.activity_log.path.is_empty()).then(|| PathBuf::from(&self.activity_log.path))
    }
}
