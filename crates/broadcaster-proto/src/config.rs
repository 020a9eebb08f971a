use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub guide: GuideConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Key-value preferences (server address, last channel).
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

/// Local control API used by remotes and on-screen UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_resource_timeout_secs")]
    pub resource_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_overlay_hide_ms")]
    pub overlay_hide_ms: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideConfig {
    #[serde(default = "default_pixels_per_minute")]
    pub pixels_per_minute: f64,
    #[serde(default = "default_row_height")]
    pub row_height: f64,
    #[serde(default = "default_channel_column_width")]
    pub channel_column_width: f64,
    #[serde(default = "default_clock_tick_ms")]
    pub clock_tick_ms: u64,
    /// How far left of the now line the guide opens.
    #[serde(default = "default_scroll_lead")]
    pub scroll_lead: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_fullscreen")]
    pub fullscreen: bool,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            resource_timeout_secs: default_resource_timeout_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
            overlay_hide_ms: default_overlay_hide_ms(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            pixels_per_minute: default_pixels_per_minute(),
            row_height: default_row_height(),
            channel_column_width: default_channel_column_width(),
            clock_tick_ms: default_clock_tick_ms(),
            scroll_lead: default_scroll_lead(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            fullscreen: default_fullscreen(),
            volume: default_volume(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_resource_timeout_secs() -> u64 {
    30
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_overlay_hide_ms() -> u64 {
    2000
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_pixels_per_minute() -> f64 {
    10.0
}

fn default_row_height() -> f64 {
    90.0
}

fn default_channel_column_width() -> f64 {
    200.0
}

fn default_clock_tick_ms() -> u64 {
    1000
}

fn default_scroll_lead() -> f64 {
    400.0
}

fn default_fullscreen() -> bool {
    true
}

fn default_volume() -> f32 {
    0.8
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
