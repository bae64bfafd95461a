use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    pub line: LineConfig,
    pub store: StoreConfig,
    #[serde(default = "default_detector_config")]
    pub detector: DetectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LineConfig {
    /// Channel secret used to verify the x-line-signature header.
    pub channel_secret: String,
    /// Channel access token used for the reply API.
    pub channel_access_token: String,
    #[serde(default = "default_wake_word")]
    pub wake_word: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Supabase project URL, e.g. "https://xyz.supabase.co".
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Thresholds for the duplicate detector. All tunable from config so the
/// shop owner can widen or tighten matching without a rebuild.
#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_amount_tolerance")]
    pub amount_tolerance: f64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_date_window_days")]
    pub date_window_days: i64,
    /// How far back the store is queried for duplicate candidates.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_wake_word() -> String {
    "พอส".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_amount_tolerance() -> f64 {
    10.0
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_date_window_days() -> i64 {
    3
}

fn default_lookback_days() -> i64 {
    30
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_detector_config() -> DetectorConfig {
    DetectorConfig {
        amount_tolerance: default_amount_tolerance(),
        similarity_threshold: default_similarity_threshold(),
        date_window_days: default_date_window_days(),
        lookback_days: default_lookback_days(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.line.channel_secret.is_empty() {
            anyhow::bail!("line.channel_secret must not be empty");
        }
        if config.store.url.is_empty() {
            anyhow::bail!("store.url must not be empty");
        }

        Ok(config)
    }
}
