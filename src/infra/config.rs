//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every key has a default so a partial (or missing) file still yields a
//! runnable engine.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Smoothing mode for the derived view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMode {
    Ema,
    Window,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier used in metrics labels
    #[serde(default = "default_site_id")]
    pub id: String,
    /// IANA timezone name applied to the process (TZ) at startup; when unset
    /// the inherited environment decides local time
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id(), timezone: None }
    }
}

fn default_site_id() -> String {
    "occupancy".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Count topic filter; the location is the second topic segment
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: default_mqtt_host(), port: default_mqtt_port(), topic: default_mqtt_topic() }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "occupancy/+/count".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Run the embedded broker; disable when pointing at an external one
    #[serde(default = "default_broker_embedded")]
    pub embedded: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            embedded: default_broker_embedded(),
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

fn default_broker_embedded() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSONL journal of raw readings (the persisted source of truth)
    #[serde(default = "default_journal_file")]
    pub journal_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { journal_file: default_journal_file() }
    }
}

fn default_journal_file() -> String {
    "data/readings.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmoothingConfig {
    #[serde(default = "default_smoothing_mode")]
    pub mode: SmoothingMode,
    /// EMA decay factor
    #[serde(default = "default_smoothing_alpha")]
    pub alpha: f64,
    /// Trailing window length in readings
    #[serde(default = "default_smoothing_window")]
    pub window_size: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            mode: default_smoothing_mode(),
            alpha: default_smoothing_alpha(),
            window_size: default_smoothing_window(),
        }
    }
}

fn default_smoothing_mode() -> SmoothingMode {
    SmoothingMode::Ema
}

fn default_smoothing_alpha() -> f64 {
    0.20
}

fn default_smoothing_window() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_statistics_interval")]
    pub interval_secs: u64,
    /// Previous days considered for the ceiling and the time buckets
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// The "max" is not a true max, it sits at this percentile
    #[serde(default = "default_max_percentile")]
    pub max_percentile: f64,
    /// How many times the baseline a count can be with the location still
    /// considered closed
    #[serde(default = "default_closed_threshold")]
    pub closed_threshold: f64,
    /// Average-count bucket size in minutes
    #[serde(default = "default_time_bucket_minutes")]
    pub time_bucket_minutes: u32,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_statistics_interval(),
            lookback_days: default_lookback_days(),
            max_percentile: default_max_percentile(),
            closed_threshold: default_closed_threshold(),
            time_bucket_minutes: default_time_bucket_minutes(),
        }
    }
}

fn default_statistics_interval() -> u64 {
    60
}

fn default_lookback_days() -> i64 {
    45
}

fn default_max_percentile() -> f64 {
    0.99
}

fn default_closed_threshold() -> f64 {
    1.5
}

fn default_time_bucket_minutes() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusSettings {
    /// Trend compares the latest reading to the one this many rows back
    #[serde(default = "default_trend_lookback_rows")]
    pub trend_lookback_rows: usize,
    /// Decimal change ratio separating Steady from Increasing/Decreasing
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            trend_lookback_rows: default_trend_lookback_rows(),
            trend_threshold: default_trend_threshold(),
        }
    }
}

fn default_trend_lookback_rows() -> usize {
    5
}

fn default_trend_threshold() -> f64 {
    0.07
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: default_cache_ttl() }
    }
}

fn default_cache_ttl() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: default_api_port() }
    }
}

fn default_api_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between logged metrics summaries
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub status: StatusSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    timezone: Option<String>,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    broker_embedded: bool,
    broker_bind_address: String,
    broker_port: u16,
    journal_file: String,
    smoothing_mode: SmoothingMode,
    smoothing_alpha: f64,
    smoothing_window: usize,
    statistics_interval_secs: u64,
    lookback_days: i64,
    max_percentile: f64,
    closed_threshold: f64,
    time_bucket_minutes: u32,
    trend_lookback_rows: usize,
    trend_threshold: f64,
    cache_ttl_secs: u64,
    api_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            timezone: toml_config.site.timezone,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            broker_embedded: toml_config.broker.embedded,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            journal_file: toml_config.storage.journal_file,
            smoothing_mode: toml_config.smoothing.mode,
            smoothing_alpha: toml_config.smoothing.alpha,
            smoothing_window: toml_config.smoothing.window_size.max(1),
            statistics_interval_secs: toml_config.statistics.interval_secs.max(1),
            lookback_days: toml_config.statistics.lookback_days.max(1),
            max_percentile: toml_config.statistics.max_percentile,
            closed_threshold: toml_config.statistics.closed_threshold,
            time_bucket_minutes: toml_config.statistics.time_bucket_minutes.max(1),
            trend_lookback_rows: toml_config.status.trend_lookback_rows,
            trend_threshold: toml_config.status.trend_threshold,
            cache_ttl_secs: toml_config.cache.ttl_secs,
            api_port: toml_config.api.port,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn broker_embedded(&self) -> bool {
        self.broker_embedded
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn journal_file(&self) -> &str {
        &self.journal_file
    }

    pub fn smoothing_mode(&self) -> SmoothingMode {
        self.smoothing_mode
    }

    pub fn smoothing_alpha(&self) -> f64 {
        self.smoothing_alpha
    }

    pub fn smoothing_window(&self) -> usize {
        self.smoothing_window
    }

    pub fn statistics_interval_secs(&self) -> u64 {
        self.statistics_interval_secs
    }

    pub fn lookback_days(&self) -> i64 {
        self.lookback_days
    }

    pub fn max_percentile(&self) -> f64 {
        self.max_percentile
    }

    pub fn closed_threshold(&self) -> f64 {
        self.closed_threshold
    }

    pub fn time_bucket_minutes(&self) -> u32 {
        self.time_bucket_minutes
    }

    pub fn trend_lookback_rows(&self) -> usize {
        self.trend_lookback_rows
    }

    pub fn trend_threshold(&self) -> f64 {
        self.trend_threshold
    }

    pub fn cache_ttl_secs(&self) -> u64 {
        self.cache_ttl_secs
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "occupancy");
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.mqtt_topic(), "occupancy/+/count");
        assert_eq!(config.smoothing_mode(), SmoothingMode::Ema);
        assert_eq!(config.smoothing_alpha(), 0.20);
        assert_eq!(config.statistics_interval_secs(), 60);
        assert_eq!(config.lookback_days(), 45);
        assert_eq!(config.max_percentile(), 0.99);
        assert_eq!(config.closed_threshold(), 1.5);
        assert_eq!(config.time_bucket_minutes(), 10);
        assert_eq!(config.trend_lookback_rows(), 5);
        assert_eq!(config.trend_threshold(), 0.07);
        assert_eq!(config.cache_ttl_secs(), 30);
        assert_eq!(config.api_port(), 8080);
        assert!(config.timezone().is_none());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["occupancy-engine".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "occupancy-engine".to_string(),
            "--config".to_string(),
            "config/prod.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["occupancy-engine".to_string(), "--config=config/prod.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_config: TomlConfig =
            toml::from_str("[statistics]\ntime_bucket_minutes = 15\n").unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.time_bucket_minutes(), 15);
        assert_eq!(config.lookback_days(), 45);
        assert_eq!(config.mqtt_host(), "localhost");
    }

    #[test]
    fn test_degenerate_values_are_clamped() {
        let toml_config: TomlConfig = toml::from_str(
            "[smoothing]\nwindow_size = 0\n\n[statistics]\ninterval_secs = 0\ntime_bucket_minutes = 0\n",
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.smoothing_window(), 1);
        assert_eq!(config.statistics_interval_secs(), 1);
        assert_eq!(config.time_bucket_minutes(), 1);
    }
}
