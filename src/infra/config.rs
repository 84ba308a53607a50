//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier (e.g. "campus-north")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "lastmile".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: default_api_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Stations further out than this many minutes are not candidates
    #[serde(default = "default_eta_window")]
    pub eta_window_minutes: i64,
    /// Riders arriving up to this long after the driver still qualify
    #[serde(default = "default_pickup_grace")]
    pub pickup_grace_minutes: i64,
    /// Intents older than this are evicted unclaimed
    #[serde(default = "default_intent_ttl")]
    pub intent_ttl_minutes: i64,
    /// A station's whole intent set expires after this much inactivity
    #[serde(default = "default_station_idle")]
    pub station_idle_minutes: u64,
}

fn default_eta_window() -> i64 {
    10
}

fn default_pickup_grace() -> i64 {
    5
}

fn default_intent_ttl() -> i64 {
    30
}

fn default_station_idle() -> u64 {
    60
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            eta_window_minutes: default_eta_window(),
            pickup_grace_minutes: default_pickup_grace(),
            intent_ttl_minutes: default_intent_ttl(),
            station_idle_minutes: default_station_idle(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Route plan cache entries are fresh for this long
    #[serde(default = "default_route_ttl")]
    pub route_ttl_minutes: u64,
}

fn default_route_ttl() -> u64 {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { route_ttl_minutes: default_route_ttl() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebounceConfig {
    /// A driver/station pair retriggers after this long even without an
    /// ETA improvement
    #[serde(default = "default_trigger_refresh")]
    pub refresh_minutes: i64,
}

fn default_trigger_refresh() -> i64 {
    2
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { refresh_minutes: default_trigger_refresh() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    /// Per-driver telemetry lane capacity
    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_capacity: usize,
    /// Per-subscriber event buffer
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_telemetry_capacity() -> usize {
    256
}

fn default_subscriber_buffer() -> usize {
    64
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            telemetry_capacity: default_telemetry_capacity(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

/// Area seeded into the topology at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AreaSeed {
    pub area_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_station: bool,
}

/// Travel edge seeded into the topology at startup
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeSeed {
    pub from_area_id: String,
    pub to_area_id: String,
    #[serde(default = "default_travel_minutes")]
    pub travel_minutes: u32,
}

fn default_travel_minutes() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TopologyConfig {
    #[serde(default)]
    pub areas: Vec<AreaSeed>,
    #[serde(default)]
    pub edges: Vec<EdgeSeed>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    api_port: u16,
    eta_window_minutes: i64,
    pickup_grace_minutes: i64,
    intent_ttl_minutes: i64,
    station_idle_minutes: u64,
    route_ttl_minutes: u64,
    trigger_refresh_minutes: i64,
    telemetry_capacity: usize,
    subscriber_buffer: usize,
    metrics_interval_secs: u64,
    areas: Vec<AreaSeed>,
    edges: Vec<EdgeSeed>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            api_port: toml_config.api.port,
            eta_window_minutes: toml_config.matching.eta_window_minutes,
            pickup_grace_minutes: toml_config.matching.pickup_grace_minutes,
            intent_ttl_minutes: toml_config.matching.intent_ttl_minutes,
            station_idle_minutes: toml_config.matching.station_idle_minutes,
            route_ttl_minutes: toml_config.cache.route_ttl_minutes,
            trigger_refresh_minutes: toml_config.debounce.refresh_minutes,
            telemetry_capacity: toml_config.channels.telemetry_capacity,
            subscriber_buffer: toml_config.channels.subscriber_buffer,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            areas: toml_config.topology.areas,
            edges: toml_config.topology.edges,
            config_file: source.to_string(),
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

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn eta_window_minutes(&self) -> i64 {
        self.eta_window_minutes
    }

    pub fn pickup_grace_minutes(&self) -> i64 {
        self.pickup_grace_minutes
    }

    pub fn intent_ttl_minutes(&self) -> i64 {
        self.intent_ttl_minutes
    }

    pub fn station_idle_minutes(&self) -> u64 {
        self.station_idle_minutes
    }

    pub fn route_ttl_minutes(&self) -> u64 {
        self.route_ttl_minutes
    }

    pub fn trigger_refresh_minutes(&self) -> i64 {
        self.trigger_refresh_minutes
    }

    pub fn telemetry_capacity(&self) -> usize {
        self.telemetry_capacity
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn areas(&self) -> &[AreaSeed] {
        &self.areas
    }

    pub fn edges(&self) -> &[EdgeSeed] {
        &self.edges
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
        assert_eq!(config.site_id(), "lastmile");
        assert_eq!(config.api_port(), 8080);
        assert_eq!(config.eta_window_minutes(), 10);
        assert_eq!(config.pickup_grace_minutes(), 5);
        assert_eq!(config.intent_ttl_minutes(), 30);
        assert_eq!(config.station_idle_minutes(), 60);
        assert_eq!(config.route_ttl_minutes(), 5);
        assert_eq!(config.trigger_refresh_minutes(), 2);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["lastmile-gateway".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "lastmile-gateway".to_string(),
            "--config".to_string(),
            "config/campus.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/campus.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["lastmile-gateway".to_string(), "--config=config/prod.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }
}
