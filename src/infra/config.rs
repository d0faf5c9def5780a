//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument (parsed by clap in main)
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::notification::MessageTemplate;
use crate::domain::types::Region;
use anyhow::Context;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,
    #[serde(default = "default_relay_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_relay_url() -> String {
    "https://exp.host/--/api/v2/push/send".to_string()
}

fn default_relay_timeout_ms() -> u64 {
    10_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { url: default_relay_url(), timeout_ms: default_relay_timeout_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_retry_cap_ms() -> u64 {
    30_000
}

fn default_retry_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: default_retry_base_ms(),
            cap_ms: default_retry_cap_ms(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_debounce_window_ms")]
    pub window_ms: u64,
}

fn default_debounce_window_ms() -> u64 {
    5_000
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { window_ms: default_debounce_window_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_sound")]
    pub sound: String,
    /// `{region}` is replaced with the region identifier
    #[serde(default = "default_title_template")]
    pub title_template: String,
    #[serde(default = "default_body_template")]
    pub body_template: String,
    /// Static fields merged into the opaque `data` blob
    #[serde(default)]
    pub data: Map<String, Value>,
}

fn default_sound() -> String {
    "default".to_string()
}

fn default_title_template() -> String {
    MessageTemplate::default().title
}

fn default_body_template() -> String {
    MessageTemplate::default().body
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            sound: default_sound(),
            title_template: default_title_template(),
            body_template: default_body_template(),
            data: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TokenConfig {
    /// Token to seed the store with at startup
    #[serde(default)]
    pub initial: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    /// HTTP API port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_http_bind_address(), port: default_http_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "geofence/events".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
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

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique deployment identifier, used as a metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "geofence".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Omitted entirely → the built-in regions
    #[serde(default = "Config::default_regions")]
    pub regions: Vec<Region>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    relay_url: String,
    relay_timeout_ms: u64,
    retry_base_ms: u64,
    retry_cap_ms: u64,
    retry_max_attempts: u32,
    debounce_window_ms: u64,
    message_template: MessageTemplate,
    initial_token: Option<String>,
    http_bind_address: String,
    http_port: u16,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    metrics_interval_secs: u64,
    regions: Vec<Region>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            relay_url: default_relay_url(),
            relay_timeout_ms: default_relay_timeout_ms(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            debounce_window_ms: default_debounce_window_ms(),
            message_template: MessageTemplate::default(),
            initial_token: None,
            http_bind_address: default_http_bind_address(),
            http_port: default_http_port(),
            mqtt_enabled: false,
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_topic: default_mqtt_topic(),
            mqtt_username: None,
            mqtt_password: None,
            metrics_interval_secs: default_metrics_interval(),
            regions: Self::default_regions(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    fn default_regions() -> Vec<Region> {
        vec![
            Region::new("Iglesia Catolica Corazon de Maria", 15.5491, -88.0006, 100.0)
                .with_notify(true, false),
            Region::new("Iglesia GERIZIM", 15.5474, -88.0003, 100.0).with_notify(true, false),
        ]
    }

    /// Config file path when `--config` is not given: CONFIG_FILE, else the dev file
    pub fn resolve_config_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config/dev.toml".to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        anyhow::ensure!(
            toml_config.retry.max_attempts > 0,
            "retry.max_attempts must be at least 1 in {}",
            path.display()
        );

        let notification = toml_config.notification;
        let message_template = MessageTemplate {
            sound: notification.sound,
            title: notification.title_template,
            body: notification.body_template,
            data: notification.data,
        };

        Ok(Self {
            site_id: toml_config.site.id,
            relay_url: toml_config.relay.url,
            relay_timeout_ms: toml_config.relay.timeout_ms,
            retry_base_ms: toml_config.retry.base_ms,
            retry_cap_ms: toml_config.retry.cap_ms,
            retry_max_attempts: toml_config.retry.max_attempts,
            debounce_window_ms: toml_config.debounce.window_ms,
            message_template,
            initial_token: toml_config.token.initial.filter(|t| !t.trim().is_empty()),
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            regions: toml_config.regions,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    pub fn relay_timeout_ms(&self) -> u64 {
        self.relay_timeout_ms
    }

    pub fn retry_base_ms(&self) -> u64 {
        self.retry_base_ms
    }

    pub fn retry_cap_ms(&self) -> u64 {
        self.retry_cap_ms
    }

    pub fn retry_max_attempts(&self) -> u32 {
        self.retry_max_attempts
    }

    pub fn debounce_window_ms(&self) -> u64 {
        self.debounce_window_ms
    }

    pub fn message_template(&self) -> &MessageTemplate {
        &self.message_template
    }

    pub fn initial_token(&self) -> Option<&str> {
        self.initial_token.as_deref()
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
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

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
