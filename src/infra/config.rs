//! Configuration loading from TOML files
//!
//! The file is selected with `--config <path>` (default `config/dev.toml`).
//! A missing or unreadable file falls back to built-in defaults.
//!
//! Broker and database credentials can be overridden from the environment
//! (`BOOTSTRAP_SERVERS`, `DATABASE_IP`, ...), see [`Config::apply_env_with`].
//! A `.env` file in the working directory fills in keys the process
//! environment leaves unset.

use crate::services::classifier::DispatchPolicy;
use crate::services::ingest::Schedule;
use crate::services::validator::{ClockTime, OperatingHours, ValidationRules};
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Dotenv file read by [`Config::apply_env`]
pub const DOTENV_FILE: &str = ".env";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Kafka,
    Mqtt,
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerKind::Kafka => "kafka",
            BrokerKind::Mqtt => "mqtt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_kind")]
    pub kind: BrokerKind,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_broker_kind() -> BrokerKind {
    BrokerKind::Kafka
}

fn default_topic() -> String {
    "lmnh".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { kind: default_broker_kind(), topic: default_topic() }
    }
}

/// Kafka client settings, passed to librdkafka unmodified
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    #[serde(default)]
    pub security_protocol: Option<String>,
    #[serde(default)]
    pub sasl_mechanism: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default)]
    pub auto_offset_reset: Option<String>,
    /// Extra librdkafka properties (e.g. "session.timeout.ms" = "45000")
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_group_id() -> String {
    "museum-ingest".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            security_protocol: None,
            sasl_mechanism: None,
            username: None,
            password: None,
            group_id: default_group_id(),
            auto_offset_reset: None,
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
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

fn default_mqtt_client_id() -> String {
    "museum-ingest".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_db_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "museum".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_connect_timeout() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: None,
            connect_timeout_secs: default_db_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Pause after each dispatched record
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default)]
    pub call_rating: DispatchPolicy,
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_idle_backoff_ms() -> u64 {
    1000
}

fn default_throttle_ms() -> u64 {
    2000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            idle_backoff_ms: default_idle_backoff_ms(),
            throttle_ms: default_throttle_ms(),
            call_rating: DispatchPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_opens_at")]
    pub opens_at: String,
    #[serde(default = "default_closes_at")]
    pub closes_at: String,
    #[serde(default)]
    pub require_call_type: bool,
}

fn default_opens_at() -> String {
    OperatingHours::DEFAULT_OPENS.to_string()
}

fn default_closes_at() -> String {
    OperatingHours::DEFAULT_CLOSES.to_string()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            opens_at: default_opens_at(),
            closes_at: default_closes_at(),
            require_call_type: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: 0 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    broker_kind: BrokerKind,
    topic: String,
    kafka: KafkaConfig,
    mqtt: MqttConfig,
    database: DatabaseConfig,
    poll_timeout_ms: u64,
    idle_backoff_ms: u64,
    throttle_ms: u64,
    dispatch_policy: DispatchPolicy,
    hours: OperatingHours,
    require_call_type: bool,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    log_format: LogFormat,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::assemble(TomlConfig::default(), OperatingHours::default(), "default")
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, &path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn from_toml(toml_config: TomlConfig, config_file: &str) -> anyhow::Result<Self> {
        let opens: ClockTime = toml_config
            .validation
            .opens_at
            .parse()
            .map_err(|e: String| anyhow::anyhow!("validation.opens_at: {e}"))?;
        let closes: ClockTime = toml_config
            .validation
            .closes_at
            .parse()
            .map_err(|e: String| anyhow::anyhow!("validation.closes_at: {e}"))?;
        anyhow::ensure!(
            opens <= closes,
            "validation.opens_at ({opens}) is after validation.closes_at ({closes})"
        );

        Ok(Self::assemble(toml_config, OperatingHours { opens, closes }, config_file))
    }

    fn assemble(toml_config: TomlConfig, hours: OperatingHours, config_file: &str) -> Self {
        Self {
            broker_kind: toml_config.broker.kind,
            topic: toml_config.broker.topic,
            kafka: toml_config.kafka,
            mqtt: toml_config.mqtt,
            database: toml_config.database,
            poll_timeout_ms: toml_config.ingest.poll_timeout_ms,
            idle_backoff_ms: toml_config.ingest.idle_backoff_ms,
            throttle_ms: toml_config.ingest.throttle_ms,
            dispatch_policy: toml_config.ingest.call_rating,
            hours,
            require_call_type: toml_config.validation.require_call_type,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            log_format: toml_config.logging.format,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    /// Apply broker and database overrides from the process environment,
    /// falling back to `.env` in the working directory when it exists
    pub fn apply_env(&mut self) {
        let dotenv = Path::new(DOTENV_FILE);
        if dotenv.exists() {
            match self.apply_env_file(dotenv) {
                Ok(()) => return,
                Err(e) => warn!(error = %format!("{e:#}"), "dotenv_ignored"),
            }
        }
        self.apply_env_with(|key| env::var(key).ok());
    }

    /// Apply overrides from a dotenv file. Variables set in the process
    /// environment take precedence over the file.
    pub fn apply_env_file<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let mut file_vars = BTreeMap::new();
        for item in dotenvy::from_path_iter(path)
            .with_context(|| format!("cannot read {}", path.display()))?
        {
            let (key, value) = item.with_context(|| format!("invalid entry in {}", path.display()))?;
            file_vars.insert(key, value);
        }
        self.apply_env_with(|key| env::var(key).ok().or_else(|| file_vars.get(key).cloned()));
        Ok(())
    }

    /// Apply overrides using `lookup` in place of the process environment
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BOOTSTRAP_SERVERS") {
            self.kafka.bootstrap_servers = v;
        }
        if let Some(v) = lookup("SECURITY_PROTOCOL") {
            self.kafka.security_protocol = Some(v);
        }
        if let Some(v) = lookup("SASL_MECHANISM") {
            self.kafka.sasl_mechanism = Some(v);
        }
        if let Some(v) = lookup("USERNAME") {
            self.kafka.username = Some(v);
        }
        if let Some(v) = lookup("PASSWORD") {
            self.kafka.password = Some(v);
        }
        if let Some(v) = lookup("GROUP") {
            self.kafka.group_id = v;
        }
        if let Some(v) = lookup("AUTO_OFFSET") {
            self.kafka.auto_offset_reset = Some(v);
        }

        if let Some(v) = lookup("DATABASE_NAME") {
            self.database.name = v;
        }
        if let Some(v) = lookup("DATABASE_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("DATABASE_PASSWORD") {
            self.database.password = Some(v);
        }
        if let Some(v) = lookup("DATABASE_IP") {
            self.database.host = v;
        }
        if let Some(v) = lookup("DATABASE_PORT") {
            match v.parse() {
                Ok(port) => self.database.port = port,
                Err(e) => warn!(value = %v, error = %e, "invalid_database_port_ignored"),
            }
        }
    }

    /// Validation rules derived from the `[validation]` section
    pub fn validation_rules(&self) -> ValidationRules {
        ValidationRules { hours: self.hours, require_call_type: self.require_call_type }
    }

    /// Loop timing derived from the `[ingest]` section
    pub fn schedule(&self) -> Schedule {
        Schedule {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            throttle: Duration::from_millis(self.throttle_ms),
        }
    }

    pub fn broker_kind(&self) -> BrokerKind {
        self.broker_kind
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn kafka(&self) -> &KafkaConfig {
        &self.kafka
    }

    pub fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        self.dispatch_policy
    }

    pub fn operating_hours(&self) -> OperatingHours {
        self.hours
    }

    pub fn require_call_type(&self) -> bool {
        self.require_call_type
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the broker kind
    #[cfg(test)]
    pub fn with_broker_kind(mut self, kind: BrokerKind) -> Self {
        self.broker_kind = kind;
        self
    }
}
