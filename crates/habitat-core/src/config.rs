//! Configuration loading and typed config structures for the habitat bridge.
//!
//! The canonical configuration lives in `habitat-config.yaml` next to the
//! binary. This module defines strongly-typed structs that mirror the YAML
//! structure, a loader that reads the file and applies environment
//! overrides, and [`BridgeConfig::validate`], which rejects settings the
//! bridge cannot start with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use habitat_types::{HabInfo, SensorDescriptor};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but cannot be used.
    #[error("invalid config `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level bridge configuration.
///
/// Mirrors the structure of `habitat-config.yaml`. Every field has a
/// default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BridgeConfig {
    /// Static habitat metadata sent to every consumer.
    #[serde(default)]
    pub habitat: HabitatConfig,

    /// Broadcast loop timing.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Registry sizing.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// MQTT ingestion.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// JSONL log-tail ingestion.
    #[serde(default)]
    pub log_tail: LogTailConfig,

    /// HTTP and WebSocket server.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Display metadata for known sensors, keyed by sensor ID.
    #[serde(default)]
    pub sensors: SensorMetadataMap,
}

impl BridgeConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `MQTT_HOST` overrides `mqtt.host`
    /// - `MQTT_PORT` overrides `mqtt.port`
    /// - `HABITAT_LOG_DIR` overrides `log_tail.log_dir`
    /// - `OBSERVER_PORT` overrides `observer.port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override connection settings with environment variables when set.
    ///
    /// Unparseable port values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MQTT_HOST") {
            self.mqtt.host = val;
        }
        if let Ok(val) = std::env::var("MQTT_PORT") {
            match val.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(e) => warn!(value = %val, error = %e, "Ignoring invalid MQTT_PORT"),
            }
        }
        if let Ok(val) = std::env::var("HABITAT_LOG_DIR") {
            self.log_tail.log_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OBSERVER_PORT") {
            match val.parse() {
                Ok(port) => self.observer.port = port,
                Err(e) => warn!(value = %val, error = %e, "Ignoring invalid OBSERVER_PORT"),
            }
        }
    }

    /// Reject settings the bridge cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive_secs("broadcast.period_secs", self.broadcast.period_secs)?;
        if self.registry.history_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "registry.history_capacity",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.mqtt.enabled {
            positive_secs("mqtt.reconnect_delay_secs", self.mqtt.reconnect_delay_secs)?;
            validate_topic_filter(&self.mqtt.effective_topic(&self.habitat.location))?;
            if self.mqtt.host.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "mqtt.host",
                    reason: "must not be empty".to_owned(),
                });
            }
        }
        if self.log_tail.enabled {
            if !self.log_tail.log_dir.is_dir() {
                return Err(ConfigError::Invalid {
                    field: "log_tail.log_dir",
                    reason: format!("{} is not a directory", self.log_tail.log_dir.display()),
                });
            }
            if self.log_tail.poll_interval_ms == 0 {
                return Err(ConfigError::Invalid {
                    field: "log_tail.poll_interval_ms",
                    reason: "must be greater than 0".to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Habitat metadata in its wire form.
    pub fn hab_info(&self) -> HabInfo {
        HabInfo {
            humans: self.habitat.humans,
            volume: self.habitat.volume,
            location: Some(self.habitat.location.clone()),
        }
    }
}

fn positive_secs(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(ConfigError::Invalid {
            field,
            reason: format!("{secs} is not a positive number of seconds"),
        }),
    }
}

/// Check an MQTT subscription filter.
///
/// `+` must fill a whole level; `#` must fill the last level.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for `mqtt.topic`.
pub fn validate_topic_filter(filter: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        field: "mqtt.topic",
        reason: format!("`{filter}`: {reason}"),
    };
    if filter.is_empty() {
        return Err(invalid("empty topic filter"));
    }
    if filter.contains('\0') {
        return Err(invalid("contains NUL"));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len().saturating_sub(1);
    for (i, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != "+" {
            return Err(invalid("`+` must occupy a whole level"));
        }
        if level.contains('#') && (*level != "#" || i != last) {
            return Err(invalid("`#` must be the whole last level"));
        }
    }
    Ok(())
}

/// Static habitat metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HabitatConfig {
    /// Deployment location, the first MQTT topic level and log file prefix.
    #[serde(default = "default_location")]
    pub location: String,

    /// Number of occupants.
    #[serde(default = "default_humans")]
    pub humans: u32,

    /// Habitat volume in cubic meters.
    #[serde(default = "default_volume")]
    pub volume: u32,
}

impl Default for HabitatConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            humans: default_humans(),
            volume: default_volume(),
        }
    }
}

/// Broadcast loop settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BroadcastConfig {
    /// Seconds between bundles.
    #[serde(default = "default_period_secs")]
    pub period_secs: f64,
}

impl BroadcastConfig {
    /// Period as a [`Duration`], falling back to one second if invalid.
    pub fn period(&self) -> Duration {
        positive_secs("broadcast.period_secs", self.period_secs)
            .unwrap_or(Duration::from_secs(1))
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
        }
    }
}

/// Registry sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryConfig {
    /// Readings kept per producer.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

/// MQTT subscriber settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConfig {
    /// Whether to run the MQTT adapter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Broker host name.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Seconds to wait before reconnecting after a failure.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: f64,

    /// Subscription filter. Defaults to `<location>/+/+`.
    #[serde(default)]
    pub topic: Option<String>,

    /// Prefix of the generated client ID.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// MQTT keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl MqttConfig {
    /// The subscription filter actually used for `location`.
    pub fn effective_topic(&self, location: &str) -> String {
        self.topic
            .clone()
            .unwrap_or_else(|| format!("{location}/+/+"))
    }

    /// Reconnect delay as a [`Duration`], falling back to five seconds.
    pub fn reconnect_delay(&self) -> Duration {
        positive_secs("mqtt.reconnect_delay_secs", self.reconnect_delay_secs)
            .unwrap_or(Duration::from_secs(5))
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            topic: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// JSONL log-tail settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogTailConfig {
    /// Whether to run the log-tail adapter.
    #[serde(default)]
    pub enabled: bool,

    /// Directory holding `{location}_{hostname}_{sensor}.jsonl` files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Host name in the file names. Defaults to this machine's name.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Sensor names to tail, one task each.
    #[serde(default = "default_log_sensors")]
    pub sensors: Vec<String>,

    /// Milliseconds between polls for a missing file or new data.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl LogTailConfig {
    /// Poll interval as a [`Duration`].
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LogTailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
            hostname: None,
            sensors: default_log_sensors(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// HTTP and WebSocket server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Bind address.
    #[serde(default = "default_observer_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_observer_port")]
    pub port: u16,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            host: default_observer_host(),
            port: default_observer_port(),
        }
    }
}

/// Display metadata the operator configures for one sensor.
///
/// Fills in what a producer leaves out of its descriptor; a producer that
/// names and describes itself keeps its own text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SensorMetadata {
    /// Replaces an empty `sensor_name`.
    #[serde(default)]
    pub name: Option<String>,

    /// Replaces an empty `sensor_desc`.
    #[serde(default)]
    pub desc: Option<String>,
}

impl SensorMetadata {
    /// Copy configured text into the descriptor's empty name and description.
    pub fn fill(&self, descriptor: &mut SensorDescriptor) {
        fill_empty(&mut descriptor.sensor_name, self.name.as_deref());
        fill_empty(&mut descriptor.sensor_desc, self.desc.as_deref());
    }
}

fn fill_empty(slot: &mut Option<String>, configured: Option<&str>) {
    let Some(configured) = configured else { return };
    if slot.as_deref().is_none_or(str::is_empty) {
        *slot = Some(configured.to_owned());
    }
}

/// Configured sensor metadata keyed by sensor ID.
pub type SensorMetadataMap = BTreeMap<String, SensorMetadata>;

/// Find the metadata for a sensor, ignoring ASCII case in the ID.
pub fn lookup_sensor_metadata<'a>(
    sensors: &'a SensorMetadataMap,
    sensor_id: &str,
) -> Option<&'a SensorMetadata> {
    sensors.get(sensor_id).or_else(|| {
        sensors
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(sensor_id))
            .map(|(_, meta)| meta)
    })
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_location() -> String {
    "sam".to_owned()
}

const fn default_humans() -> u32 {
    4
}

const fn default_volume() -> u32 {
    272
}

const fn default_period_secs() -> f64 {
    1.0
}

const fn default_history_capacity() -> usize {
    habitat_registry::DEFAULT_HISTORY_CAPACITY
}

const fn default_true() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_owned()
}

const fn default_mqtt_port() -> u16 {
    1883
}

const fn default_reconnect_delay_secs() -> f64 {
    5.0
}

fn default_client_id_prefix() -> String {
    "habitat-bridge".to_owned()
}

const fn default_keep_alive_secs() -> u64 {
    30
}

fn default_log_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(|| PathBuf::from("logs"), |home| PathBuf::from(home).join("logs"))
}

fn default_log_sensors() -> Vec<String> {
    vec!["bme688".to_owned(), "scd30".to_owned(), "sgp30".to_owned()]
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_observer_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_observer_port() -> u16 {
    8081
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BridgeConfig::default();
        assert_eq!(config.habitat.humans, 4);
        assert_eq!(config.habitat.volume, 272);
        assert_eq!(config.broadcast.period(), Duration::from_secs(1));
        assert_eq!(config.registry.history_capacity, 10);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.mqtt.effective_topic("sam"), "sam/+/+");
        assert_eq!(config.log_tail.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.log_tail.sensors.len(), 3);
        assert_eq!(config.observer.port, 8081);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
habitat:
  location: "mars"
  humans: 2
  volume: 150
broadcast:
  period_secs: 2.5
registry:
  history_capacity: 20
mqtt:
  enabled: true
  host: "broker.local"
  reconnect_delay_secs: 1
  topic: "mars/#"
  client_id_prefix: "bridge"
  keep_alive_secs: 10
log_tail:
  enabled: false
  hostname: "rpi4"
  sensors: ["scd30"]
  poll_interval_ms: 250
observer:
  host: "127.0.0.1"
logging:
  level: "debug"
  format: json
"#;
        let config = BridgeConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.habitat.location, "mars");
        assert_eq!(config.hab_info().humans, 2);
        assert_eq!(config.hab_info().location.as_deref(), Some("mars"));
        assert_eq!(config.broadcast.period(), Duration::from_millis(2500));
        assert_eq!(config.registry.history_capacity, 20);
        assert_eq!(config.mqtt.effective_topic("mars"), "mars/#");
        assert_eq!(config.mqtt.keep_alive_secs, 10);
        assert_eq!(config.log_tail.hostname.as_deref(), Some("rpi4"));
        assert_eq!(config.log_tail.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sensor_metadata_fills_only_empty_fields() {
        let yaml = r#"
sensors:
  Pi1.SCD30:
    name: "Lab CO2"
    desc: "Bench sensor by the airlock"
"#;
        let config = BridgeConfig::parse(yaml).unwrap_or_default();
        let meta = lookup_sensor_metadata(&config.sensors, "pi1.scd30");
        assert!(meta.is_some());
        assert!(lookup_sensor_metadata(&config.sensors, "pi2.scd30").is_none());

        let mut descriptor = SensorDescriptor::synthesized("pi1", "scd30");
        descriptor.sensor_name = Some(String::new());
        descriptor.sensor_desc = Some("Producer's own words".to_owned());
        if let Some(meta) = meta {
            meta.fill(&mut descriptor);
        }
        assert_eq!(descriptor.sensor_name.as_deref(), Some("Lab CO2"));
        assert_eq!(descriptor.sensor_desc.as_deref(), Some("Producer's own words"));
    }

    #[test]
    fn parse_empty_yaml() {
        let config = BridgeConfig::parse("");
        assert!(config.is_ok());
    }

    #[test]
    fn zero_period_is_rejected() {
        let mut config = BridgeConfig::default();
        config.broadcast.period_secs = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "broadcast.period_secs", .. })
        ));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = BridgeConfig::default();
        config.registry.history_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_log_dir_is_fatal_only_when_enabled() {
        let mut config = BridgeConfig::default();
        config.log_tail.log_dir = PathBuf::from("/definitely/not/here");
        assert!(config.validate().is_ok());

        config.log_tail.enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "log_tail.log_dir", .. })
        ));

        let dir = tempfile::tempdir();
        assert!(dir.is_ok());
        if let Ok(dir) = dir {
            config.log_tail.log_dir = dir.path().to_path_buf();
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn topic_filters() {
        assert!(validate_topic_filter("sam/+/+").is_ok());
        assert!(validate_topic_filter("sam/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("sam/#/x").is_err());
        assert!(validate_topic_filter("sam/a+/b").is_err());
        assert!(validate_topic_filter("sam/#x").is_err());
    }

    #[test]
    fn invalid_topic_is_fatal() {
        let mut config = BridgeConfig::default();
        config.mqtt.topic = Some("sam/#/oops".to_owned());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "mqtt.topic", .. })
        ));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("habitat-config.yaml");
        if path.exists() {
            let config = BridgeConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
