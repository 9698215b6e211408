//! Configuration management for connectors.
//!
//! Two layers:
//! - [`ConnectorOptions`]: the per-instance option bag handed to a factory, with
//!   decode helpers that apply defaults when a key is absent or of the wrong shape.
//! - [`ConnectConfig`]: process-level settings plus the list of connector
//!   definitions, loaded from a TOML file with environment overrides.

use crate::{ConnectorError, ConnectorResult, Event};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// String-keyed option bag for one connector instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorOptions(Map<String, Value>);

impl ConnectorOptions {
    /// Create an empty option bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value, which must be an object (or null for "no options")
    pub fn from_value(value: Value) -> ConnectorResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(ConnectorError::config(format!(
                "connector options must be an object, got {}",
                other
            ))),
        }
    }

    /// Add an option
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a raw option value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Check if an option is present
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Get a string option if it is present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Non-empty string option, otherwise `default`
    pub fn string_or(&self, key: &str, default: &str) -> String {
        match self.get_str(key) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => default.to_string(),
        }
    }

    /// String option, otherwise an empty string
    pub fn string(&self, key: &str) -> String {
        self.get_str(key).unwrap_or_default().to_string()
    }

    /// Required non-empty string option
    pub fn require_str(&self, key: &str) -> ConnectorResult<String> {
        match self.get_str(key) {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(ConnectorError::config(format!("{} is required", key))),
        }
    }

    /// Integer option that must be > 0, otherwise `default`
    ///
    /// Accepts both integers and floats (JSON decoders commonly yield floats);
    /// a float is truncated, so anything below 1 falls back to `default`.
    pub fn positive_u32_or(&self, key: &str, default: u32) -> u32 {
        match self.number(key) {
            Some(n) if n >= 1.0 => n as u32,
            _ => default,
        }
    }

    /// Integer option that must be >= 0, otherwise `default`
    pub fn non_negative_u32_or(&self, key: &str, default: u32) -> u32 {
        match self.number(key) {
            Some(n) if n >= 0.0 => n as u32,
            _ => default,
        }
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Duration option
    ///
    /// Strings use humantime syntax (`"1ms"`, `"5s"`, `"2m 30s"`); numbers are
    /// seconds. An unparsable string is a configuration error; an absent key or
    /// any other shape yields `default`.
    pub fn duration_or(&self, key: &str, default: Duration) -> ConnectorResult<Duration> {
        match self.0.get(key) {
            Some(Value::String(s)) => humantime::parse_duration(s).map_err(|e| {
                ConnectorError::config(format!("invalid {} {:?}: {}", key, s, e))
            }),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(secs) if secs >= 0.0 => Ok(Duration::from_secs_f64(secs)),
                _ => Ok(default),
            },
            _ => Ok(default),
        }
    }

    /// List of strings; non-string entries are ignored
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Map of string values; non-string values are ignored
    pub fn string_map(&self, key: &str) -> BTreeMap<String, String> {
        match self.0.get(key) {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Nested option bag; empty when absent or not an object
    pub fn section(&self, key: &str) -> ConnectorOptions {
        match self.0.get(key) {
            Some(Value::Object(map)) => ConnectorOptions(map.clone()),
            _ => ConnectorOptions::default(),
        }
    }
}

impl From<Map<String, Value>> for ConnectorOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One connector instance to create at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDefinition {
    /// Registered type name, e.g. `"webhook"` or `"sqs"`
    #[serde(rename = "type")]
    pub connector_type: String,

    /// Unique instance name (shared namespace across sources and sinks)
    pub name: String,

    /// Adapter-specific options
    #[serde(default)]
    pub options: ConnectorOptions,
}

/// Process-level configuration for the connector framework
///
/// # Structure
/// - **Settings** (from file, env overrides, or defaults): `log_level`, `output_capacity`
/// - **Definitions** (from file): `sources`, `sinks`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Capacity of the bounded output queue shared by sources
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,

    /// Source instances
    #[serde(default)]
    pub sources: Vec<ConnectorDefinition>,

    /// Sink instances
    #[serde(default)]
    pub sinks: Vec<ConnectorDefinition>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_output_capacity() -> usize {
    1024
}

impl ConnectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ConnectorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&content).map_err(|e| {
            ConnectorError::config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> ConnectorResult<Self> {
        toml::from_str(content).map_err(|e| ConnectorError::config(e.to_string()))
    }

    /// Apply environment variable overrides to process-level settings
    ///
    /// - `CONNECT_LOG_LEVEL` overrides `log_level`
    /// - `CONNECT_OUTPUT_CAPACITY` overrides `output_capacity` (ignored if not a number)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CONNECT_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = env::var("CONNECT_OUTPUT_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                self.output_capacity = capacity;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.output_capacity == 0 {
            return Err(ConnectorError::config("output_capacity must be > 0"));
        }

        let mut names = HashSet::new();
        for def in self.sources.iter().chain(self.sinks.iter()) {
            if def.connector_type.is_empty() {
                return Err(ConnectorError::config(format!(
                    "connector {:?} has an empty type",
                    def.name
                )));
            }
            if def.name.is_empty() {
                return Err(ConnectorError::config(format!(
                    "connector of type {:?} has an empty name",
                    def.connector_type
                )));
            }
            if !names.insert(def.name.as_str()) {
                return Err(ConnectorError::config(format!(
                    "connector name {:?} is used more than once",
                    def.name
                )));
            }
        }

        Ok(())
    }

    /// Create the bounded output queue sources write into
    pub fn output_channel(&self) -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
        mpsc::channel(self.output_capacity.max(1))
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            output_capacity: default_output_capacity(),
            sources: Vec::new(),
            sinks: Vec::new(),
        }
    }
}
