//! Recorder configuration
//!
//! Loaded once from a JSON file at startup and immutable afterwards:
//!
//! ```json
//! {
//!     "PORT": "/dev/ttyACM0",
//!     "CURSOR_BUFFER_SIZE": 10,
//!     "OPS24X_PARAMETERS": { "OPS24X_UNITS": "UM", "OPS24X_SAMPLING": "SX" },
//!     "LOG_FILEDIR": "/var/log/ops24x",
//!     "MAX_TIME": 3600
//! }
//! ```
//!
//! Unknown keys and wrongly typed values are rejected when the file is loaded.

use chrono::{DateTime, Local};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::DEFAULT_PORT;

/// Errors that can occur while loading a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Device parameters in the order they appear in the file.
///
/// Each entry maps a descriptive name to the command string sent to the module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceParameters(Vec<(String, String)>);

impl DeviceParameters {
    /// Build from `(name, command)` pairs
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self(entries)
    }

    /// Iterate `(name, command)` in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Command for a named parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceParameters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParametersVisitor;

        impl<'de> Visitor<'de> for ParametersVisitor {
            type Value = DeviceParameters;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter name to command string")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, String)> = Vec::new();
                while let Some((name, command)) = map.next_entry::<String, String>()? {
                    if entries.iter().any(|(k, _)| *k == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate parameter '{}'",
                            name
                        )));
                    }
                    entries.push((name, command));
                }
                Ok(DeviceParameters(entries))
            }
        }

        deserializer.deserialize_map(ParametersVisitor)
    }
}

impl Serialize for DeviceParameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, command) in &self.0 {
            map.serialize_entry(name, command)?;
        }
        map.end()
    }
}

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecorderConfig {
    /// Serial device path
    #[serde(rename = "PORT", default = "default_port")]
    pub port: String,

    /// Samples staged between commits
    #[serde(rename = "CURSOR_BUFFER_SIZE", default = "default_cursor_buffer_size")]
    pub cursor_buffer_size: usize,

    /// Commands applied to the module before anything else
    #[serde(rename = "OPS24X_PARAMETERS", default)]
    pub parameters: DeviceParameters,

    /// Stop listening after this many seconds
    #[serde(rename = "MAX_TIME", default, skip_serializing_if = "Option::is_none")]
    pub max_time: Option<f64>,

    /// Directory receiving the log file and database
    #[serde(rename = "LOG_FILEDIR", default = "default_log_filedir")]
    pub log_filedir: PathBuf,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_cursor_buffer_size() -> usize {
    10
}

fn default_log_filedir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cursor_buffer_size: default_cursor_buffer_size(),
            parameters: DeviceParameters::default(),
            max_time: None,
            log_filedir: default_log_filedir(),
        }
    }
}

impl RecorderConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RecorderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(invalid("PORT", "must not be empty"));
        }

        if self.cursor_buffer_size < 1 {
            return Err(invalid("CURSOR_BUFFER_SIZE", "must be at least 1"));
        }

        if let Some(max_time) = self.max_time {
            if !max_time.is_finite() || max_time <= 0.0 {
                return Err(invalid(
                    "MAX_TIME",
                    &format!("must be a positive number of seconds, got {}", max_time),
                ));
            }
            if Duration::try_from_secs_f64(max_time).is_err() {
                return Err(invalid(
                    "MAX_TIME",
                    &format!("{} seconds is too large", max_time),
                ));
            }
        }

        for (name, command) in self.parameters.iter() {
            if command.is_empty() || !command.is_ascii() {
                return Err(invalid(
                    "OPS24X_PARAMETERS",
                    &format!("command for '{}' must be non-empty ASCII", name),
                ));
            }
        }

        Ok(())
    }

    /// Elapsed-time limit for listening.
    ///
    /// A limit too large to represent means no limit; [`validate`](Self::validate) rejects
    /// such values at load time.
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_time
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// File stem shared by the log file and database of a recording
    pub fn recording_stem(started: &DateTime<Local>) -> String {
        format!("SpeedRecording_{}", started.format("%Y%m%d_%H%M%S"))
    }

    /// Log file for a recording started at `started`
    pub fn log_file_path(&self, started: &DateTime<Local>) -> PathBuf {
        self.log_filedir
            .join(Self::recording_stem(started))
            .with_extension("log")
    }

    /// Database for a recording started at `started`
    pub fn database_path(&self, started: &DateTime<Local>) -> PathBuf {
        self.log_file_path(started).with_extension("db")
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}
