//! Engine settings: acquisition timeouts and sampling density
//!
//! Defaults suit a responsive control network. Settings can be loaded from a
//! JSON document (durations as float seconds) and then overridden from the
//! environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `CHECKOUT_CONNECTION_TIMEOUT` | `connection_timeout` (seconds) |
//! | `CHECKOUT_READ_TIMEOUT` | `read_timeout` (seconds) |
//! | `CHECKOUT_MIN_SAMPLES` | `min_samples` |
//! | `CHECKOUT_TOOL_TIMEOUT` | `tool_timeout` (seconds) |

use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;
use crate::reduce::MAX_SAMPLES;

/// Default bound for a connection wait
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);
/// Default bound for one read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Default number of samples across a reduction window
pub const DEFAULT_MIN_SAMPLES: usize = 5;
/// Default bound for a tool run
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables shared by every acquisition of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Bound for `wait_connected`
    #[serde(rename = "connection_timeout_secs", with = "duration_secs")]
    pub connection_timeout: Duration,
    /// Bound for a single read once connected
    #[serde(rename = "read_timeout_secs", with = "duration_secs")]
    pub read_timeout: Duration,
    /// Samples spread across a non-zero reduction window
    pub min_samples: usize,
    /// Bound for a tool procedure run
    #[serde(rename = "tool_timeout_secs", with = "duration_secs")]
    pub tool_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            min_samples: DEFAULT_MIN_SAMPLES,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl EngineSettings {
    /// Default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection wait bound
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the single-read bound
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the samples per window, clamped to `1..=MAX_SAMPLES`
    pub fn with_min_samples(mut self, samples: usize) -> Self {
        self.min_samples = samples.clamp(1, MAX_SAMPLES);
        self
    }

    /// Set the tool run bound
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Parse a JSON settings document
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        Ok(settings.normalized())
    }

    /// Load a JSON settings file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Apply `CHECKOUT_*` environment variables
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; invalid values are ignored
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(d) = duration_override(&lookup, "CHECKOUT_CONNECTION_TIMEOUT") {
            self.connection_timeout = d;
        }
        if let Some(d) = duration_override(&lookup, "CHECKOUT_READ_TIMEOUT") {
            self.read_timeout = d;
        }
        if let Some(d) = duration_override(&lookup, "CHECKOUT_TOOL_TIMEOUT") {
            self.tool_timeout = d;
        }
        if let Some(raw) = lookup("CHECKOUT_MIN_SAMPLES") {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.min_samples = n,
                Err(_) => warn!("ignoring CHECKOUT_MIN_SAMPLES={raw:?}: not a sample count"),
            }
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        if self.min_samples > MAX_SAMPLES {
            warn!("min_samples {} exceeds {MAX_SAMPLES}, clamping", self.min_samples);
        }
        self.min_samples = self.min_samples.clamp(1, MAX_SAMPLES);
        self
    }
}

fn duration_override<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok()) {
        Some(d) => Some(d),
        None => {
            warn!("ignoring {key}={raw:?}: not a duration in seconds");
            None
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
