//! Fleet configuration.
//!
//! The YAML layout mirrors what the surrounding service layers feed us:
//! a drone table (address + expected system id), protocol timing knobs,
//! named missions, and the fence/rally coordinate lists.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FencePoint, RallyPoint, Waypoint};

/// Errors raised while loading or validating a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML did not parse into a [`FleetConfig`].
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: String,
        /// Underlying serde error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The parsed configuration is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transport address and authorization data for one drone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneConfig {
    /// mavlink-style address string, e.g. "tcpout:127.0.0.1:5763" or
    /// "udpin:0.0.0.0:14550".
    pub address: String,
    /// System id this vehicle must announce; anything else is refused at
    /// connect time.
    pub system_id: u8,
}

/// Protocol timing and retry bounds.
///
/// Every retry loop in the protocol engines is bounded by one of these
/// knobs; exhaustion surfaces as a typed error instead of spinning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSettings {
    /// Delay between operation starts in batch runs, milliseconds.
    #[serde(default = "default_separation_ms")]
    pub separation_ms: u64,
    /// Bound on the wait for the first heartbeat at connect, milliseconds.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Bound on a single command/parameter reply wait, milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Bound on the wait for the vehicle's next mission item request,
    /// milliseconds.
    #[serde(default = "default_item_timeout_ms")]
    pub item_timeout_ms: u64,
    /// Overall deadline for one protocol sequence (mission upload, armed
    /// wait), milliseconds.
    #[serde(default = "default_operation_deadline_ms")]
    pub operation_deadline_ms: u64,
    /// Attempts per parameter / per point before giving up with a
    /// mismatch error.
    #[serde(default = "default_param_retry_limit")]
    pub param_retry_limit: u32,
    /// Arm command attempts before giving up on rejection.
    #[serde(default = "default_arm_retry_limit")]
    pub arm_retry_limit: u32,
    /// Back-off between arm attempts after a rejection, milliseconds.
    #[serde(default = "default_arm_retry_backoff_ms")]
    pub arm_retry_backoff_ms: u64,
    /// Bound on each telemetry message wait, milliseconds.
    #[serde(default = "default_telemetry_timeout_ms")]
    pub telemetry_timeout_ms: u64,
    /// Requested telemetry stream rate, Hz.
    #[serde(default = "default_stream_rate_hz")]
    pub stream_rate_hz: u16,
}

fn default_separation_ms() -> u64 {
    1000
}
fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}
fn default_ack_timeout_ms() -> u64 {
    5000
}
fn default_item_timeout_ms() -> u64 {
    5000
}
fn default_operation_deadline_ms() -> u64 {
    60_000
}
fn default_param_retry_limit() -> u32 {
    10
}
fn default_arm_retry_limit() -> u32 {
    5
}
fn default_arm_retry_backoff_ms() -> u64 {
    10_000
}
fn default_telemetry_timeout_ms() -> u64 {
    5000
}
fn default_stream_rate_hz() -> u16 {
    10
}

impl Default for FleetSettings {
    fn default() -> Self {
        FleetSettings {
            separation_ms: default_separation_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            item_timeout_ms: default_item_timeout_ms(),
            operation_deadline_ms: default_operation_deadline_ms(),
            param_retry_limit: default_param_retry_limit(),
            arm_retry_limit: default_arm_retry_limit(),
            arm_retry_backoff_ms: default_arm_retry_backoff_ms(),
            telemetry_timeout_ms: default_telemetry_timeout_ms(),
            stream_rate_hz: default_stream_rate_hz(),
        }
    }
}

impl FleetSettings {
    /// Inter-operation delay in batch runs.
    pub fn separation(&self) -> Duration {
        Duration::from_millis(self.separation_ms)
    }

    /// First-heartbeat wait bound.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Single ack / parameter echo wait bound.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Mission item request wait bound.
    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    /// Whole-sequence deadline.
    pub fn operation_deadline(&self) -> Duration {
        Duration::from_millis(self.operation_deadline_ms)
    }

    /// Back-off after an arm rejection.
    pub fn arm_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.arm_retry_backoff_ms)
    }

    /// Telemetry message wait bound.
    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }
}

/// Fence section: the polygon vertices to upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FenceSection {
    /// Polygon vertices, in order.
    pub points: Vec<FencePoint>,
}

/// Rally section: the rally points to upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RallySection {
    /// Rally points, in order.
    pub points: Vec<RallyPoint>,
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Drone id -> transport/authorization data.
    #[serde(default)]
    pub drones: BTreeMap<String, DroneConfig>,
    /// Timing and retry knobs.
    #[serde(default)]
    pub settings: FleetSettings,
    /// Named missions (waypoint lists).
    #[serde(default, alias = "waypoints")]
    pub missions: BTreeMap<String, Vec<Waypoint>>,
    /// Optional fence polygon.
    #[serde(default)]
    pub fence: Option<FenceSection>,
    /// Optional rally points.
    #[serde(default)]
    pub rally: Option<RallySection>,
}

impl FleetConfig {
    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: FleetConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML string (used by tests and embedders).
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, drone) in &self.drones {
            if drone.address.is_empty() {
                return Err(ConfigError::Invalid(format!("drone {id} has no address")));
            }
        }
        for (name, waypoints) in &self.missions {
            if waypoints.is_empty() {
                return Err(ConfigError::Invalid(format!("mission {name} is empty")));
            }
        }
        Ok(())
    }

    /// All configured drone ids, in stable order.
    pub fn drone_ids(&self) -> Vec<String> {
        self.drones.keys().cloned().collect()
    }
}
