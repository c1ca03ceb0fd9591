//! Domain types shared across the fleet operations.

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// MAV_CMD_NAV_WAYPOINT, the default navigation command for waypoints.
pub const NAV_WAYPOINT_CMD: u16 = 16;

/// One caller-supplied step of a flight plan.
///
/// Latitude/longitude in degrees, altitude in meters (relative to home).
/// Immutable once part of a submitted [`MissionPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters, relative to home.
    pub altitude: f32,
    /// Navigation command code (MAV_CMD_NAV_*), e.g. 16 for waypoint,
    /// 22 for takeoff.
    #[serde(default = "default_nav_command")]
    pub command: u16,
}

fn default_nav_command() -> u16 {
    NAV_WAYPOINT_CMD
}

/// An ordered, non-empty waypoint list bound to a drone.
///
/// The home and takeoff items the wire protocol requires are synthesized
/// by the upload state machine, not part of the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    drone_id: String,
    waypoints: Vec<Waypoint>,
}

impl MissionPlan {
    /// Build a plan; fails on an empty waypoint list or one that cannot
    /// be sequenced in a 16-bit mission count together with the two
    /// synthesized items.
    pub fn new(drone_id: impl Into<String>, waypoints: Vec<Waypoint>) -> Result<Self, FleetError> {
        if waypoints.is_empty() {
            return Err(FleetError::InvalidPlan("empty waypoint list".to_string()));
        }
        if waypoints.len() > (u16::MAX - 2) as usize {
            return Err(FleetError::InvalidPlan(format!(
                "{} waypoints exceed the mission item limit",
                waypoints.len()
            )));
        }
        Ok(MissionPlan {
            drone_id: drone_id.into(),
            waypoints,
        })
    }

    /// Drone this plan targets.
    pub fn drone_id(&self) -> &str {
        &self.drone_id
    }

    /// The caller-supplied waypoints.
    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Total item count on the wire: waypoints plus home and takeoff.
    pub fn wire_count(&self) -> u16 {
        self.waypoints.len() as u16 + 2
    }
}

/// A geofence polygon vertex. Raw degrees on the wire (FENCE_POINT
/// carries floats).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FencePoint {
    /// Latitude in degrees.
    pub lat: f32,
    /// Longitude in degrees.
    pub lng: f32,
}

/// A rally (loiter/return) location. Scaled to 1e7 integers on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RallyPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Altitude in meters.
    pub alt: i16,
}

/// Argument of the fence enable command (DO_FENCE_ENABLE param1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FenceEnableMode {
    /// Fence off.
    Disable,
    /// Fence on.
    Enable,
    /// Only the floor fence disabled.
    DisableFloorOnly,
}

impl FenceEnableMode {
    /// Wire encoding for COMMAND_LONG param1.
    pub fn as_param(self) -> f32 {
        match self {
            FenceEnableMode::Disable => 0.0,
            FenceEnableMode::Enable => 1.0,
            FenceEnableMode::DisableFloorOnly => 2.0,
        }
    }
}

impl std::str::FromStr for FenceEnableMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DISABLE" => Ok(FenceEnableMode::Disable),
            "ENABLE" => Ok(FenceEnableMode::Enable),
            "DISABLE_FLOOR_ONLY" => Ok(FenceEnableMode::DisableFloorOnly),
            other => Err(format!("unsupported fence enable mode: {other}")),
        }
    }
}

/// One assembled telemetry sample.
///
/// Position fields are always present (0.0 until the first fix reaches
/// us); the rest degrade to `None` when the vehicle does not report them
/// within the poll window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Telemetry {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude above mean sea level, meters.
    pub altitude: f64,
    /// Altitude above home, meters.
    pub relative_altitude: Option<f64>,
    /// Heading in degrees, 0..360.
    pub heading: Option<f64>,
    /// Ground speed in m/s.
    pub velocity: Option<f64>,
    /// Remaining battery, percent.
    pub battery_remaining: Option<i8>,
    /// GPS fix type (0 = none, 3 = 3D fix, ...).
    pub gps_fix: Option<u8>,
}

/// Encode degrees as the wire's 1e7-scaled integer, clamped to the
/// 32-bit signed range even for out-of-range inputs.
pub fn scale_degrees_e7(degrees: f64) -> i32 {
    let scaled = degrees * 1e7;
    if scaled >= i32::MAX as f64 {
        i32::MAX
    } else if scaled <= i32::MIN as f64 {
        i32::MIN
    } else {
        scaled as i32
    }
}
