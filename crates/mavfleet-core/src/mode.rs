//! Flight mode maps and the mode-change handshake.
//!
//! ArduPilot reports its current mode as a numeric `custom_mode` in the
//! heartbeat; the name -> id table depends on the vehicle class. These
//! tables are the ones ground stations ship for ArduCopter, ArduPlane and
//! Rover. The map for a session is picked from the vehicle type announced
//! in its first heartbeat.

use std::collections::BTreeMap;

use mavlink::ardupilotmega::{MavCmd, MavMessage, MavModeFlag, MavType};
use serde::Serialize;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::command;
use crate::config::FleetSettings;
use crate::error::FleetError;
use crate::session::Session;

const COPTER_MODES: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("LOITER", 5),
    ("RTL", 6),
    ("CIRCLE", 7),
    ("LAND", 9),
    ("DRIFT", 11),
    ("SPORT", 13),
    ("FLIP", 14),
    ("AUTOTUNE", 15),
    ("POSHOLD", 16),
    ("BRAKE", 17),
    ("THROW", 18),
    ("AVOID_ADSB", 19),
    ("GUIDED_NOGPS", 20),
    ("SMART_RTL", 21),
    ("FLOWHOLD", 22),
    ("FOLLOW", 23),
    ("ZIGZAG", 24),
    ("SYSTEMID", 25),
    ("AUTOROTATE", 26),
    ("AUTO_RTL", 27),
];

const PLANE_MODES: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("CIRCLE", 1),
    ("STABILIZE", 2),
    ("TRAINING", 3),
    ("ACRO", 4),
    ("FBWA", 5),
    ("FBWB", 6),
    ("CRUISE", 7),
    ("AUTOTUNE", 8),
    ("AUTO", 10),
    ("RTL", 11),
    ("LOITER", 12),
    ("TAKEOFF", 13),
    ("AVOID_ADSB", 14),
    ("GUIDED", 15),
    ("QSTABILIZE", 17),
    ("QHOVER", 18),
    ("QLOITER", 19),
    ("QLAND", 20),
    ("QRTL", 21),
    ("QAUTOTUNE", 22),
    ("QACRO", 23),
    ("THERMAL", 24),
];

const ROVER_MODES: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("ACRO", 1),
    ("STEERING", 3),
    ("HOLD", 4),
    ("LOITER", 5),
    ("FOLLOW", 6),
    ("SIMPLE", 7),
    ("AUTO", 10),
    ("RTL", 11),
    ("SMART_RTL", 12),
    ("GUIDED", 15),
];

/// Mode-name -> custom-mode-id table for one vehicle.
#[derive(Debug, Clone)]
pub struct ModeMap {
    names: BTreeMap<String, u32>,
}

impl ModeMap {
    /// Pick the table matching the vehicle type from its heartbeat.
    pub fn for_vehicle(vehicle_type: MavType) -> Self {
        let table = match vehicle_type {
            MavType::MAV_TYPE_FIXED_WING => PLANE_MODES,
            MavType::MAV_TYPE_GROUND_ROVER | MavType::MAV_TYPE_SURFACE_BOAT => ROVER_MODES,
            // Copter covers the multirotor family and is the safest default.
            _ => COPTER_MODES,
        };
        ModeMap {
            names: table
                .iter()
                .map(|(name, id)| (name.to_string(), *id))
                .collect(),
        }
    }

    /// Numeric mode id for a (case-insensitive) mode name.
    pub fn id_for(&self, name: &str) -> Option<u32> {
        self.names.get(&name.to_ascii_uppercase()).copied()
    }

    /// Mode name for a numeric id.
    pub fn name_for(&self, id: u32) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, mode_id)| **mode_id == id)
            .map(|(name, _)| name.as_str())
    }

    /// All supported mode names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(|s| s.as_str())
    }
}

/// Outcome of an acknowledged mode change.
///
/// `accepted` means the vehicle acknowledged the command, not that the
/// mode is already active; `current` is whatever the next heartbeat
/// reported.
#[derive(Debug, Clone, Serialize)]
pub struct ModeChange {
    /// Requested mode name.
    pub mode: String,
    /// Mode observed on the heartbeat before the command.
    pub previous: Option<String>,
    /// Mode observed on the heartbeat after the ack.
    pub current: Option<String>,
}

/// Change flight mode.
///
/// An unknown mode name is a fatal [`FleetError::UnsupportedMode`]; the
/// caller must not retry it. An acknowledged-but-rejected command is
/// [`FleetError::CommandRejected`].
pub async fn set_mode(
    session: &Session,
    mode_name: &str,
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<ModeChange, FleetError> {
    let mode = mode_name.to_ascii_uppercase();
    let mode_id = session
        .mode_map()
        .id_for(&mode)
        .ok_or_else(|| FleetError::UnsupportedMode(mode.clone()))?;

    let mut exchange = session.exchange().await;

    let previous = observe_mode(session, &mut exchange, settings, cancel).await?;

    command::send_and_ack(
        &mut exchange,
        MavCmd::MAV_CMD_DO_SET_MODE,
        [
            MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
            mode_id as f32,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
        ],
        &format!("mode change to {mode} on {}", session.drone_id()),
        settings.ack_timeout(),
        cancel,
    )
    .await?;

    let current = observe_mode(session, &mut exchange, settings, cancel).await?;
    debug!(
        drone_id = session.drone_id(),
        mode,
        previous = previous.as_deref().unwrap_or("?"),
        current = current.as_deref().unwrap_or("?"),
        "mode change acknowledged"
    );

    Ok(ModeChange {
        mode,
        previous,
        current,
    })
}

/// Read the current mode name off the next heartbeat.
async fn observe_mode(
    session: &Session,
    exchange: &mut crate::session::Exchange<'_>,
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<Option<String>, FleetError> {
    let custom_mode = exchange
        .recv_match(
            &format!("waiting for heartbeat from {}", session.drone_id()),
            settings.ack_timeout(),
            cancel,
            |_, msg| match msg {
                MavMessage::HEARTBEAT(hb) => Some(hb.custom_mode),
                _ => None,
            },
        )
        .await?;
    Ok(session
        .mode_map()
        .name_for(custom_mode)
        .map(|s| s.to_string()))
}
