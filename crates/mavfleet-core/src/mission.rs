//! Mission upload state machine.
//!
//! Upload follows the count/request/item/ack exchange: we announce the
//! item count, the vehicle pulls each item by sequence number (possibly
//! re-requesting any of them, any number of times), and the exchange ends
//! only when a MISSION_ACK arrives. Item 0 is a synthesized home location
//! and item 1 a synthesized takeoff, so the wire count is the caller's
//! waypoint count plus two.

use mavlink::ardupilotmega::{
    MavCmd, MavFrame, MavMessage, MavMissionResult, MavMissionType, MISSION_COUNT_DATA,
    MISSION_ITEM_INT_DATA,
};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::config::FleetSettings;
use crate::error::FleetError;
use crate::session::Session;
use crate::types::{scale_degrees_e7, Waypoint};

/// What happened during a completed upload.
#[derive(Debug, Clone, Serialize)]
pub struct MissionSummary {
    /// Wire item count that was announced (waypoints + 2).
    pub count: u16,
    /// Items transmitted, re-requests included.
    pub items_sent: u32,
}

/// Reply kinds the upload loop reacts to.
enum MissionReply {
    Request(u16),
    Ack(MavMissionResult),
}

/// Upload a waypoint list to the vehicle.
///
/// Keeps answering item requests until the vehicle acks; bounded by the
/// per-request `item_timeout` and the overall `operation_deadline`.
// ArduPilot still pulls items with the legacy MISSION_REQUEST.
#[allow(deprecated)]
pub async fn upload(
    session: &Session,
    waypoints: &[Waypoint],
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<MissionSummary, FleetError> {
    if waypoints.is_empty() {
        return Err(FleetError::InvalidPlan("empty waypoint list".to_string()));
    }
    if waypoints.len() > (u16::MAX - 2) as usize {
        return Err(FleetError::InvalidPlan(format!(
            "{} waypoints exceed the mission item limit",
            waypoints.len()
        )));
    }

    let count = waypoints.len() as u16 + 2;
    let (target_system, target_component) = session.target();
    let deadline = tokio::time::Instant::now() + settings.operation_deadline();

    let mut exchange = session.exchange().await;
    exchange.send(&MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
        target_system,
        target_component,
        count,
        mission_type: MavMissionType::MAV_MISSION_TYPE_MISSION,
        ..Default::default()
    }))?;
    debug!(
        drone_id = session.drone_id(),
        count, "mission upload started"
    );

    let mut items_sent: u32 = 0;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(FleetError::ProtocolTimeout {
                state: progress(session, items_sent, count),
            });
        }

        let reply = exchange
            .recv_match(
                &progress(session, items_sent, count),
                settings.item_timeout(),
                cancel,
                |_, msg| match msg {
                    MavMessage::MISSION_REQUEST(req)
                        if req.mission_type == MavMissionType::MAV_MISSION_TYPE_MISSION =>
                    {
                        Some(MissionReply::Request(req.seq))
                    }
                    MavMessage::MISSION_REQUEST_INT(req)
                        if req.mission_type == MavMissionType::MAV_MISSION_TYPE_MISSION =>
                    {
                        Some(MissionReply::Request(req.seq))
                    }
                    MavMessage::MISSION_ACK(ack)
                        if ack.mission_type == MavMissionType::MAV_MISSION_TYPE_MISSION =>
                    {
                        Some(MissionReply::Ack(ack.mavtype))
                    }
                    _ => None,
                },
            )
            .await?;

        match reply {
            MissionReply::Request(seq) => {
                if seq >= count {
                    warn!(
                        drone_id = session.drone_id(),
                        seq, count, "vehicle requested an out-of-range item"
                    );
                    continue;
                }
                let item = build_item((target_system, target_component), waypoints, seq);
                exchange.send(&MavMessage::MISSION_ITEM_INT(item))?;
                items_sent += 1;
                trace!(drone_id = session.drone_id(), seq, "mission item sent");
            }
            MissionReply::Ack(MavMissionResult::MAV_MISSION_ACCEPTED) => {
                debug!(
                    drone_id = session.drone_id(),
                    items_sent, "mission upload accepted"
                );
                return Ok(MissionSummary { count, items_sent });
            }
            MissionReply::Ack(other) => {
                return Err(FleetError::MissionRejected(format!("{other:?}")));
            }
        }
    }
}

fn progress(session: &Session, items_sent: u32, count: u16) -> String {
    format!(
        "mission upload to {}: {items_sent}/{count} items sent, awaiting vehicle",
        session.drone_id()
    )
}

/// Build the mission item for a requested sequence number.
///
/// seq 0: home placeholder at the origin; seq 1: takeoff to the first
/// waypoint's altitude; seq >= 2: caller waypoint `seq - 2`.
fn build_item(
    target: (u8, u8),
    waypoints: &[Waypoint],
    seq: u16,
) -> MISSION_ITEM_INT_DATA {
    let (frame, command, x, y, z) = match seq {
        0 => (
            MavFrame::MAV_FRAME_GLOBAL,
            MavCmd::MAV_CMD_NAV_WAYPOINT,
            0,
            0,
            0.0,
        ),
        1 => (
            MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            0,
            0,
            waypoints[0].altitude,
        ),
        _ => {
            let wp = &waypoints[(seq - 2) as usize];
            (
                MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
                nav_command(wp.command),
                scale_degrees_e7(wp.latitude),
                scale_degrees_e7(wp.longitude),
                wp.altitude,
            )
        }
    };

    MISSION_ITEM_INT_DATA {
        target_system: target.0,
        target_component: target.1,
        seq,
        frame,
        command,
        current: 0,
        autocontinue: 0,
        param1: 0.0,
        param2: 0.0,
        param3: 0.0,
        param4: 0.0,
        x,
        y,
        z,
        mission_type: MavMissionType::MAV_MISSION_TYPE_MISSION,
    }
}

/// Map a waypoint's numeric command code onto the supported NAV set;
/// anything unrecognized flies as a plain waypoint.
fn nav_command(code: u16) -> MavCmd {
    match code {
        16 => MavCmd::MAV_CMD_NAV_WAYPOINT,
        17 => MavCmd::MAV_CMD_NAV_LOITER_UNLIM,
        19 => MavCmd::MAV_CMD_NAV_LOITER_TIME,
        20 => MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH,
        21 => MavCmd::MAV_CMD_NAV_LAND,
        22 => MavCmd::MAV_CMD_NAV_TAKEOFF,
        _ => MavCmd::MAV_CMD_NAV_WAYPOINT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waypoints() -> Vec<Waypoint> {
        vec![
            Waypoint {
                latitude: 47.3977419,
                longitude: 8.5455938,
                altitude: 25.0,
                command: 16,
            },
            Waypoint {
                latitude: -47.0,
                longitude: -8.0,
                altitude: 30.0,
                command: 21,
            },
        ]
    }

    #[test]
    fn test_home_item_is_origin() {
        let item = build_item((1, 1), &waypoints(), 0);
        assert_eq!(item.frame, MavFrame::MAV_FRAME_GLOBAL);
        assert_eq!(item.command, MavCmd::MAV_CMD_NAV_WAYPOINT);
        assert_eq!((item.x, item.y), (0, 0));
        assert_eq!(item.z, 0.0);
    }

    #[test]
    fn test_takeoff_item_uses_first_altitude() {
        let item = build_item((1, 1), &waypoints(), 1);
        assert_eq!(item.command, MavCmd::MAV_CMD_NAV_TAKEOFF);
        assert_eq!(item.frame, MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT);
        assert_eq!(item.z, 25.0);
    }

    #[test]
    fn test_waypoint_item_scaling_and_command() {
        let item = build_item((1, 1), &waypoints(), 2);
        assert_eq!(item.x, 473977419);
        assert_eq!(item.y, 85455938);
        assert_eq!(item.z, 25.0);
        assert_eq!(item.command, MavCmd::MAV_CMD_NAV_WAYPOINT);

        let landing = build_item((1, 1), &waypoints(), 3);
        assert_eq!(landing.command, MavCmd::MAV_CMD_NAV_LAND);
        assert_eq!(landing.x, -470000000);
    }

    #[test]
    fn test_out_of_range_coordinates_clamp() {
        let wild = vec![Waypoint {
            latitude: 400.0,
            longitude: -400.0,
            altitude: 10.0,
            command: 16,
        }];
        let item = build_item((1, 1), &wild, 2);
        assert_eq!(item.x, i32::MAX);
        assert_eq!(item.y, i32::MIN);
    }

    #[test]
    fn test_unknown_command_falls_back_to_waypoint() {
        assert_eq!(nav_command(999), MavCmd::MAV_CMD_NAV_WAYPOINT);
        assert_eq!(nav_command(22), MavCmd::MAV_CMD_NAV_TAKEOFF);
    }
}
