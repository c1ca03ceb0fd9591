//! Best-effort telemetry polling.
//!
//! One poll requests the data stream and then waits once, bounded, for
//! each message kind: position is required (its absence is a timeout
//! error), status and GPS degrade to absent fields.

#[allow(deprecated)]
use mavlink::ardupilotmega::{MavMessage, REQUEST_DATA_STREAM_DATA};
use tracing::trace;

use crate::cancel::CancelToken;
use crate::config::FleetSettings;
use crate::error::FleetError;
use crate::session::Session;
use crate::types::Telemetry;

/// MAV_DATA_STREAM_ALL.
const STREAM_ALL: u8 = 0;

/// Poll one telemetry sample.
// ArduPilot still serves streams via the legacy REQUEST_DATA_STREAM.
#[allow(deprecated)]
pub async fn poll(
    session: &Session,
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<Telemetry, FleetError> {
    let (target_system, target_component) = session.target();
    let mut exchange = session.exchange().await;

    exchange.send(&MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
        req_message_rate: settings.stream_rate_hz,
        target_system,
        target_component,
        req_stream_id: STREAM_ALL,
        start_stop: 1,
    }))?;

    let position = exchange
        .recv_match(
            &format!("telemetry position from {}", session.drone_id()),
            settings.telemetry_timeout(),
            cancel,
            |_, msg| match msg {
                MavMessage::GLOBAL_POSITION_INT(p) => Some(p.clone()),
                _ => None,
            },
        )
        .await?;

    let mut sample = Telemetry {
        latitude: position.lat as f64 / 1e7,
        longitude: position.lon as f64 / 1e7,
        altitude: position.alt as f64 / 1000.0,
        relative_altitude: Some(position.relative_alt as f64 / 1000.0),
        heading: (position.hdg != u16::MAX).then(|| position.hdg as f64 / 100.0),
        ..Telemetry::default()
    };

    // Battery and GPS enrich the sample when the vehicle streams them in
    // time; a timeout here is not a failure.
    let status = exchange
        .recv_match(
            &format!("telemetry status from {}", session.drone_id()),
            settings.telemetry_timeout(),
            cancel,
            |_, msg| match msg {
                MavMessage::SYS_STATUS(s) => Some(s.battery_remaining),
                _ => None,
            },
        )
        .await;
    match status {
        Ok(battery) => sample.battery_remaining = (battery >= 0).then_some(battery),
        Err(FleetError::ProtocolTimeout { .. }) => {
            trace!(drone_id = session.drone_id(), "no SYS_STATUS in window")
        }
        Err(e) => return Err(e),
    }

    let gps = exchange
        .recv_match(
            &format!("telemetry gps from {}", session.drone_id()),
            settings.telemetry_timeout(),
            cancel,
            |_, msg| match msg {
                MavMessage::GPS_RAW_INT(g) => Some((g.fix_type as u8, g.vel)),
                _ => None,
            },
        )
        .await;
    match gps {
        Ok((fix_type, vel)) => {
            sample.gps_fix = Some(fix_type);
            sample.velocity = (vel != u16::MAX).then(|| vel as f64 / 100.0);
        }
        Err(FleetError::ProtocolTimeout { .. }) => {
            trace!(drone_id = session.drone_id(), "no GPS_RAW_INT in window")
        }
        Err(e) => return Err(e),
    }

    Ok(sample)
}
