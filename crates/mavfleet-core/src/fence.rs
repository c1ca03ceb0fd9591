//! Geofence upload and fence enable.
//!
//! Fence points are negotiated parameter-style: FENCE_TOTAL announces the
//! count, then each vertex is written with FENCE_POINT and read back with
//! FENCE_FETCH_POINT until the echo matches exactly. The vehicle's
//! FENCE_ACTION is disabled for the duration of the edit so a half-drawn
//! polygon cannot trigger a breach action, and restored (verified) after
//! the last point.

use mavlink::ardupilotmega::{
    MavCmd, MavMessage, FENCE_FETCH_POINT_DATA, FENCE_POINT_DATA,
};
use serde::Serialize;
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::command;
use crate::config::FleetSettings;
use crate::error::FleetError;
use crate::param;
use crate::session::Session;
use crate::types::{FenceEnableMode, FencePoint};

const FENCE_ACTION: &str = "FENCE_ACTION";
const FENCE_TOTAL: &str = "FENCE_TOTAL";

/// FENCE_ACTION value that disables breach reactions.
const FENCE_ACTION_NONE: f32 = 0.0;

/// What a completed fence upload did.
#[derive(Debug, Clone, Serialize)]
pub struct FenceSummary {
    /// Number of vertices uploaded and verified.
    pub points: usize,
    /// FENCE_ACTION value found before the upload and restored after it.
    pub restored_action: i32,
}

/// Upload a fence polygon, preserving the vehicle's breach action.
pub async fn upload(
    session: &Session,
    points: &[FencePoint],
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<FenceSummary, FleetError> {
    let count = points.len();
    let (target_system, target_component) = session.target();
    let mut exchange = session.exchange().await;

    let original_action = param::read_param(
        &mut exchange,
        FENCE_ACTION,
        settings.ack_timeout(),
        cancel,
    )
    .await?;
    debug!(
        drone_id = session.drone_id(),
        original_action, "fence upload started, disabling FENCE_ACTION"
    );

    param::set_param_verified(
        &mut exchange,
        FENCE_ACTION,
        FENCE_ACTION_NONE,
        settings.param_retry_limit,
        settings.ack_timeout(),
        cancel,
        &format!("disabling FENCE_ACTION on {}", session.drone_id()),
    )
    .await?;

    // From here on every early return leaves FENCE_ACTION disabled; the
    // state strings say so, so the caller knows what to re-derive.
    let unrestored = format!("FENCE_ACTION not restored (original {original_action})");

    param::set_param_verified(
        &mut exchange,
        FENCE_TOTAL,
        count as f32,
        settings.param_retry_limit,
        settings.ack_timeout(),
        cancel,
        &format!(
            "negotiating FENCE_TOTAL={count} on {}; {unrestored}",
            session.drone_id()
        ),
    )
    .await?;

    for (idx, point) in points.iter().enumerate() {
        upload_point(
            &mut exchange,
            (target_system, target_component),
            idx as u8,
            count as u8,
            *point,
            settings,
            cancel,
            &unrestored,
        )
        .await?;
        trace!(drone_id = session.drone_id(), idx, "fence point verified");
    }

    param::set_param_verified(
        &mut exchange,
        FENCE_ACTION,
        original_action,
        settings.param_retry_limit,
        settings.ack_timeout(),
        cancel,
        &format!("restoring FENCE_ACTION on {}", session.drone_id()),
    )
    .await?;

    debug!(
        drone_id = session.drone_id(),
        count, "fence upload complete, FENCE_ACTION restored"
    );
    Ok(FenceSummary {
        points: count,
        restored_action: original_action as i32,
    })
}

/// Write one vertex and verify its echo, resending the same index until
/// the echo matches or attempts run out.
#[allow(clippy::too_many_arguments)]
async fn upload_point(
    exchange: &mut crate::session::Exchange<'_>,
    target: (u8, u8),
    idx: u8,
    count: u8,
    point: FencePoint,
    settings: &FleetSettings,
    cancel: &CancelToken,
    unrestored: &str,
) -> Result<(), FleetError> {
    let state = format!(
        "fence point {}/{count} echo on {}; {unrestored}",
        idx + 1,
        exchange.session().drone_id()
    );

    let mut last = None;
    for _attempt in 0..settings.param_retry_limit.max(1) {
        exchange.send(&MavMessage::FENCE_POINT(FENCE_POINT_DATA {
            target_system: target.0,
            target_component: target.1,
            idx,
            count,
            lat: point.lat,
            lng: point.lng,
        }))?;

        let echo = exchange
            .request(
                &MavMessage::FENCE_FETCH_POINT(FENCE_FETCH_POINT_DATA {
                    target_system: target.0,
                    target_component: target.1,
                    idx,
                }),
                &state,
                settings.ack_timeout(),
                cancel,
                |_, reply| match reply {
                    MavMessage::FENCE_POINT(fp) if fp.idx == idx => Some((fp.lat, fp.lng)),
                    _ => None,
                },
            )
            .await?;

        if echo == (point.lat, point.lng) {
            return Ok(());
        }
        last = Some(echo);
        debug!(idx, ?echo, "fence point echo mismatch, resending");
    }

    let (lat, _lng) = last.unwrap_or((f32::NAN, f32::NAN));
    Err(FleetError::ParameterMismatch {
        name: format!("fence point {idx}"),
        sent: point.lat,
        got: lat,
    })
}

/// Switch the fence on or off via DO_FENCE_ENABLE, requiring an accepted
/// ack.
pub async fn enable(
    session: &Session,
    mode: FenceEnableMode,
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<(), FleetError> {
    let mut exchange = session.exchange().await;
    command::send_and_ack(
        &mut exchange,
        MavCmd::MAV_CMD_DO_FENCE_ENABLE,
        [mode.as_param(), 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        &format!("fence enable ({mode:?}) on {}", session.drone_id()),
        settings.ack_timeout(),
        cancel,
    )
    .await
}
