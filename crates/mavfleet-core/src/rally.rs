//! Rally point upload.
//!
//! Same count-negotiation-then-per-item shape as the fence, with two
//! differences: coordinates travel as 1e7-scaled integers, and there is
//! no breach-action parameter to park while editing.

use mavlink::ardupilotmega::{MavMessage, RALLY_FETCH_POINT_DATA, RALLY_POINT_DATA};
use serde::Serialize;
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::config::FleetSettings;
use crate::error::FleetError;
use crate::param;
use crate::session::Session;
use crate::types::{scale_degrees_e7, RallyPoint};

const RALLY_TOTAL: &str = "RALLY_TOTAL";

/// What a completed rally upload did.
#[derive(Debug, Clone, Serialize)]
pub struct RallySummary {
    /// Number of rally points uploaded and verified.
    pub points: usize,
}

/// Upload rally points, each verified by an exact fetch-back echo.
pub async fn upload(
    session: &Session,
    points: &[RallyPoint],
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<RallySummary, FleetError> {
    let count = points.len();
    let (target_system, target_component) = session.target();
    let mut exchange = session.exchange().await;

    param::set_param_verified(
        &mut exchange,
        RALLY_TOTAL,
        count as f32,
        settings.param_retry_limit,
        settings.ack_timeout(),
        cancel,
        &format!(
            "negotiating RALLY_TOTAL={count} on {}",
            session.drone_id()
        ),
    )
    .await?;
    debug!(drone_id = session.drone_id(), count, "rally upload started");

    for (idx, point) in points.iter().enumerate() {
        let idx = idx as u8;
        let lat = scale_degrees_e7(point.lat);
        let lng = scale_degrees_e7(point.lng);
        let state = format!(
            "rally point {}/{count} echo on {}",
            idx + 1,
            session.drone_id()
        );

        let mut verified = false;
        for _attempt in 0..settings.param_retry_limit.max(1) {
            exchange.send(&MavMessage::RALLY_POINT(RALLY_POINT_DATA {
                lat,
                lng,
                alt: point.alt,
                break_alt: 0,
                land_dir: 0,
                target_system,
                target_component,
                idx,
                count: count as u8,
                ..Default::default()
            }))?;

            let matches = exchange
                .request(
                    &MavMessage::RALLY_FETCH_POINT(RALLY_FETCH_POINT_DATA {
                        target_system,
                        target_component,
                        idx,
                    }),
                    &state,
                    settings.ack_timeout(),
                    cancel,
                    |_, reply| match reply {
                        MavMessage::RALLY_POINT(rp) if rp.idx == idx => Some(
                            rp.count == count as u8
                                && rp.lat == lat
                                && rp.lng == lng
                                && rp.alt == point.alt,
                        ),
                        _ => None,
                    },
                )
                .await?;

            if matches {
                verified = true;
                trace!(drone_id = session.drone_id(), idx, "rally point verified");
                break;
            }
            debug!(idx, "rally point echo mismatch, resending");
        }

        if !verified {
            return Err(FleetError::ParameterMismatch {
                name: format!("rally point {idx}"),
                sent: lat as f32,
                got: f32::NAN,
            });
        }
    }

    debug!(drone_id = session.drone_id(), count, "rally upload complete");
    Ok(RallySummary { points: count })
}
