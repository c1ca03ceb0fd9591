//! Arm and disarm handshakes.
//!
//! Arming is acknowledged in two stages: the command ack says the vehicle
//! will try, and only a heartbeat with the armed bit set says it
//! happened. A single rejection is commonly transient (prearm checks
//! still settling), so the command is resent after a fixed back-off, up
//! to the configured attempt limit.

use mavlink::ardupilotmega::{MavCmd, MavMessage, MavModeFlag, MavResult};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::command;
use crate::config::FleetSettings;
use crate::error::FleetError;
use crate::session::Session;

const ARM: f32 = 1.0;
const DISARM: f32 = 0.0;

/// Arm the vehicle and wait until a heartbeat shows the armed bit.
pub async fn arm(
    session: &Session,
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<(), FleetError> {
    let mut exchange = session.exchange().await;
    let mut last_result = None;

    for attempt in 1..=settings.arm_retry_limit.max(1) {
        let result = command::send_and_wait_ack(
            &mut exchange,
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [ARM, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &format!("arm command ack on {}", session.drone_id()),
            settings.ack_timeout(),
            cancel,
        )
        .await?;

        if result == MavResult::MAV_RESULT_ACCEPTED {
            debug!(
                drone_id = session.drone_id(),
                attempt, "arm accepted, waiting for armed heartbeat"
            );
            exchange
                .recv_match(
                    &format!(
                        "arm on {}: accepted, waiting for armed heartbeat",
                        session.drone_id()
                    ),
                    settings.operation_deadline(),
                    cancel,
                    |_, msg| match msg {
                        MavMessage::HEARTBEAT(hb)
                            if hb.base_mode.bits()
                                & MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED.bits()
                                != 0 =>
                        {
                            Some(())
                        }
                        _ => None,
                    },
                )
                .await?;
            info!(drone_id = session.drone_id(), "vehicle armed");
            return Ok(());
        }

        last_result = Some(result);
        debug!(
            drone_id = session.drone_id(),
            attempt,
            limit = settings.arm_retry_limit,
            result = ?result,
            "arm rejected, backing off"
        );
        tokio::select! {
            _ = cancel.canceled() => {
                return Err(FleetError::Canceled {
                    state: format!("arm on {}: backing off after rejection", session.drone_id()),
                });
            }
            _ = tokio::time::sleep(settings.arm_retry_backoff()) => {}
        }
    }

    Err(FleetError::CommandRejected {
        command: format!("{:?}", MavCmd::MAV_CMD_COMPONENT_ARM_DISARM),
        result: last_result
            .map(|r| format!("{r:?}"))
            .unwrap_or_else(|| "no ack".to_string()),
    })
}

/// Disarm the vehicle (single command/ack).
pub async fn disarm(
    session: &Session,
    settings: &FleetSettings,
    cancel: &CancelToken,
) -> Result<(), FleetError> {
    let mut exchange = session.exchange().await;
    command::send_and_ack(
        &mut exchange,
        MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
        [DISARM, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        &format!("disarm command ack on {}", session.drone_id()),
        settings.ack_timeout(),
        cancel,
    )
    .await?;
    info!(drone_id = session.drone_id(), "vehicle disarmed");
    Ok(())
}
