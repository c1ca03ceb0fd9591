//! COMMAND_LONG construction and the command/ack exchange.

use std::time::Duration;

use mavlink::ardupilotmega::{MavCmd, MavMessage, MavResult, COMMAND_LONG_DATA};

use crate::cancel::CancelToken;
use crate::error::FleetError;
use crate::session::Exchange;

/// Build a COMMAND_LONG targeting the exchange's vehicle.
pub(crate) fn command_long(
    target: (u8, u8),
    command: MavCmd,
    params: [f32; 7],
) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        target_system: target.0,
        target_component: target.1,
        command,
        confirmation: 0,
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: params[3],
        param5: params[4],
        param6: params[5],
        param7: params[6],
    })
}

/// Send a command and wait for the ack whose command field matches.
/// Returns the raw result; use [`ensure_accepted`] when anything but
/// acceptance is an error.
pub(crate) async fn send_and_wait_ack(
    exchange: &mut Exchange<'_>,
    command: MavCmd,
    params: [f32; 7],
    state: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<MavResult, FleetError> {
    let msg = command_long(exchange.session().target(), command, params);
    exchange
        .request(&msg, state, timeout, cancel, |_, reply| match reply {
            MavMessage::COMMAND_ACK(ack) if ack.command == command => Some(ack.result),
            _ => None,
        })
        .await
}

/// Map a non-accepted result to [`FleetError::CommandRejected`].
pub(crate) fn ensure_accepted(command: MavCmd, result: MavResult) -> Result<(), FleetError> {
    if result == MavResult::MAV_RESULT_ACCEPTED {
        Ok(())
    } else {
        Err(FleetError::CommandRejected {
            command: format!("{command:?}"),
            result: format!("{result:?}"),
        })
    }
}

/// Send a command and require an accepted ack.
pub(crate) async fn send_and_ack(
    exchange: &mut Exchange<'_>,
    command: MavCmd,
    params: [f32; 7],
    state: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(), FleetError> {
    let result = send_and_wait_ack(exchange, command, params, state, timeout, cancel).await?;
    ensure_accepted(command, result)
}
