//! Parameter read and verified-set primitives.
//!
//! ArduPilot parameters are negotiated by echo: a PARAM_SET is confirmed
//! only when a PARAM_VALUE comes back carrying the same name and value.
//! Values for the parameters this layer touches (counts, action codes,
//! option bitmasks) are integral, so echo comparison is on the integer
//! value like the reference ground stations do.

use std::time::Duration;

use mavlink::ardupilotmega::{
    MavMessage, MavParamType, PARAM_REQUEST_READ_DATA, PARAM_SET_DATA,
};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::FleetError;
use crate::session::Exchange;

/// Fixed width of parameter identifiers on the wire.
pub const PARAM_ID_LEN: usize = 16;

/// Encode a parameter name as the wire's fixed-width, NUL-padded id.
pub fn encode_param_id(name: &str) -> [u8; PARAM_ID_LEN] {
    let mut id = [0u8; PARAM_ID_LEN];
    for (slot, byte) in id.iter_mut().zip(name.bytes()) {
        *slot = byte;
    }
    id
}

/// Decode a wire parameter id, trimming NUL padding.
pub fn decode_param_id(raw: &[u8; PARAM_ID_LEN]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(PARAM_ID_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn int_value(value: f32) -> i64 {
    value as i64
}

/// Read one parameter's current value.
pub async fn read_param(
    exchange: &mut Exchange<'_>,
    name: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<f32, FleetError> {
    let (target_system, target_component) = exchange.session().target();
    let msg = MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
        target_system,
        target_component,
        param_id: encode_param_id(name),
        param_index: -1,
    });
    exchange
        .request(
            &msg,
            &format!("reading parameter {name}"),
            timeout,
            cancel,
            |_, reply| match reply {
                MavMessage::PARAM_VALUE(pv) if decode_param_id(&pv.param_id) == name => {
                    Some(pv.param_value)
                }
                _ => None,
            },
        )
        .await
}

/// Set a parameter and verify the echoed value, resending on mismatch up
/// to `attempts` times.
///
/// `state` describes the surrounding protocol sequence for timeout and
/// cancel errors.
pub async fn set_param_verified(
    exchange: &mut Exchange<'_>,
    name: &str,
    value: f32,
    attempts: u32,
    timeout: Duration,
    cancel: &CancelToken,
    state: &str,
) -> Result<(), FleetError> {
    let (target_system, target_component) = exchange.session().target();
    let msg = MavMessage::PARAM_SET(PARAM_SET_DATA {
        target_system,
        target_component,
        param_id: encode_param_id(name),
        param_value: value,
        param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
    });

    let mut last_echo = f32::NAN;
    for attempt in 1..=attempts.max(1) {
        let echoed = exchange
            .request(&msg, state, timeout, cancel, |_, reply| match reply {
                MavMessage::PARAM_VALUE(pv) if decode_param_id(&pv.param_id) == name => {
                    Some(pv.param_value)
                }
                _ => None,
            })
            .await?;

        if int_value(echoed) == int_value(value) {
            return Ok(());
        }
        last_echo = echoed;
        debug!(
            param = name,
            requested = value,
            echoed,
            attempt,
            attempts,
            "parameter echo mismatch, resending"
        );
    }

    Err(FleetError::ParameterMismatch {
        name: name.to_string(),
        sent: value,
        got: last_echo,
    })
}
