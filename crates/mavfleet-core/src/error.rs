//! Fleet error types.

use thiserror::Error;

/// Errors surfaced by fleet operations.
///
/// Single-drone operations return these directly; batch operations record
/// them per drone id and never let one drone's failure cross the batch
/// boundary.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Drone id is not configured, or no live session exists for it.
    #[error("unknown drone: {0}")]
    UnknownDrone(String),

    /// No mission with this name exists in the configuration.
    #[error("unknown mission: {0}")]
    UnknownMission(String),

    /// The vehicle announced a system id other than the configured one.
    #[error("unauthorized system for {drone_id}: expected {expected}, vehicle announced {actual}")]
    UnauthorizedSystem {
        /// Drone id the connection was opened for.
        drone_id: String,
        /// System id configured for this drone.
        expected: u8,
        /// System id the vehicle actually announced.
        actual: u8,
    },

    /// An expected reply did not arrive within the bound.
    ///
    /// `state` describes how far the protocol sequence got, e.g.
    /// "fence upload: 2/3 points verified, FENCE_ACTION not restored".
    #[error("protocol timeout while {state}")]
    ProtocolTimeout {
        /// Description of the protocol state at the time of the timeout.
        state: String,
    },

    /// A command ack arrived with a non-accepted result.
    #[error("command {command} rejected: {result}")]
    CommandRejected {
        /// Command that was rejected.
        command: String,
        /// Result code reported by the vehicle.
        result: String,
    },

    /// Mode name is absent from the vehicle's mode map.
    ///
    /// Fatal for the operation: retrying with the same name cannot succeed.
    #[error("unsupported flight mode: {0}")]
    UnsupportedMode(String),

    /// Mission ack type was not "accepted".
    #[error("mission rejected by vehicle: {0}")]
    MissionRejected(String),

    /// The echoed parameter or point kept differing from the requested
    /// value after the configured number of attempts.
    #[error("parameter mismatch on {name}: sent {sent}, vehicle kept {got}")]
    ParameterMismatch {
        /// Parameter or point being negotiated.
        name: String,
        /// Value that was requested.
        sent: f32,
        /// Last value the vehicle echoed.
        got: f32,
    },

    /// Operation was canceled; `state` describes where the sequence stopped.
    #[error("operation canceled while {state}")]
    Canceled {
        /// Description of the protocol state at cancellation.
        state: String,
    },

    /// A mission plan failed validation before any message was sent.
    #[error("invalid mission plan: {0}")]
    InvalidPlan(String),

    /// Transport-level failure.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Transport errors below the protocol layer.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Opening the transport failed.
    #[error("failed to open link to {address}: {source}")]
    Connect {
        /// Address string that was dialed.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Read or write on an open link failed.
    #[error("link i/o error: {0}")]
    Io(String),

    /// The link (or its reader) has shut down.
    #[error("link closed")]
    Closed,
}
