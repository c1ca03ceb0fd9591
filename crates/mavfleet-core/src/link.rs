//! Transport seam over the MAVLink wire codec.
//!
//! The wire codec itself (message encode/decode, framing, signing) is the
//! `mavlink` crate's job; this module only abstracts *where* decoded
//! messages come from, so the registry can dial real TCP/UDP/serial links
//! in production and tests can inject in-memory ones.

use std::sync::Arc;

use mavlink::ardupilotmega::MavMessage;
use mavlink::{MavConnection, MavHeader};

use crate::error::LinkError;

/// System id this layer presents on the wire. 255 is the conventional
/// ground-station id, which autopilots accept commands from.
pub const GCS_SYSTEM_ID: u8 = 255;

/// Component id this layer presents on the wire.
pub const GCS_COMPONENT_ID: u8 = 0;

/// One physical MAVLink link to one vehicle.
///
/// `recv` blocks until the next decoded message; the session layer runs
/// it on a dedicated reader thread and never calls it from async context.
pub trait MavLink: Send + Sync {
    /// Encode and transmit one message.
    fn send(&self, header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError>;

    /// Block until the next decoded message or a fatal transport error.
    fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError>;
}

/// Dials links by address string. The registry holds one of these;
/// substituting it is how tests run against scripted vehicles.
pub trait LinkFactory: Send + Sync {
    /// Open a link to `address` (blocking).
    fn dial(&self, address: &str) -> Result<Arc<dyn MavLink>, LinkError>;
}

/// Production link over `mavlink::connect` address strings
/// ("tcpout:host:port", "udpin:host:port", "serial:/dev/...:baud").
struct DialedLink {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
}

impl MavLink for DialedLink {
    fn send(&self, header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError> {
        self.conn
            .send(header, msg)
            .map(|_| ())
            .map_err(|e| LinkError::Io(e.to_string()))
    }

    fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError> {
        self.conn.recv().map_err(|e| LinkError::Io(e.to_string()))
    }
}

/// The default [`LinkFactory`], backed by `mavlink::connect`.
#[derive(Debug, Default)]
pub struct MavlinkDialer;

impl LinkFactory for MavlinkDialer {
    fn dial(&self, address: &str) -> Result<Arc<dyn MavLink>, LinkError> {
        let conn = mavlink::connect::<MavMessage>(address).map_err(|source| LinkError::Connect {
            address: address.to_string(),
            source,
        })?;
        Ok(Arc::new(DialedLink { conn }))
    }
}
