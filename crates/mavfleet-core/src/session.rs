//! Per-vehicle connection session and the request/reply exchange engine.
//!
//! A [`Session`] owns one physical link to one vehicle: a reader thread
//! decodes inbound messages into a bounded inbox, and all protocol
//! exchanges drain that inbox through a single [`Exchange`] handle at a
//! time. The wire carries no request/response correlation ids, so two
//! interleaved exchanges on one session could consume each other's
//! replies; the exchange lock is what rules that out.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mavlink::ardupilotmega::{MavMessage, MavModeFlag, HEARTBEAT_DATA};
use mavlink::{MavHeader, Message};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{trace, warn};

use crate::cancel::CancelToken;
use crate::error::{FleetError, LinkError};
use crate::link::{MavLink, GCS_COMPONENT_ID, GCS_SYSTEM_ID};
use crate::mode::ModeMap;

/// Inbox depth; the reader drops into backpressure beyond this.
const INBOX_DEPTH: usize = 256;

/// Liveness and vehicle state gleaned from passing heartbeats.
///
/// Updated by the reader thread regardless of which exchange (if any) is
/// currently draining the inbox.
#[derive(Debug, Default)]
pub struct SessionStatus {
    last_heartbeat: Mutex<Option<Instant>>,
    armed: AtomicBool,
    custom_mode: AtomicU32,
}

impl SessionStatus {
    fn observe_heartbeat(&self, hb: &HEARTBEAT_DATA) {
        *self.last_heartbeat.lock() = Some(Instant::now());
        let armed =
            hb.base_mode.bits() & MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED.bits() != 0;
        self.armed.store(armed, Ordering::Relaxed);
        self.custom_mode.store(hb.custom_mode, Ordering::Relaxed);
    }

    /// Armed bit from the most recent heartbeat.
    pub fn armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }

    /// Custom mode id from the most recent heartbeat.
    pub fn custom_mode(&self) -> u32 {
        self.custom_mode.load(Ordering::Relaxed)
    }

    /// Time since the last heartbeat, if one was ever seen.
    pub fn heartbeat_age(&self) -> Option<Duration> {
        self.last_heartbeat.lock().map(|at| at.elapsed())
    }
}

/// One live connection to one vehicle.
pub struct Session {
    drone_id: String,
    link: Arc<dyn MavLink>,
    inbox: AsyncMutex<mpsc::Receiver<(MavHeader, MavMessage)>>,
    status: Arc<SessionStatus>,
    target_system: u8,
    target_component: u8,
    mode_map: ModeMap,
    seq: AtomicU8,
}

impl Session {
    /// Open a session over an already-dialed link: start the reader,
    /// wait (bounded) for the first heartbeat, and authorize the
    /// announced system id against `expected_system`.
    ///
    /// On any failure nothing is left running except the reader thread,
    /// which exits once the link yields its next message or closes.
    pub async fn open(
        drone_id: &str,
        link: Arc<dyn MavLink>,
        expected_system: u8,
        first_heartbeat_timeout: Duration,
    ) -> Result<Session, FleetError> {
        let (tx, mut rx) = mpsc::channel(INBOX_DEPTH);
        let status = Arc::new(SessionStatus::default());
        spawn_reader(drone_id.to_string(), link.clone(), status.clone(), tx);

        let first = tokio::time::timeout(first_heartbeat_timeout, async {
            loop {
                match rx.recv().await {
                    Some((header, MavMessage::HEARTBEAT(hb))) => break Some((header, hb)),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .map_err(|_| FleetError::ProtocolTimeout {
            state: format!("waiting for first heartbeat from {drone_id}"),
        })?;

        let (header, heartbeat) = first.ok_or(FleetError::Link(LinkError::Closed))?;

        if header.system_id != expected_system {
            return Err(FleetError::UnauthorizedSystem {
                drone_id: drone_id.to_string(),
                expected: expected_system,
                actual: header.system_id,
            });
        }

        status.observe_heartbeat(&heartbeat);
        trace!(
            drone_id,
            system_id = header.system_id,
            component_id = header.component_id,
            vehicle_type = ?heartbeat.mavtype,
            "session established"
        );

        Ok(Session {
            drone_id: drone_id.to_string(),
            link,
            inbox: AsyncMutex::new(rx),
            status,
            target_system: header.system_id,
            target_component: header.component_id,
            mode_map: ModeMap::for_vehicle(heartbeat.mavtype),
            seq: AtomicU8::new(0),
        })
    }

    /// Drone this session belongs to.
    pub fn drone_id(&self) -> &str {
        &self.drone_id
    }

    /// Vehicle addressing pair for targeted messages.
    pub fn target(&self) -> (u8, u8) {
        (self.target_system, self.target_component)
    }

    /// Liveness/armed/mode cache maintained by the reader.
    pub fn status(&self) -> &SessionStatus {
        self.status.as_ref()
    }

    /// Mode table for this vehicle class.
    pub fn mode_map(&self) -> &ModeMap {
        &self.mode_map
    }

    fn next_header(&self) -> MavHeader {
        MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Transmit one message with this station's header.
    pub fn send(&self, msg: &MavMessage) -> Result<(), LinkError> {
        self.link.send(&self.next_header(), msg)
    }

    /// Acquire the session's single request/reply handle.
    ///
    /// Waits until no other exchange is in flight; operations on the same
    /// drone therefore serialize here.
    pub async fn exchange(&self) -> Exchange<'_> {
        Exchange {
            inbox: self.inbox.lock().await,
            session: self,
        }
    }
}

/// Reader thread: drain the link into the inbox until either side closes.
fn spawn_reader(
    drone_id: String,
    link: Arc<dyn MavLink>,
    status: Arc<SessionStatus>,
    tx: mpsc::Sender<(MavHeader, MavMessage)>,
) {
    std::thread::Builder::new()
        .name(format!("mav-rx-{drone_id}"))
        .spawn(move || {
            loop {
                match link.recv() {
                    Ok((header, msg)) => {
                        if let MavMessage::HEARTBEAT(hb) = &msg {
                            status.observe_heartbeat(hb);
                        }
                        if tx.blocking_send((header, msg)).is_err() {
                            // Session dropped; nobody is listening.
                            break;
                        }
                    }
                    Err(LinkError::Closed) => break,
                    Err(e) => {
                        warn!(drone_id, error = %e, "link read failed, stopping reader");
                        break;
                    }
                }
            }
            trace!(drone_id, "reader stopped");
        })
        .expect("spawn link reader thread");
}

/// Exclusive request/reply handle for one session.
///
/// Send one or more messages, then [`Exchange::recv_match`] replies:
/// incoming messages are matched by type plus field predicate and
/// non-matching traffic is discarded, because that is all the correlation
/// the protocol offers.
pub struct Exchange<'a> {
    inbox: tokio::sync::MutexGuard<'a, mpsc::Receiver<(MavHeader, MavMessage)>>,
    session: &'a Session,
}

impl Exchange<'_> {
    /// The session this exchange locks.
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Transmit one message.
    pub fn send(&self, msg: &MavMessage) -> Result<(), FleetError> {
        self.session.send(msg).map_err(FleetError::from)
    }

    /// Receive until `matcher` yields a value, discarding everything
    /// else. `state` labels this wait in timeout and cancel errors, so a
    /// failure mid-sequence tells the caller exactly where the protocol
    /// stopped.
    pub async fn recv_match<T>(
        &mut self,
        state: &str,
        timeout: Duration,
        cancel: &CancelToken,
        mut matcher: impl FnMut(&MavHeader, &MavMessage) -> Option<T>,
    ) -> Result<T, FleetError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FleetError::ProtocolTimeout {
                    state: state.to_string(),
                });
            }
            tokio::select! {
                _ = cancel.canceled() => {
                    return Err(FleetError::Canceled { state: state.to_string() });
                }
                received = tokio::time::timeout(remaining, self.inbox.recv()) => {
                    match received {
                        Err(_) => {
                            return Err(FleetError::ProtocolTimeout {
                                state: state.to_string(),
                            });
                        }
                        Ok(None) => return Err(FleetError::Link(LinkError::Closed)),
                        Ok(Some((header, msg))) => {
                            if let Some(value) = matcher(&header, &msg) {
                                return Ok(value);
                            }
                            trace!(msg_id = msg.message_id(), "discarded unmatched message");
                        }
                    }
                }
            }
        }
    }

    /// Send `msg`, then await a matching reply.
    pub async fn request<T>(
        &mut self,
        msg: &MavMessage,
        state: &str,
        timeout: Duration,
        cancel: &CancelToken,
        matcher: impl FnMut(&MavHeader, &MavMessage) -> Option<T>,
    ) -> Result<T, FleetError> {
        self.send(msg)?;
        self.recv_match(state, timeout, cancel, matcher).await
    }
}
