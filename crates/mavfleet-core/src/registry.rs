//! Connection registry: drone id -> live session.
//!
//! The registry is the one piece of shared mutable state between the
//! per-drone operation tasks and the batch executor. Mutations go through
//! the write lock; lookups for an already-registered session are plain
//! reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::{DroneConfig, FleetConfig, FleetSettings};
use crate::error::{FleetError, LinkError};
use crate::link::LinkFactory;
use crate::session::Session;

/// Lifecycle and authorization gate for vehicle sessions.
pub struct Registry {
    drones: BTreeMap<String, DroneConfig>,
    settings: FleetSettings,
    dialer: Arc<dyn LinkFactory>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Registry {
    /// Build a registry over the configured drone table.
    pub fn new(config: &FleetConfig, dialer: Arc<dyn LinkFactory>) -> Self {
        Registry {
            drones: config.drones.clone(),
            settings: config.settings.clone(),
            dialer,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// All configured drone ids, in stable order.
    pub fn drone_ids(&self) -> Vec<String> {
        self.drones.keys().cloned().collect()
    }

    /// Live session for `drone_id`, if any.
    pub fn get(&self, drone_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(drone_id).cloned()
    }

    /// Live session or [`FleetError::UnknownDrone`]. Used by operations
    /// that require an established connection.
    pub fn require(&self, drone_id: &str) -> Result<Arc<Session>, FleetError> {
        self.get(drone_id)
            .ok_or_else(|| FleetError::UnknownDrone(drone_id.to_string()))
    }

    /// Connect to a drone. Idempotent: an existing live session is
    /// returned unchanged.
    ///
    /// A new session is stored only after the transport is up, the first
    /// heartbeat arrived within the configured bound, and the announced
    /// system id matched the configured one.
    pub async fn connect(&self, drone_id: &str) -> Result<Arc<Session>, FleetError> {
        if let Some(existing) = self.get(drone_id) {
            return Ok(existing);
        }

        let drone = self
            .drones
            .get(drone_id)
            .ok_or_else(|| FleetError::UnknownDrone(drone_id.to_string()))?
            .clone();

        debug!(drone_id, address = %drone.address, "dialing");
        let dialer = self.dialer.clone();
        let address = drone.address.clone();
        let link = tokio::task::spawn_blocking(move || dialer.dial(&address))
            .await
            .map_err(|e| FleetError::Link(LinkError::Io(format!("dial task failed: {e}"))))??;

        let session = Arc::new(
            Session::open(
                drone_id,
                link,
                drone.system_id,
                self.settings.heartbeat_timeout(),
            )
            .await?,
        );

        let (system, component) = session.target();
        info!(drone_id, system, component, "connected");

        // A concurrent connect may have raced us; the first insert wins
        // and the loser's session is dropped.
        let mut sessions = self.sessions.write();
        Ok(sessions
            .entry(drone_id.to_string())
            .or_insert(session)
            .clone())
    }

    /// Drop the session for `drone_id`, if any. Returns whether one
    /// existed.
    pub fn disconnect(&self, drone_id: &str) -> bool {
        let removed = self.sessions.write().remove(drone_id).is_some();
        if removed {
            info!(drone_id, "disconnected");
        }
        removed
    }

    /// Number of live sessions.
    pub fn connected_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Ids of currently connected drones, in stable order.
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
