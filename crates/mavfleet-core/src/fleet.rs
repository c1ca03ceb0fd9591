//! Fleet facade: the operation surface consumed by the endpoint layers,
//! plus the batch executor that runs any single-drone operation across
//! the fleet.
//!
//! Batch runs isolate failures per drone: one vehicle's error lands in
//! the `failed` partition and never aborts or delays the others beyond
//! the configured inter-operation stagger.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::arm;
use crate::cancel::CancelToken;
use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::fence::{self, FenceSummary};
use crate::link::{LinkFactory, MavlinkDialer};
use crate::mission::{self, MissionSummary};
use crate::mode::{self, ModeChange};
use crate::param;
use crate::rally::{self, RallySummary};
use crate::registry::Registry;
use crate::telemetry;
use crate::types::{FenceEnableMode, FencePoint, MissionPlan, RallyPoint, Telemetry, Waypoint};

/// ArduPilot option bitmask letting AUTO missions arm and take off on
/// mode entry (bits 0..2).
const AUTO_OPTIONS: &str = "AUTO_OPTIONS";
const AUTO_OPTIONS_VALUE: f32 = 7.0;

/// Result partition of a fleet-wide operation.
///
/// `succeeded` and `failed` are disjoint and together cover exactly the
/// input drone-id set.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    /// Drone id -> operation result.
    pub succeeded: BTreeMap<String, T>,
    /// Drone id -> error description.
    pub failed: BTreeMap<String, String>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        BatchResult {
            succeeded: BTreeMap::new(),
            failed: BTreeMap::new(),
        }
    }
}

impl<T> BatchResult<T> {
    /// Whether every drone succeeded.
    pub fn is_fully_successful(&self) -> bool {
        self.failed.is_empty()
    }

    /// Total number of drones covered.
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Whether the batch covered no drones at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a connect operation.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectSummary {
    /// System id the vehicle announced.
    pub system_id: u8,
    /// Component id the vehicle announced.
    pub component_id: u8,
}

struct FleetInner {
    config: FleetConfig,
    registry: Registry,
    cancel: CancelToken,
}

/// Handle to the fleet. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Fleet {
    inner: Arc<FleetInner>,
}

impl Fleet {
    /// Fleet over real MAVLink transports.
    pub fn new(config: FleetConfig) -> Self {
        Self::new_with(config, Arc::new(MavlinkDialer), CancelToken::never())
    }

    /// Fleet with an injected link factory and cancellation token.
    pub fn new_with(
        config: FleetConfig,
        dialer: Arc<dyn LinkFactory>,
        cancel: CancelToken,
    ) -> Self {
        let registry = Registry::new(&config, dialer);
        Fleet {
            inner: Arc::new(FleetInner {
                config,
                registry,
                cancel,
            }),
        }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// The configuration this fleet was built from.
    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    // ========================================================================
    // Batch executor
    // ========================================================================

    /// Run `op` once per drone id, partitioning outcomes.
    ///
    /// Tasks run concurrently, with starts staggered by the configured
    /// separation so fleet-wide commands (arming especially) do not land
    /// on every vehicle in the same instant.
    pub async fn run_for_all<T, F, Fut>(&self, ids: Vec<String>, op: F) -> BatchResult<T>
    where
        T: Send + 'static,
        F: Fn(Fleet, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FleetError>> + Send + 'static,
    {
        let op = Arc::new(op);
        let delay = self.inner.config.settings.separation();
        let mut tasks: JoinSet<(String, Result<T, FleetError>)> = JoinSet::new();

        for (index, drone_id) in ids.iter().cloned().enumerate() {
            let fleet = self.clone();
            let op = Arc::clone(&op);
            tasks.spawn(async move {
                if index > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay * index as u32).await;
                }
                let outcome = op(fleet, drone_id.clone()).await;
                (drone_id, outcome)
            });
        }

        let mut result = BatchResult::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(value))) => {
                    result.succeeded.insert(id, value);
                }
                Ok((id, Err(error))) => {
                    debug!(drone_id = %id, %error, "batch operation failed for drone");
                    result.failed.insert(id, error.to_string());
                }
                Err(join_error) => {
                    warn!(%join_error, "batch operation task failed");
                }
            }
        }

        // A panicked task never reported its id; re-derive it so the
        // partition still covers the whole input set.
        for id in ids {
            if !result.succeeded.contains_key(&id) && !result.failed.contains_key(&id) {
                result.failed.insert(id, "operation task failed".to_string());
            }
        }
        result
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connect one drone (idempotent).
    pub async fn connect(&self, drone_id: &str) -> Result<ConnectSummary, FleetError> {
        let session = self.inner.registry.connect(drone_id).await?;
        let (system_id, component_id) = session.target();
        Ok(ConnectSummary {
            system_id,
            component_id,
        })
    }

    /// Connect every configured drone.
    pub async fn connect_all(&self) -> BatchResult<ConnectSummary> {
        let ids = self.inner.registry.drone_ids();
        self.run_for_all(ids, |fleet, id| async move { fleet.connect(&id).await })
            .await
    }

    /// Drop one drone's session.
    pub fn disconnect(&self, drone_id: &str) -> bool {
        self.inner.registry.disconnect(drone_id)
    }

    // ========================================================================
    // Missions
    // ========================================================================

    /// Upload a waypoint mission to one drone.
    pub async fn upload_mission(
        &self,
        drone_id: &str,
        waypoints: Vec<Waypoint>,
    ) -> Result<MissionSummary, FleetError> {
        let plan = MissionPlan::new(drone_id, waypoints)?;
        let session = self.inner.registry.require(drone_id)?;
        mission::upload(
            &session,
            plan.waypoints(),
            &self.inner.config.settings,
            &self.inner.cancel,
        )
        .await
    }

    /// Upload a configured mission to every connected drone.
    pub async fn upload_mission_all(
        &self,
        mission_name: &str,
    ) -> Result<BatchResult<MissionSummary>, FleetError> {
        let waypoints = self.mission_waypoints(mission_name)?;
        let ids = self.inner.registry.connected_ids();
        Ok(self
            .run_for_all(ids, move |fleet, id| {
                let waypoints = waypoints.clone();
                async move { fleet.upload_mission(&id, waypoints).await }
            })
            .await)
    }

    /// Upload, switch to AUTO, set the auto-start options and arm: the
    /// full "start flying this mission" sequence.
    pub async fn start_mission(
        &self,
        drone_id: &str,
        waypoints: Vec<Waypoint>,
    ) -> Result<MissionSummary, FleetError> {
        let summary = self.upload_mission(drone_id, waypoints).await?;
        let session = self.inner.registry.require(drone_id)?;
        let settings = &self.inner.config.settings;

        mode::set_mode(&session, "AUTO", settings, &self.inner.cancel).await?;
        {
            let mut exchange = session.exchange().await;
            param::set_param_verified(
                &mut exchange,
                AUTO_OPTIONS,
                AUTO_OPTIONS_VALUE,
                settings.param_retry_limit,
                settings.ack_timeout(),
                &self.inner.cancel,
                &format!("setting {AUTO_OPTIONS} on {drone_id}"),
            )
            .await?;
        }
        arm::arm(&session, settings, &self.inner.cancel).await?;
        Ok(summary)
    }

    /// Start a configured mission on every connected drone.
    pub async fn start_mission_all(
        &self,
        mission_name: &str,
    ) -> Result<BatchResult<MissionSummary>, FleetError> {
        let waypoints = self.mission_waypoints(mission_name)?;
        let ids = self.inner.registry.connected_ids();
        Ok(self
            .run_for_all(ids, move |fleet, id| {
                let waypoints = waypoints.clone();
                async move { fleet.start_mission(&id, waypoints).await }
            })
            .await)
    }

    fn mission_waypoints(&self, mission_name: &str) -> Result<Vec<Waypoint>, FleetError> {
        self.inner
            .config
            .missions
            .get(mission_name)
            .cloned()
            .ok_or_else(|| FleetError::UnknownMission(mission_name.to_string()))
    }

    // ========================================================================
    // Fence and rally
    // ========================================================================

    /// Upload a fence polygon to one drone.
    pub async fn set_fence(
        &self,
        drone_id: &str,
        points: Vec<FencePoint>,
    ) -> Result<FenceSummary, FleetError> {
        let session = self.inner.registry.require(drone_id)?;
        fence::upload(
            &session,
            &points,
            &self.inner.config.settings,
            &self.inner.cancel,
        )
        .await
    }

    /// Upload a fence polygon to every connected drone.
    pub async fn set_fence_all(&self, points: Vec<FencePoint>) -> BatchResult<FenceSummary> {
        let ids = self.inner.registry.connected_ids();
        self.run_for_all(ids, move |fleet, id| {
            let points = points.clone();
            async move { fleet.set_fence(&id, points).await }
        })
        .await
    }

    /// Switch one drone's fence on or off.
    pub async fn enable_fence(
        &self,
        drone_id: &str,
        mode: FenceEnableMode,
    ) -> Result<(), FleetError> {
        let session = self.inner.registry.require(drone_id)?;
        fence::enable(
            &session,
            mode,
            &self.inner.config.settings,
            &self.inner.cancel,
        )
        .await
    }

    /// Switch every connected drone's fence on or off.
    pub async fn enable_fence_all(&self, mode: FenceEnableMode) -> BatchResult<()> {
        let ids = self.inner.registry.connected_ids();
        self.run_for_all(ids, move |fleet, id| async move {
            fleet.enable_fence(&id, mode).await
        })
        .await
    }

    /// Upload rally points to one drone.
    pub async fn set_rally(
        &self,
        drone_id: &str,
        points: Vec<RallyPoint>,
    ) -> Result<RallySummary, FleetError> {
        let session = self.inner.registry.require(drone_id)?;
        rally::upload(
            &session,
            &points,
            &self.inner.config.settings,
            &self.inner.cancel,
        )
        .await
    }

    /// Upload rally points to every connected drone.
    pub async fn set_rally_all(&self, points: Vec<RallyPoint>) -> BatchResult<RallySummary> {
        let ids = self.inner.registry.connected_ids();
        self.run_for_all(ids, move |fleet, id| {
            let points = points.clone();
            async move { fleet.set_rally(&id, points).await }
        })
        .await
    }

    // ========================================================================
    // Mode, arming
    // ========================================================================

    /// Change one drone's flight mode.
    pub async fn set_mode(
        &self,
        drone_id: &str,
        mode_name: &str,
    ) -> Result<ModeChange, FleetError> {
        let session = self.inner.registry.require(drone_id)?;
        mode::set_mode(
            &session,
            mode_name,
            &self.inner.config.settings,
            &self.inner.cancel,
        )
        .await
    }

    /// Change every connected drone's flight mode.
    pub async fn set_mode_all(&self, mode_name: &str) -> BatchResult<ModeChange> {
        let ids = self.inner.registry.connected_ids();
        let mode_name = mode_name.to_string();
        self.run_for_all(ids, move |fleet, id| {
            let mode_name = mode_name.clone();
            async move { fleet.set_mode(&id, &mode_name).await }
        })
        .await
    }

    /// Arm one drone (persistent across transient rejections).
    pub async fn arm(&self, drone_id: &str) -> Result<(), FleetError> {
        let session = self.inner.registry.require(drone_id)?;
        arm::arm(&session, &self.inner.config.settings, &self.inner.cancel).await
    }

    /// Disarm one drone.
    pub async fn disarm(&self, drone_id: &str) -> Result<(), FleetError> {
        let session = self.inner.registry.require(drone_id)?;
        arm::disarm(&session, &self.inner.config.settings, &self.inner.cancel).await
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Poll one telemetry sample, connecting first if needed.
    pub async fn get_telemetry(&self, drone_id: &str) -> Result<Telemetry, FleetError> {
        let session = self.inner.registry.connect(drone_id).await?;
        telemetry::poll(&session, &self.inner.config.settings, &self.inner.cancel).await
    }

    /// Poll telemetry from every connected drone. Never fails as a
    /// whole; broken sessions land in the `failed` partition.
    pub async fn get_all_telemetry(&self) -> BatchResult<Telemetry> {
        let ids = self.inner.registry.connected_ids();
        self.run_for_all(ids, |fleet, id| async move {
            fleet.get_telemetry(&id).await
        })
        .await
    }
}
