//! mavfleet-core: ground-control orchestration for MAVLink vehicle fleets.
//!
//! The core turns loosely-correlated wire traffic into reliable,
//! verifiable operations: mission upload, geofence and rally
//! configuration, mode change, arming and telemetry, each built on one
//! request/reply engine, plus a batch executor that runs any of them
//! across every vehicle while isolating per-drone failures.
//!
//! # Architecture
//!
//! - [`Registry`] owns one [`Session`] per connected drone; connects are
//!   idempotent and authorized against the configured system id.
//! - [`Session::exchange`] hands out the single request/reply handle per
//!   session; the protocol has no correlation ids, so exchanges are
//!   serialized rather than multiplexed.
//! - The protocol modules ([`mission`], [`fence`], [`rally`], [`mode`],
//!   [`arm`], [`telemetry`]) implement the per-operation state machines.
//! - [`Fleet`] is the operation surface the endpoint layers call, with
//!   `_all` variants returning a [`BatchResult`] partition.
//!
//! # Example
//!
//! ```rust,ignore
//! use mavfleet_core::{Fleet, FleetConfig};
//!
//! let config = FleetConfig::load("fleet.yaml")?;
//! let fleet = Fleet::new(config);
//! fleet.connect_all().await;
//! let result = fleet.upload_mission_all("survey").await?;
//! println!("{} ok, {} failed", result.succeeded.len(), result.failed.len());
//! ```

pub mod arm;
pub mod cancel;
mod command;
pub mod config;
pub mod error;
pub mod fence;
pub mod fleet;
pub mod link;
pub mod mission;
pub mod mode;
pub mod param;
pub mod rally;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod types;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::{ConfigError, DroneConfig, FleetConfig, FleetSettings};
pub use error::{FleetError, LinkError};
pub use fence::FenceSummary;
pub use fleet::{BatchResult, ConnectSummary, Fleet};
pub use link::{LinkFactory, MavLink, MavlinkDialer};
pub use mission::MissionSummary;
pub use mode::{ModeChange, ModeMap};
pub use rally::RallySummary;
pub use registry::Registry;
pub use session::{Exchange, Session, SessionStatus};
pub use types::{
    FenceEnableMode, FencePoint, MissionPlan, RallyPoint, Telemetry, Waypoint,
};
