//! mavfleet CLI: drive fleet operations from the command line.
//!
//! Thin shell over `mavfleet-core`: loads the YAML fleet configuration,
//! wires Ctrl-C into the cancellation token, runs one operation and
//! prints its result as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mavfleet_core::{
    cancel_pair, FenceEnableMode, Fleet, FleetConfig, FleetError, MavlinkDialer,
};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mavfleet", version, about = "Ground-control fleet orchestration")]
struct Cli {
    /// Path to the fleet configuration file.
    #[arg(short, long, default_value = "fleet.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect one drone, or every configured drone.
    Connect {
        /// Drone id; omit to connect the whole fleet.
        drone_id: Option<String>,
    },
    /// Upload a configured mission, optionally starting it (AUTO + arm).
    Mission {
        /// Mission name from the configuration.
        name: String,
        /// Drone id; omit to target every connected drone.
        #[arg(long)]
        drone_id: Option<String>,
        /// Also switch to AUTO and arm after the upload.
        #[arg(long)]
        start: bool,
    },
    /// Upload the configured fence polygon.
    Fence {
        /// Drone id; omit to target every connected drone.
        #[arg(long)]
        drone_id: Option<String>,
    },
    /// Enable or disable the fence (DISABLE, ENABLE, DISABLE_FLOOR_ONLY).
    EnableFence {
        /// Fence mode.
        mode: String,
        /// Drone id; omit to target every connected drone.
        #[arg(long)]
        drone_id: Option<String>,
    },
    /// Upload the configured rally points.
    Rally {
        /// Drone id; omit to target every connected drone.
        #[arg(long)]
        drone_id: Option<String>,
    },
    /// Change flight mode.
    Mode {
        /// Mode name, e.g. AUTO, GUIDED, RTL.
        mode: String,
        /// Drone id; omit to target every connected drone.
        #[arg(long)]
        drone_id: Option<String>,
    },
    /// Arm a drone.
    Arm {
        /// Drone id.
        drone_id: String,
    },
    /// Disarm a drone.
    Disarm {
        /// Drone id.
        drone_id: String,
    },
    /// Poll telemetry from one drone or the whole fleet.
    Telemetry {
        /// Drone id; omit to poll every connected drone.
        drone_id: Option<String>,
    },
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => error!(%e, "failed to serialize result"),
    }
}

/// Print a single-drone result, mapping errors to a failing exit code.
fn finish<T: Serialize>(result: Result<T, FleetError>) -> ExitCode {
    match result {
        Ok(value) => {
            print_json(&value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Print a batch result; partial failure fails the process.
fn finish_batch<T: Serialize>(result: mavfleet_core::BatchResult<T>) -> ExitCode {
    let ok = result.is_fully_successful();
    print_json(&result);
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match FleetConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (cancel_handle, cancel_token) = cancel_pair();
    let cancel_handle = Arc::new(cancel_handle);
    if let Err(e) = ctrlc::set_handler({
        let cancel_handle = Arc::clone(&cancel_handle);
        move || {
            eprintln!("interrupt: canceling in-flight operations");
            cancel_handle.cancel();
        }
    }) {
        error!(%e, "failed to install interrupt handler");
    }

    let fleet = Fleet::new_with(config, Arc::new(MavlinkDialer), cancel_token);

    match cli.command {
        Command::Connect { drone_id: Some(id) } => finish(fleet.connect(&id).await),
        Command::Connect { drone_id: None } => finish_batch(fleet.connect_all().await),

        Command::Mission {
            name,
            drone_id,
            start,
        } => {
            let waypoints = match fleet.config().missions.get(&name) {
                Some(waypoints) => waypoints.clone(),
                None => {
                    error!("unknown mission: {name}");
                    return ExitCode::FAILURE;
                }
            };
            match drone_id {
                Some(id) => {
                    if let Err(e) = fleet.connect(&id).await {
                        error!("{e}");
                        return ExitCode::FAILURE;
                    }
                    if start {
                        finish(fleet.start_mission(&id, waypoints).await)
                    } else {
                        finish(fleet.upload_mission(&id, waypoints).await)
                    }
                }
                None => {
                    let connected = fleet.connect_all().await;
                    info!(
                        connected = connected.succeeded.len(),
                        failed = connected.failed.len(),
                        "fleet connect finished"
                    );
                    let result = if start {
                        fleet.start_mission_all(&name).await
                    } else {
                        fleet.upload_mission_all(&name).await
                    };
                    match result {
                        Ok(batch) => finish_batch(batch),
                        Err(e) => {
                            error!("{e}");
                            ExitCode::FAILURE
                        }
                    }
                }
            }
        }

        Command::Fence { drone_id } => {
            let points = match fleet.config().fence.as_ref() {
                Some(section) if !section.points.is_empty() => section.points.clone(),
                _ => {
                    error!("no fence points configured");
                    return ExitCode::FAILURE;
                }
            };
            match drone_id {
                Some(id) => {
                    if let Err(e) = fleet.connect(&id).await {
                        error!("{e}");
                        return ExitCode::FAILURE;
                    }
                    finish(fleet.set_fence(&id, points).await)
                }
                None => {
                    fleet.connect_all().await;
                    finish_batch(fleet.set_fence_all(points).await)
                }
            }
        }

        Command::EnableFence { mode, drone_id } => {
            let mode: FenceEnableMode = match mode.parse() {
                Ok(mode) => mode,
                Err(e) => {
                    error!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            match drone_id {
                Some(id) => {
                    if let Err(e) = fleet.connect(&id).await {
                        error!("{e}");
                        return ExitCode::FAILURE;
                    }
                    finish(fleet.enable_fence(&id, mode).await.map(|_| "ok"))
                }
                None => {
                    fleet.connect_all().await;
                    finish_batch(fleet.enable_fence_all(mode).await)
                }
            }
        }

        Command::Rally { drone_id } => {
            let points = match fleet.config().rally.as_ref() {
                Some(section) if !section.points.is_empty() => section.points.clone(),
                _ => {
                    error!("no rally points configured");
                    return ExitCode::FAILURE;
                }
            };
            match drone_id {
                Some(id) => {
                    if let Err(e) = fleet.connect(&id).await {
                        error!("{e}");
                        return ExitCode::FAILURE;
                    }
                    finish(fleet.set_rally(&id, points).await)
                }
                None => {
                    fleet.connect_all().await;
                    finish_batch(fleet.set_rally_all(points).await)
                }
            }
        }

        Command::Mode { mode, drone_id } => match drone_id {
            Some(id) => {
                if let Err(e) = fleet.connect(&id).await {
                    error!("{e}");
                    return ExitCode::FAILURE;
                }
                finish(fleet.set_mode(&id, &mode).await)
            }
            None => {
                fleet.connect_all().await;
                finish_batch(fleet.set_mode_all(&mode).await)
            }
        },

        Command::Arm { drone_id } => {
            if let Err(e) = fleet.connect(&drone_id).await {
                error!("{e}");
                return ExitCode::FAILURE;
            }
            finish(fleet.arm(&drone_id).await.map(|_| "armed"))
        }

        Command::Disarm { drone_id } => {
            if let Err(e) = fleet.connect(&drone_id).await {
                error!("{e}");
                return ExitCode::FAILURE;
            }
            finish(fleet.disarm(&drone_id).await.map(|_| "disarmed"))
        }

        Command::Telemetry { drone_id } => match drone_id {
            Some(id) => finish(fleet.get_telemetry(&id).await),
            None => {
                fleet.connect_all().await;
                finish_batch(fleet.get_all_telemetry().await)
            }
        },
    }
}
