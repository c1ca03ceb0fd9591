//! In-memory scripted vehicle for integration tests.
//!
//! [`FakeLink`] implements the core's `MavLink` trait over a pair of
//! crossbeam channels. [`spawn_vehicle`] runs an autopilot caricature on
//! its own thread: it heartbeats, plays the vehicle side of the mission,
//! parameter, fence and rally protocols, and records everything it was
//! sent for the tests to assert on.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use mavfleet_core::{
    CancelToken, DroneConfig, Fleet, FleetConfig, FleetSettings, LinkError, LinkFactory, MavLink,
};
use mavlink::ardupilotmega::{
    GpsFixType, MavAutopilot, MavCmd, MavMessage, MavMissionResult, MavMissionType, MavModeFlag,
    MavParamType, MavResult, MavState, MavType, COMMAND_ACK_DATA, FENCE_POINT_DATA,
    GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, HEARTBEAT_DATA, MISSION_ACK_DATA,
    PARAM_VALUE_DATA, RALLY_POINT_DATA, SYS_STATUS_DATA,
};
use mavlink::MavHeader;

// ============================================================================
// Vehicle behavior and event log
// ============================================================================

/// Scripted behavior for one fake vehicle.
#[derive(Debug, Clone)]
pub struct VehicleOptions {
    pub system_id: u8,
    pub component_id: u8,
    /// Emit heartbeats at all. Off simulates a dead link at connect time.
    pub heartbeats: bool,
    pub heartbeat_interval: Duration,
    /// Number of arm commands to reject before accepting.
    pub arm_rejections: u32,
    /// Answer REQUEST_DATA_STREAM with position/status/GPS messages.
    pub stream_telemetry: bool,
    /// Initial parameter store.
    pub params: Vec<(&'static str, f32)>,
    /// Result for the terminal MISSION_ACK.
    pub mission_result: MavMissionResult,
}

impl Default for VehicleOptions {
    fn default() -> Self {
        VehicleOptions {
            system_id: 1,
            component_id: 1,
            heartbeats: true,
            heartbeat_interval: Duration::from_millis(25),
            arm_rejections: 0,
            stream_telemetry: true,
            params: vec![("FENCE_ACTION", 2.0)],
            mission_result: MavMissionResult::MAV_MISSION_ACCEPTED,
        }
    }
}

/// Everything the vehicle was sent, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleEvent {
    MissionCount(u16),
    MissionItem {
        seq: u16,
        x: i32,
        y: i32,
        z: f32,
        command: u16,
    },
    ParamRead(String),
    ParamSet {
        name: String,
        value: f32,
    },
    FencePoint {
        idx: u8,
        lat: f32,
        lng: f32,
    },
    FenceFetch(u8),
    RallyPoint {
        idx: u8,
        lat: i32,
        lng: i32,
        alt: i16,
    },
    RallyFetch(u8),
    Command {
        command: u16,
        param1: f32,
    },
}

pub type EventLog = Arc<Mutex<Vec<VehicleEvent>>>;

/// Snapshot helper for assertions.
pub fn events_snapshot(log: &EventLog) -> Vec<VehicleEvent> {
    log.lock().unwrap().clone()
}

// ============================================================================
// Fake link
// ============================================================================

/// Channel-backed link between the session under test and the vehicle.
pub struct FakeLink {
    to_vehicle: Sender<(MavHeader, MavMessage)>,
    from_vehicle: Receiver<(MavHeader, MavMessage)>,
}

impl MavLink for FakeLink {
    fn send(&self, header: &MavHeader, msg: &MavMessage) -> Result<(), LinkError> {
        self.to_vehicle
            .send((*header, msg.clone()))
            .map_err(|_| LinkError::Closed)
    }

    fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError> {
        self.from_vehicle.recv().map_err(|_| LinkError::Closed)
    }
}

// ============================================================================
// Vehicle thread
// ============================================================================

struct Vehicle {
    opts: VehicleOptions,
    events: EventLog,
    params: HashMap<String, f32>,
    fence_points: HashMap<u8, (f32, f32)>,
    fence_count: u8,
    rally_points: HashMap<u8, (i32, i32, i16)>,
    rally_count: u8,
    mission_expected: u16,
    arm_rejections_left: u32,
    armed: bool,
    custom_mode: u32,
    seq: u8,
}

impl Vehicle {
    fn new(opts: VehicleOptions, events: EventLog) -> Self {
        let params = opts
            .params
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        let arm_rejections_left = opts.arm_rejections;
        Vehicle {
            opts,
            events,
            params,
            fence_points: HashMap::new(),
            fence_count: 0,
            rally_points: HashMap::new(),
            rally_count: 0,
            mission_expected: 0,
            arm_rejections_left,
            armed: false,
            custom_mode: 0,
            seq: 0,
        }
    }

    fn log(&self, event: VehicleEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn header(&mut self) -> MavHeader {
        let sequence = self.seq;
        self.seq = self.seq.wrapping_add(1);
        MavHeader {
            system_id: self.opts.system_id,
            component_id: self.opts.component_id,
            sequence,
        }
    }

    fn emit(&mut self, tx: &Sender<(MavHeader, MavMessage)>, msg: MavMessage) -> bool {
        let header = self.header();
        tx.send((header, msg)).is_ok()
    }

    fn heartbeat(&self) -> MavMessage {
        let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
        if self.armed {
            base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
        }
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: self.custom_mode,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        })
    }

    fn run(mut self, rx: Receiver<(MavHeader, MavMessage)>, tx: Sender<(MavHeader, MavMessage)>) {
        let mut next_heartbeat = Instant::now();
        loop {
            let wait = Duration::from_millis(5);
            match rx.recv_timeout(wait) {
                Ok((_, msg)) => {
                    if !self.handle(msg, &tx) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.opts.heartbeats && Instant::now() >= next_heartbeat {
                let hb = self.heartbeat();
                if !self.emit(&tx, hb) {
                    break;
                }
                next_heartbeat = Instant::now() + self.opts.heartbeat_interval;
            }
        }
    }

    #[allow(deprecated)]
    fn mission_request(&self, seq: u16) -> MavMessage {
        use mavlink::ardupilotmega::MISSION_REQUEST_DATA;
        MavMessage::MISSION_REQUEST(MISSION_REQUEST_DATA {
            target_system: 255,
            target_component: 0,
            seq,
            mission_type: MavMissionType::MAV_MISSION_TYPE_MISSION,
        })
    }

    fn param_value(&self, name: &str) -> MavMessage {
        let mut param_id = [0u8; 16];
        for (slot, byte) in param_id.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }
        MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
            param_value: self.params.get(name).copied().unwrap_or(0.0),
            param_count: 1,
            param_index: 0,
            param_id,
            param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
        })
    }

    #[allow(deprecated)]
    fn handle(&mut self, msg: MavMessage, tx: &Sender<(MavHeader, MavMessage)>) -> bool {
        match msg {
            MavMessage::MISSION_COUNT(mc) => {
                self.log(VehicleEvent::MissionCount(mc.count));
                self.mission_expected = mc.count;
                let req = self.mission_request(0);
                self.emit(tx, req)
            }
            MavMessage::MISSION_ITEM_INT(item) => {
                self.log(VehicleEvent::MissionItem {
                    seq: item.seq,
                    x: item.x,
                    y: item.y,
                    z: item.z,
                    command: item.command as u16,
                });
                let next = item.seq + 1;
                if next < self.mission_expected {
                    let req = self.mission_request(next);
                    self.emit(tx, req)
                } else {
                    let ack = MavMessage::MISSION_ACK(MISSION_ACK_DATA {
                        target_system: 255,
                        target_component: 0,
                        mavtype: self.opts.mission_result,
                        mission_type: MavMissionType::MAV_MISSION_TYPE_MISSION,
                        ..Default::default()
                    });
                    self.emit(tx, ack)
                }
            }
            MavMessage::PARAM_REQUEST_READ(pr) => {
                let name = decode_id(&pr.param_id);
                self.log(VehicleEvent::ParamRead(name.clone()));
                let reply = self.param_value(&name);
                self.emit(tx, reply)
            }
            MavMessage::PARAM_SET(ps) => {
                let name = decode_id(&ps.param_id);
                self.log(VehicleEvent::ParamSet {
                    name: name.clone(),
                    value: ps.param_value,
                });
                self.params.insert(name.clone(), ps.param_value);
                let reply = self.param_value(&name);
                self.emit(tx, reply)
            }
            MavMessage::FENCE_POINT(fp) => {
                self.log(VehicleEvent::FencePoint {
                    idx: fp.idx,
                    lat: fp.lat,
                    lng: fp.lng,
                });
                self.fence_points.insert(fp.idx, (fp.lat, fp.lng));
                self.fence_count = fp.count;
                true
            }
            MavMessage::FENCE_FETCH_POINT(ff) => {
                self.log(VehicleEvent::FenceFetch(ff.idx));
                let (lat, lng) = self
                    .fence_points
                    .get(&ff.idx)
                    .copied()
                    .unwrap_or((0.0, 0.0));
                let echo = MavMessage::FENCE_POINT(FENCE_POINT_DATA {
                    lat,
                    lng,
                    target_system: 255,
                    target_component: 0,
                    idx: ff.idx,
                    count: self.fence_count,
                });
                self.emit(tx, echo)
            }
            MavMessage::RALLY_POINT(rp) => {
                self.log(VehicleEvent::RallyPoint {
                    idx: rp.idx,
                    lat: rp.lat,
                    lng: rp.lng,
                    alt: rp.alt,
                });
                self.rally_points.insert(rp.idx, (rp.lat, rp.lng, rp.alt));
                self.rally_count = rp.count;
                true
            }
            MavMessage::RALLY_FETCH_POINT(rf) => {
                self.log(VehicleEvent::RallyFetch(rf.idx));
                let (lat, lng, alt) = self
                    .rally_points
                    .get(&rf.idx)
                    .copied()
                    .unwrap_or((0, 0, 0));
                let echo = MavMessage::RALLY_POINT(RALLY_POINT_DATA {
                    lat,
                    lng,
                    alt,
                    break_alt: 0,
                    land_dir: 0,
                    target_system: 255,
                    target_component: 0,
                    idx: rf.idx,
                    count: self.rally_count,
                    ..Default::default()
                });
                self.emit(tx, echo)
            }
            MavMessage::COMMAND_LONG(cl) => {
                self.log(VehicleEvent::Command {
                    command: cl.command as u16,
                    param1: cl.param1,
                });
                let result = match cl.command {
                    MavCmd::MAV_CMD_DO_SET_MODE => {
                        self.custom_mode = cl.param2 as u32;
                        MavResult::MAV_RESULT_ACCEPTED
                    }
                    MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => {
                        if cl.param1 > 0.5 {
                            if self.arm_rejections_left > 0 {
                                self.arm_rejections_left -= 1;
                                MavResult::MAV_RESULT_TEMPORARILY_REJECTED
                            } else {
                                self.armed = true;
                                MavResult::MAV_RESULT_ACCEPTED
                            }
                        } else {
                            self.armed = false;
                            MavResult::MAV_RESULT_ACCEPTED
                        }
                    }
                    MavCmd::MAV_CMD_DO_FENCE_ENABLE => MavResult::MAV_RESULT_ACCEPTED,
                    _ => MavResult::MAV_RESULT_UNSUPPORTED,
                };
                let ack = MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                    command: cl.command,
                    result,
                    ..Default::default()
                });
                self.emit(tx, ack)
            }
            MavMessage::REQUEST_DATA_STREAM(_) => {
                if !self.opts.stream_telemetry {
                    return true;
                }
                let position = MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
                    time_boot_ms: 0,
                    lat: 473977419,
                    lon: 85455938,
                    alt: 100_000,
                    relative_alt: 50_000,
                    vx: 0,
                    vy: 0,
                    vz: 0,
                    hdg: 9000,
                });
                let status = MavMessage::SYS_STATUS(SYS_STATUS_DATA {
                    battery_remaining: 87,
                    ..Default::default()
                });
                let gps = MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
                    fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
                    vel: 350,
                    ..Default::default()
                });
                self.emit(tx, position) && self.emit(tx, status) && self.emit(tx, gps)
            }
            _ => true,
        }
    }
}

fn decode_id(raw: &[u8; 16]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Spawn a scripted vehicle; returns the link for the session under test
/// and the vehicle's event log.
pub fn spawn_vehicle(options: VehicleOptions) -> (Arc<dyn MavLink>, EventLog) {
    let (to_vehicle_tx, to_vehicle_rx) = unbounded();
    let (from_vehicle_tx, from_vehicle_rx) = unbounded();
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let vehicle = Vehicle::new(options, events.clone());
    std::thread::spawn(move || vehicle.run(to_vehicle_rx, from_vehicle_tx));
    (
        Arc::new(FakeLink {
            to_vehicle: to_vehicle_tx,
            from_vehicle: from_vehicle_rx,
        }),
        events,
    )
}

// ============================================================================
// Fake link factory and fleet helpers
// ============================================================================

/// Link factory that spawns one scripted vehicle per registered address.
#[derive(Default)]
pub struct FakeFactory {
    vehicles: Mutex<HashMap<String, VehicleOptions>>,
    logs: Mutex<HashMap<String, EventLog>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeFactory::default())
    }

    pub fn register(&self, address: &str, options: VehicleOptions) {
        self.vehicles
            .lock()
            .unwrap()
            .insert(address.to_string(), options);
    }

    /// Event log of the vehicle dialed at `address`.
    pub fn events(&self, address: &str) -> Option<EventLog> {
        self.logs.lock().unwrap().get(address).cloned()
    }
}

impl LinkFactory for FakeFactory {
    fn dial(&self, address: &str) -> Result<Arc<dyn MavLink>, LinkError> {
        let options = self
            .vehicles
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| LinkError::Connect {
                address: address.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such vehicle"),
            })?;
        let (link, events) = spawn_vehicle(options);
        self.logs
            .lock()
            .unwrap()
            .insert(address.to_string(), events);
        Ok(link)
    }
}

/// Timing tightened for tests.
pub fn test_settings() -> FleetSettings {
    let mut settings = FleetSettings::default();
    settings.separation_ms = 0;
    settings.heartbeat_timeout_ms = 300;
    settings.ack_timeout_ms = 1000;
    settings.item_timeout_ms = 1000;
    settings.operation_deadline_ms = 5000;
    settings.param_retry_limit = 4;
    settings.arm_retry_limit = 3;
    settings.arm_retry_backoff_ms = 20;
    settings.telemetry_timeout_ms = 300;
    settings
}

/// Address a drone id is registered under.
pub fn address_of(drone_id: &str) -> String {
    format!("fake:{drone_id}")
}

/// Build a fleet whose drones dial scripted vehicles. The configured
/// (expected) system id matches each vehicle's announced one.
pub fn fleet_with(vehicles: Vec<(&str, VehicleOptions)>) -> (Fleet, Arc<FakeFactory>) {
    let factory = FakeFactory::new();
    let mut config = FleetConfig::default();
    config.settings = test_settings();
    for (drone_id, options) in vehicles {
        let address = address_of(drone_id);
        config.drones.insert(
            drone_id.to_string(),
            DroneConfig {
                address: address.clone(),
                system_id: options.system_id,
            },
        );
        factory.register(&address, options);
    }
    let fleet = Fleet::new_with(config, factory.clone(), CancelToken::never());
    (fleet, factory)
}
