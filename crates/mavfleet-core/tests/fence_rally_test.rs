//! Fence and rally upload protocols against a scripted vehicle.

mod support;

use mavfleet_core::{FencePoint, RallyPoint};
use support::{events_snapshot, fleet_with, VehicleEvent, VehicleOptions};

#[tokio::test]
async fn test_fence_upload_disables_and_restores_action() {
    // Scenario: three points; FENCE_ACTION read once, parked at NONE,
    // FENCE_TOTAL negotiated, three verified point/fetch round-trips,
    // FENCE_ACTION restored to its original value.
    let (fleet, factory) = fleet_with(vec![("drone_1", VehicleOptions::default())]);
    fleet.connect("drone_1").await.expect("connect");

    let points = vec![
        FencePoint { lat: 1.0, lng: 2.0 },
        FencePoint { lat: 3.0, lng: 4.0 },
        FencePoint { lat: 5.0, lng: 6.0 },
    ];
    let summary = fleet
        .set_fence("drone_1", points.clone())
        .await
        .expect("set_fence");
    assert_eq!(summary.points, 3);
    assert_eq!(summary.restored_action, 2);

    let events = events_snapshot(&factory.events(&support::address_of("drone_1")).unwrap());

    // FENCE_ACTION was read exactly once, before anything was written.
    let reads: Vec<&VehicleEvent> = events
        .iter()
        .filter(|e| matches!(e, VehicleEvent::ParamRead(name) if name == "FENCE_ACTION"))
        .collect();
    assert_eq!(reads.len(), 1);

    // Parameter negotiation order: disable action, set total, restore action.
    let sets: Vec<(String, f32)> = events
        .iter()
        .filter_map(|e| match e {
            VehicleEvent::ParamSet { name, value } => Some((name.clone(), *value)),
            _ => None,
        })
        .collect();
    assert_eq!(
        sets,
        vec![
            ("FENCE_ACTION".to_string(), 0.0),
            ("FENCE_TOTAL".to_string(), 3.0),
            ("FENCE_ACTION".to_string(), 2.0),
        ]
    );

    // Exactly k point writes, each followed by its fetch, in index order.
    let point_writes: Vec<(u8, f32, f32)> = events
        .iter()
        .filter_map(|e| match e {
            VehicleEvent::FencePoint { idx, lat, lng } => Some((*idx, *lat, *lng)),
            _ => None,
        })
        .collect();
    assert_eq!(
        point_writes,
        vec![(0, 1.0, 2.0), (1, 3.0, 4.0), (2, 5.0, 6.0)]
    );
    let fetches: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            VehicleEvent::FenceFetch(idx) => Some(*idx),
            _ => None,
        })
        .collect();
    assert_eq!(fetches, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_rally_upload_negotiates_total_and_points() {
    let (fleet, factory) = fleet_with(vec![("drone_1", VehicleOptions::default())]);
    fleet.connect("drone_1").await.expect("connect");

    let points = vec![
        RallyPoint {
            lat: 47.3975,
            lng: 8.5455,
            alt: 30,
        },
        RallyPoint {
            lat: -47.0,
            lng: -8.0,
            alt: 45,
        },
    ];
    let summary = fleet
        .set_rally("drone_1", points)
        .await
        .expect("set_rally");
    assert_eq!(summary.points, 2);

    let events = events_snapshot(&factory.events(&support::address_of("drone_1")).unwrap());

    let totals: Vec<f32> = events
        .iter()
        .filter_map(|e| match e {
            VehicleEvent::ParamSet { name, value } if name == "RALLY_TOTAL" => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(totals, vec![2.0]);

    // Points travel 1e7-scaled with their altitude.
    let rally_writes: Vec<(u8, i32, i32, i16)> = events
        .iter()
        .filter_map(|e| match e {
            VehicleEvent::RallyPoint { idx, lat, lng, alt } => Some((*idx, *lat, *lng, *alt)),
            _ => None,
        })
        .collect();
    assert_eq!(
        rally_writes,
        vec![
            (0, 473975000, 85455000, 30),
            (1, -470000000, -80000000, 45),
        ]
    );
}

#[tokio::test]
async fn test_enable_fence_waits_for_ack() {
    let (fleet, factory) = fleet_with(vec![("drone_1", VehicleOptions::default())]);
    fleet.connect("drone_1").await.expect("connect");

    fleet
        .enable_fence("drone_1", "ENABLE".parse().unwrap())
        .await
        .expect("enable_fence");

    let events = events_snapshot(&factory.events(&support::address_of("drone_1")).unwrap());
    // MAV_CMD_DO_FENCE_ENABLE is command 207; param1 carries the mode.
    assert!(events
        .iter()
        .any(|e| matches!(e, VehicleEvent::Command { command: 207, param1 } if *param1 == 1.0)));
}

#[tokio::test]
async fn test_empty_fence_is_total_only() {
    // Zero points still parks and restores FENCE_ACTION and announces a
    // zero total; no point exchanges happen.
    let (fleet, factory) = fleet_with(vec![("drone_1", VehicleOptions::default())]);
    fleet.connect("drone_1").await.expect("connect");

    let summary = fleet
        .set_fence("drone_1", Vec::new())
        .await
        .expect("set_fence");
    assert_eq!(summary.points, 0);

    let events = events_snapshot(&factory.events(&support::address_of("drone_1")).unwrap());
    assert!(!events
        .iter()
        .any(|e| matches!(e, VehicleEvent::FencePoint { .. })));
}
