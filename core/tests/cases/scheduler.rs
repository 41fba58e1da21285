use std::time::Duration;

use crate::common::TestHarness;
use wiresim_core::*;

#[test]
fn advance_splits_external_tick_into_sub_steps() {
    let mut h = TestHarness::new();
    h.sim.advance(DEFAULT_EXTERNAL_TICK, DEFAULT_SUB_STEPS, 1.0);
    assert_eq!(h.sim.time(), Duration::from_millis(16));
}

#[test]
fn speed_scales_simulated_time() {
    let mut h = TestHarness::new();
    h.sim.advance(Duration::from_millis(10), 4, 2.0);
    assert_eq!(h.sim.time(), Duration::from_millis(20));

    h.sim.advance(Duration::from_millis(10), 4, 0.0);
    assert_eq!(h.sim.time(), Duration::from_millis(20));
}

#[test]
fn invalid_speed_is_ignored() {
    let mut h = TestHarness::new();
    h.sim.advance(Duration::from_millis(10), 1, -1.0);
    h.sim.advance(Duration::from_millis(10), 1, f64::NAN);
    h.sim.advance(Duration::from_millis(10), 1, f64::INFINITY);
    assert_eq!(h.sim.time(), Duration::ZERO);
}

#[test]
fn zero_sub_steps_still_advances() {
    let mut h = TestHarness::new();
    h.sim.advance(Duration::from_millis(7), 0, 1.0);
    assert_eq!(h.sim.time(), Duration::from_millis(7));
}

#[test]
fn zero_latency_delivers_in_the_same_sub_step() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let server = h.add_server(50);
    h.connect_with_link(
        client,
        server,
        LinkConfig {
            base_latency_ms: 0.0,
            ..LinkConfig::default()
        },
    );

    h.run_until(100);
    assert_eq!(
        h.server(server).context_state(&h.ip(client)),
        Some(ProcessingState::ProcessingData)
    );
}

#[test]
fn external_ticks_match_millisecond_steps() {
    let build = || {
        let mut h = TestHarness::new();
        let client = h.add_http_client(1024);
        let server = h.add_server(50);
        h.connect(client, server);
        h
    };

    let mut fine = build();
    fine.run_for(400);

    let mut framed = build();
    for _ in 0..25 {
        framed.sim.advance(DEFAULT_EXTERNAL_TICK, DEFAULT_SUB_STEPS, 1.0);
    }

    assert_eq!(fine.sim.time(), framed.sim.time());
    assert_eq!(fine.round_trips(), framed.round_trips());
    assert_eq!(fine.round_trips().len(), 2);
}

#[test]
fn snapshots_are_published_every_sub_step() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let server = h.add_server(50);
    h.connect(client, server);

    h.sim.advance(Duration::from_millis(16), 16, 1.0);
    let ip = h.ip(client);
    let snapshots = h.client_snapshots(&ip);
    assert_eq!(snapshots.len(), 16);
    assert_eq!(snapshots.last().unwrap().0, Duration::from_millis(16));
    assert_eq!(snapshots.last().unwrap().1.total_elapsed, Duration::from_millis(16));
}

#[test]
fn huge_advance_saturates_instead_of_overflowing() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let ping = h.add_client(ClientConfig::default());
    let lb = h.add_load_balancer(LoadBalancerAlgorithm::RoundRobin);
    let server = h.add_server(50);
    h.connect(client, lb);
    h.connect(ping, server);
    h.connect(lb, server);

    h.sim.advance(Duration::MAX, 1, 1.0);
    h.sim.advance(Duration::MAX, 1, 1.0);
    assert_eq!(h.sim.time(), Duration::MAX);

    let ip = h.ip(client);
    let last = h.client_snapshots(&ip).pop().unwrap().1;
    assert_eq!(last.total_elapsed, Duration::MAX);
}

#[test]
fn collector_survives_saturated_clock() {
    let mut sim = Simulation::new();
    let collector = std::sync::Arc::new(std::sync::RwLock::new(MetricsCollector::new(8).unwrap()));
    sim.set_sink(Box::new(std::sync::Arc::clone(&collector)));
    let client = sim.add_entity(EntityKind::Client, serde_json::json!({ "mode": "Http" })).unwrap();
    let server = sim.add_entity(EntityKind::Server, serde_json::Value::Null).unwrap();
    sim.connect(client, server, LinkConfig::default()).unwrap();

    for _ in 0..3 {
        sim.advance(Duration::MAX, 1, 1.0);
    }
    let collector = collector.read().unwrap();
    assert!(collector.history.iter().all(|p| p.round_trips_per_sec.is_finite()));
}
