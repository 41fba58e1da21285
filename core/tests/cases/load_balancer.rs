use std::collections::BTreeMap;
use std::time::Duration;

use crate::common::TestHarness;
use serde_json::json;
use wiresim_core::components::load_balancer::ip_hash_index;
use wiresim_core::*;

struct Farm {
    h: TestHarness,
    client: EntityId,
    lb: EntityId,
    servers: Vec<EntityId>,
}

fn farm(lb_params: serde_json::Value, servers: usize, data_size: usize) -> Farm {
    let mut h = TestHarness::new();
    let client = h.add_http_client(data_size);
    let lb = h.add(EntityKind::LoadBalancer, lb_params);
    h.connect(client, lb);
    let servers: Vec<EntityId> = (0..servers)
        .map(|_| {
            let s = h.add_server(50);
            h.connect(lb, s);
            s
        })
        .collect();
    Farm { h, client, lb, servers }
}

impl Farm {
    fn server_ips(&self) -> Vec<String> {
        self.servers.iter().map(|&s| self.h.ip(s)).collect()
    }
}

#[test]
fn registers_servers_in_connection_order() {
    let f = farm(json!({ "algorithm": "RoundRobin" }), 3, 1024);
    let registered: Vec<String> = f.h.load_balancer(f.lb).servers().iter().map(|s| s.to_string()).collect();
    assert_eq!(registered, f.server_ips());
}

#[test]
fn round_robin_spreads_requests() {
    let mut f = farm(json!({ "algorithm": "RoundRobin" }), 3, 1024);
    f.h.run_for(1000);

    let ips = f.server_ips();
    let pickups = f.h.server_pickups();
    assert!(pickups.len() >= 4, "{pickups:?}");
    assert_eq!(&pickups[..4], &[ips[0].clone(), ips[1].clone(), ips[2].clone(), ips[0].clone()]);
}

#[test]
fn chunks_of_one_request_stay_on_one_server() {
    let mut f = farm(json!({ "algorithm": "RoundRobin" }), 2, 3 * MAX_PACKET_SIZE + 1024);
    f.h.run_for(1200);

    let mut busy_at: BTreeMap<Duration, usize> = BTreeMap::new();
    for (at, s) in f.h.server_snapshots() {
        if s.total_load > 0 {
            *busy_at.entry(at).or_default() += 1;
        }
    }
    assert!(busy_at.values().all(|&n| n <= 1));

    // Affinity is released by the final response, so the next request moves on.
    let pickups = f.h.server_pickups();
    let ips = f.server_ips();
    assert!(pickups.len() >= 2, "{pickups:?}");
    assert_eq!(&pickups[..2], &[ips[0].clone(), ips[1].clone()]);
    assert!(f.h.round_trips().len() >= 2);
}

#[test]
fn sticky_sessions_keep_the_client_on_its_server() {
    let mut f = farm(json!({ "algorithm": "RoundRobin", "sticky_sessions": true }), 3, 1024);
    f.h.run_for(1000);

    let ips = f.server_ips();
    let pickups = f.h.server_pickups();
    assert!(pickups.len() >= 3);
    assert!(pickups.iter().all(|ip| ip == &ips[0]));
    let client_ip = f.h.ip(f.client);
    assert_eq!(f.h.load_balancer(f.lb).affinity_for(&client_ip), Some(ips[0].as_str()));
}

#[test]
fn ip_hashing_is_stable_per_client() {
    let mut f = farm(json!({ "algorithm": "IPHashing" }), 3, 1024);
    f.h.run_for(1000);

    let ips = f.server_ips();
    let expected = &ips[ip_hash_index(&f.h.ip(f.client), ips.len()).unwrap()];
    let pickups = f.h.server_pickups();
    assert!(pickups.len() >= 3);
    assert!(pickups.iter().all(|ip| ip == expected));
}

#[test]
fn least_connections_avoids_busy_server() {
    let mut h = TestHarness::new();
    let a = h.add_http_client(1024);
    let b = h.add_client(ClientConfig {
        mode: ClientMode::Http,
        sending_period_ms: 150,
        ..ClientConfig::default()
    });
    let lb = h.add_load_balancer(LoadBalancerAlgorithm::LeastConnections);
    let slow = h.add_server(1000);
    let fast = h.add_server(10);
    h.connect(a, lb);
    h.connect(b, lb);
    h.connect(lb, slow);
    h.connect(lb, fast);

    h.run_for(400);
    let pickups = h.server_pickups();
    assert_eq!(&pickups[..2], &[h.ip(slow), h.ip(fast)]);
    assert!(h.server(slow).context_state(&h.ip(a)).is_some());
    assert!(!h.round_trips().is_empty());
}

#[test]
fn answers_directly_when_no_server_is_attached() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let lb = h.add_load_balancer(LoadBalancerAlgorithm::RoundRobin);
    h.connect(client, lb);

    h.run_until(120);
    assert!(h.load_balancer(lb).servers().is_empty());
    assert_eq!(h.round_trips(), vec![(Duration::from_millis(119), Duration::from_millis(19))]);
    assert_eq!(h.client(client).state(), ClientState::ProcessingData);
}

#[test]
fn clients_are_not_registered_as_servers() {
    let mut h = TestHarness::new();
    let lb = h.add_load_balancer(LoadBalancerAlgorithm::RoundRobin);
    let client = h.add_http_client(1024);
    let server = h.add_server(50);
    h.connect(lb, client);
    h.connect(lb, server);
    assert_eq!(h.load_balancer(lb).servers(), vec![h.ip(server).as_str()]);
}
