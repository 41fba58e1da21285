use crate::common::TestHarness;
use serde_json::json;
use wiresim_core::*;

#[test]
fn dropping_a_link_loses_traffic_and_releases_waiting_client() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let server = h.add_server(50);
    let link = h.connect(client, server);

    h.run_until(105);
    assert_eq!(h.sim.connection(link).unwrap().messages_in_transit().len(), 1);
    h.sim.set_connection_active(link, false).unwrap();

    let connection = h.sim.connection(link).unwrap();
    assert!(!connection.is_active());
    assert!(connection.messages_in_transit().is_empty());
    assert_eq!(h.client(client).state(), ClientState::ProcessingData);

    h.run_for(300);
    assert_eq!(h.server(server).total_load(), Some(0));
    assert!(h.round_trips().is_empty());
}

#[test]
fn server_forgets_contexts_of_a_dropped_link() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let server = h.add_server(500);
    let link = h.connect(client, server);

    h.run_until(120);
    assert_eq!(h.server(server).total_load(), Some(1));
    h.sim.set_connection_active(link, false).unwrap();
    assert_eq!(h.server(server).total_load(), Some(0));
}

#[test]
fn reconnect_delay_postpones_next_request() {
    let mut h = TestHarness::new();
    let client = h.add_client(ClientConfig {
        mode: ClientMode::Http,
        reconnect_delay_ms: Some(200),
        ..ClientConfig::default()
    });
    let server = h.add_server(50);
    let link = h.connect(client, server);

    h.run_until(105);
    h.sim.set_connection_active(link, false).unwrap();
    h.sim.set_connection_active(link, true).unwrap();

    // 100ms period plus 200ms backoff from the disconnect.
    h.run_until(404);
    assert_eq!(h.sim.connection(link).unwrap().messages_in_transit().len(), 0);
    h.run_until(405);
    assert_eq!(h.sim.connection(link).unwrap().messages_in_transit().len(), 1);
}

#[test]
fn load_balancer_deregisters_and_reregisters_servers() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let lb = h.add_load_balancer(LoadBalancerAlgorithm::RoundRobin);
    let s1 = h.add_server(500);
    let s2 = h.add_server(500);
    h.connect(client, lb);
    let l1 = h.connect(lb, s1);
    h.connect(lb, s2);

    h.run_until(120);
    let client_ip = h.ip(client);
    let s1_ip = h.ip(s1);
    assert_eq!(h.load_balancer(lb).affinity_for(&client_ip), Some(s1_ip.as_str()));

    h.sim.set_connection_active(l1, false).unwrap();
    assert_eq!(h.load_balancer(lb).servers(), vec![h.ip(s2).as_str()]);
    assert_eq!(h.load_balancer(lb).affinity_for(&client_ip), None);

    h.sim.set_connection_active(l1, true).unwrap();
    assert_eq!(h.load_balancer(lb).servers().len(), 2);
}

#[test]
fn dropping_the_client_link_clears_its_affinity() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let lb = h.add(EntityKind::LoadBalancer, json!({ "sticky_sessions": true }));
    let server = h.add_server(50);
    let front = h.connect(client, lb);
    h.connect(lb, server);

    h.run_for(300);
    let client_ip = h.ip(client);
    assert!(h.load_balancer(lb).affinity_for(&client_ip).is_some());

    h.sim.set_connection_active(front, false).unwrap();
    assert_eq!(h.load_balancer(lb).affinity_for(&client_ip), None);
    assert_eq!(h.load_balancer(lb).affinity_len(), 0);
}

#[test]
fn removing_a_server_updates_the_load_balancer() {
    let mut h = TestHarness::new();
    let lb = h.add_load_balancer(LoadBalancerAlgorithm::LeastConnections);
    let s1 = h.add_server(50);
    let s2 = h.add_server(50);
    h.connect(lb, s1);
    h.connect(lb, s2);

    h.sim.remove_entity(s1).unwrap();
    assert_eq!(h.load_balancer(lb).servers(), vec![h.ip(s2).as_str()]);
    assert_eq!(h.sim.connection_between(lb, s1), None);
    assert!(h.sim.remove_entity(s1).is_err());
}

#[test]
fn topology_errors_are_reported() {
    let mut h = TestHarness::new();
    let a = h.add_http_client(1024);
    let b = h.add_server(50);
    h.connect(a, b);

    assert!(matches!(h.sim.connect(a, b, LinkConfig::default()), Err(SimError::AlreadyConnected(_, _))));
    assert!(matches!(h.sim.connect(a, a, LinkConfig::default()), Err(SimError::SelfConnection(_))));
    assert!(matches!(h.sim.set_connection_active(99, false), Err(SimError::UnknownConnection(99))));
}

#[test]
fn dropping_the_backend_link_drops_exactly_the_balanced_contexts() {
    let mut h = TestHarness::new();
    let balanced: Vec<EntityId> = (0..3).map(|_| h.add_http_client(1024)).collect();
    let direct = h.add_http_client(1024);
    let lb = h.add_load_balancer(LoadBalancerAlgorithm::RoundRobin);
    let server = h.add_server(500);
    for &c in &balanced {
        h.connect(c, lb);
    }
    let backend = h.connect(lb, server);
    h.connect(direct, server);

    h.run_until(130);
    assert_eq!(h.server(server).total_load(), Some(4));
    assert_eq!(h.load_balancer(lb).affinity_len(), 3);

    h.sim.set_connection_active(backend, false).unwrap();
    assert_eq!(h.server(server).total_load(), Some(1));
    assert!(h.server(server).context_state(&h.ip(direct)).is_some());
    for &c in &balanced {
        assert_eq!(h.server(server).context_state(&h.ip(c)), None);
        assert_eq!(h.load_balancer(lb).affinity_for(&h.ip(c)), None);
    }
    assert_eq!(h.load_balancer(lb).affinity_len(), 0);
    assert!(h.load_balancer(lb).servers().is_empty());
}
