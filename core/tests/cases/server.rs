use crate::common::TestHarness;
use wiresim_core::*;

#[test]
fn response_goes_back_over_the_arrival_link() {
    let mut h = TestHarness::new();
    let a = h.add_http_client(1024);
    let b = h.add_http_client(1024);
    let server = h.add_server(50);
    h.connect(a, server);
    h.connect(b, server);

    h.run_until(109);
    assert_eq!(h.server(server).total_load(), Some(2));
    assert_eq!(h.server(server).processing_load(), 2);

    h.run_until(168);
    assert_eq!(h.round_trips().len(), 2);
    assert_eq!(h.client(a).state(), ClientState::ProcessingData);
    assert_eq!(h.client(b).state(), ClientState::ProcessingData);
}

#[test]
fn concurrency_limit_queues_extra_clients() {
    let mut h = TestHarness::new();
    let clients: Vec<EntityId> = (0..3).map(|_| h.add_http_client(1024)).collect();
    let server = h.add(
        EntityKind::Server,
        serde_json::json!({ "processing_time_ms": 50, "max_concurrent_packets": 1 }),
    );
    for &c in &clients {
        h.connect(c, server);
    }

    h.run_until(110);
    assert_eq!(h.server(server).processing_load(), 1);
    assert_eq!(h.server(server).queued_count(), 2);

    // Queued contexts only start ticking once earlier ones finish.
    h.run_until(168);
    assert_eq!(h.round_trips().len(), 1);
    h.run_until(300);
    assert_eq!(h.round_trips().len(), 3);
}

#[test]
fn non_final_chunks_are_acknowledged() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(MAX_PACKET_SIZE + 1);
    let server = h.add_server(50);
    h.connect(client, server);
    let ip = h.ip(client);

    h.run_until(109);
    assert_eq!(h.server(server).context_state(&ip), Some(ProcessingState::Idle));

    h.run_until(118);
    assert_eq!(h.client(client).state(), ClientState::WaitingForResponse);
    h.run_until(119);
    assert_eq!(h.client(client).state(), ClientState::SendingData);

    // Final chunk leaves at 120.
    h.run_until(128);
    assert_eq!(h.server(server).context_state(&ip), Some(ProcessingState::Idle));
    h.run_until(129);
    assert_eq!(h.server(server).context_state(&ip), Some(ProcessingState::ProcessingData));
}

#[test]
fn processing_time_can_change_between_requests() {
    let mut h = TestHarness::new();
    let client = h.add_http_client(1024);
    let server = h.add_server(50);
    h.connect(client, server);

    h.run_until(168);
    h.sim
        .entity_mut::<Server>(server)
        .unwrap()
        .set_processing_time(std::time::Duration::from_millis(5));
    h.run_until(400);

    let latencies: Vec<u128> = h.round_trips().into_iter().map(|(_, l)| l.as_millis()).collect();
    assert_eq!(latencies, vec![68, 23]);
}
