//! Slot accounting and end-to-end dispatch through the registry.

mod common;

use common::{ScriptedLifecycle, TestHarness};
use jacs_services::models::ServiceData;
use jacs_services::state_machine::ServiceState;

#[tokio::test]
async fn test_zero_slots_dispatch_nothing() {
    let harness = TestHarness::new(0);
    harness.register(ScriptedLifecycle::succeeding("idle"));
    let submitted = harness
        .engine
        .submit_single_service(ServiceData::new("idle"))
        .await
        .unwrap();

    assert_eq!(harness.dispatcher.dispatch_services().await, 0);
    assert_eq!(harness.engine.queue().get_ready_services_size(), 1);
    let stored = harness.stored(submitted.id.unwrap()).await;
    assert_eq!(stored.state, ServiceState::Queued);
}

#[tokio::test]
async fn test_single_slot_dispatches_one_service() {
    let harness = TestHarness::new(1);
    let lifecycle = ScriptedLifecycle::succeeding("limited");
    harness.register(lifecycle.clone());
    harness
        .engine
        .submit_multiple_services(vec![
            ServiceData::new("limited"),
            ServiceData::new("limited"),
            ServiceData::new("limited"),
        ])
        .await
        .unwrap();

    assert_eq!(harness.dispatcher.dispatch_services().await, 1);
    assert_eq!(harness.engine.queue().get_ready_services_size(), 2);
    assert_eq!(harness.engine.available_slots(), 0);

    let stats = harness.engine.get_server_stats();
    assert_eq!(stats.total_slots, 1);
    assert_eq!(stats.waiting_services, 2);
}

#[tokio::test]
async fn test_dispatch_loop_runs_services_to_completion() {
    let harness = TestHarness::new(2);
    let ok = ScriptedLifecycle::succeeding("ok");
    harness.register(ok.clone());
    harness.register(ScriptedLifecycle::failing("boom", "exploded"));

    let good = harness
        .engine
        .submit_single_service(ServiceData::new("ok"))
        .await
        .unwrap();
    let bad = harness
        .engine
        .submit_single_service(ServiceData::new("boom"))
        .await
        .unwrap();

    let shutdown = harness.spawn_dispatch_loop();
    let good = harness.wait_for_terminal(good.id.unwrap()).await;
    let bad = harness.wait_for_terminal(bad.id.unwrap()).await;
    shutdown.send(true).unwrap();

    assert_eq!(good.state, ServiceState::Successful);
    assert_eq!(good.result, Some(serde_json::json!("ok done")));
    assert_eq!(bad.state, ServiceState::Error);
    assert_eq!(ok.processed_count(), 1);

    // the slots come back once the spawned computations settle
    for _ in 0..100 {
        if harness.engine.available_slots() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(harness.engine.available_slots(), 2);
    assert_eq!(harness.engine.queue().get_in_flight_services_size(), 0);
}

#[tokio::test]
async fn test_unregistered_service_ends_in_error() {
    let harness = TestHarness::new(1);
    let submitted = harness
        .engine
        .submit_single_service(ServiceData::new("nobody"))
        .await
        .unwrap();

    assert_eq!(harness.dispatcher.dispatch_services().await, 0);
    let stored = harness.stored(submitted.id.unwrap()).await;
    assert_eq!(stored.state, ServiceState::Error);
    assert_eq!(harness.engine.available_slots(), 1);
}
