//! Dependency handling, cancellation and timeouts of lifecycle processors.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{ScriptedLifecycle, TestHarness};
use jacs_services::computation::ComputationError;
use jacs_services::models::ServiceData;
use jacs_services::state_machine::ServiceState;

#[tokio::test]
async fn test_submitted_dependency_runs_before_parent() {
    let harness = TestHarness::new(2);
    let child = ScriptedLifecycle::succeeding("child");
    harness.register(child.clone());
    harness.register(ScriptedLifecycle::succeeding("parent").depending_on("child"));

    let parent = harness
        .engine
        .submit_single_service(ServiceData::new("parent").with_priority(1))
        .await
        .unwrap();
    let shutdown = harness.spawn_dispatch_loop();
    let parent = harness.wait_for_terminal(parent.id.unwrap()).await;
    shutdown.send(true).unwrap();

    assert_eq!(parent.state, ServiceState::Successful);
    assert_eq!(parent.dependency_ids.len(), 1);
    let dependency = harness.stored(parent.dependency_ids[0]).await;
    assert_eq!(dependency.state, ServiceState::Successful);
    assert_eq!(dependency.parent_service_id, parent.id);
    // dependencies outrank the service waiting on them
    assert_eq!(dependency.priority, Some(2));
    assert_eq!(child.processed_count(), 1);
}

#[tokio::test]
async fn test_single_slot_is_shared_with_submitted_dependency() {
    let harness = TestHarness::new(1);
    let child = ScriptedLifecycle::succeeding("child");
    harness.register(child.clone());
    harness.register(ScriptedLifecycle::succeeding("parent").depending_on("child"));

    let parent = harness
        .engine
        .submit_single_service(ServiceData::new("parent"))
        .await
        .unwrap();
    let shutdown = harness.spawn_dispatch_loop();
    let parent = harness.wait_for_terminal(parent.id.unwrap()).await;
    shutdown.send(true).unwrap();

    assert_eq!(parent.state, ServiceState::Successful);
    assert_eq!(child.processed_count(), 1);
    let dependency = harness.stored(parent.dependency_ids[0]).await;
    assert_eq!(dependency.state, ServiceState::Successful);

    // the parent's slot comes back once its computation is finalized
    for _ in 0..100 {
        if harness.engine.available_slots() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let stats = harness.engine.get_server_stats();
    assert_eq!(stats.available_slots, 1);
    assert_eq!(stats.suspended_services, 0);
}

#[tokio::test]
async fn test_canceled_dependency_fails_parent() {
    let harness = TestHarness::new(0);
    let parent_lifecycle = ScriptedLifecycle::succeeding("parent");
    harness.register(parent_lifecycle.clone());

    let request = ServiceData::new("parent").with_dependency(ServiceData::new("child"));
    let mut saved = request;
    harness.persistence.save_hierarchy(&mut saved).await.unwrap();
    let parent_id = saved.id.unwrap();
    let child_id = saved.dependency_ids[0];

    let running = tokio::spawn(harness.ctx.invoke(saved));
    harness.wait_for_state(parent_id, ServiceState::Suspended).await;
    harness.engine.cancel_service(child_id).await.unwrap();

    let outcome = running.await.unwrap();
    assert!(matches!(
        outcome,
        Err(ComputationError::DependencyFailure { .. })
    ));
    assert_eq!(harness.stored(parent_id).await.state, ServiceState::Error);
    assert_eq!(parent_lifecycle.processed_count(), 0);
}

#[tokio::test]
async fn test_waiting_past_the_deadline_times_out() {
    let harness = TestHarness::new(0);
    harness.register(ScriptedLifecycle::succeeding("slow"));

    let successes = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    let mut request = ServiceData::new("slow")
        .with_timeout_ms(100)
        .with_dependency(ServiceData::new("never-runs"));
    harness.persistence.save_hierarchy(&mut request).await.unwrap();
    let id = request.id.unwrap();

    let (ok, failed) = (successes.clone(), failures.clone());
    let outcome = harness
        .ctx
        .invoke(request)
        .when_complete(move |result| {
            let counter = if result.is_ok() { &ok } else { &failed };
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .get()
        .await;

    let Err(ComputationError::Timeout { service, .. }) = outcome else {
        panic!("expected a timeout, got {outcome:?}");
    };
    assert!(service.starts_with("slow"));
    assert_eq!(successes.load(Ordering::SeqCst), 0);
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    assert_eq!(harness.stored(id).await.state, ServiceState::Timeout);
}

#[tokio::test]
async fn test_invoke_async_waits_for_dispatched_service() {
    let harness = TestHarness::new(1);
    harness.register(ScriptedLifecycle::succeeding("remote"));
    let shutdown = harness.spawn_dispatch_loop();

    let finished = harness
        .ctx
        .invoke_async(ServiceData::new("remote"))
        .get()
        .await
        .unwrap();
    shutdown.send(true).unwrap();

    assert_eq!(finished.state, ServiceState::Successful);
    assert_eq!(finished.result, Some(serde_json::json!("remote done")));
}
