//! Submission, priority normalization and identifier assignment.

mod common;

use common::TestHarness;
use jacs_services::models::{ServiceData, ServiceMetaData};
use jacs_services::state_machine::ServiceState;
use std::sync::Arc;

#[tokio::test]
async fn test_submit_multiple_services_normalizes_priorities() {
    let harness = TestHarness::new(0);
    let services = vec![
        ServiceData::new("a").with_priority(1),
        ServiceData::new("b").with_priority(3),
        ServiceData::new("c").with_priority(1),
    ];

    let submitted = harness.engine.submit_multiple_services(services).await.unwrap();
    let priorities: Vec<_> = submitted.iter().map(|sd| sd.priority).collect();
    assert_eq!(priorities, vec![Some(4), Some(3), Some(1)]);

    // the queue hands them out in submission order
    let queue = harness.engine.queue();
    let order: Vec<String> = std::iter::from_fn(|| queue.dequeue_service())
        .map(|sd| sd.name)
        .collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_unprioritized_batch_uses_registered_defaults() {
    let harness = TestHarness::new(0);
    harness.register(common::ScriptedLifecycle::succeeding("hinted"));
    // metadata without a default priority falls back to 0
    let submitted = harness
        .engine
        .submit_multiple_services(vec![ServiceData::new("hinted"), ServiceData::new("hinted")])
        .await
        .unwrap();
    assert_eq!(submitted[0].priority, Some(1));
    assert_eq!(submitted[1].priority, Some(0));
}

struct Defaults;

impl jacs_services::processors::ServiceProcessor for Defaults {
    fn metadata(&self) -> ServiceMetaData {
        ServiceMetaData::new("defaults")
            .with_default_priority(7)
            .with_default_timeout_ms(1_500)
    }

    fn process(
        &self,
        _service_data: ServiceData,
    ) -> jacs_services::computation::ServiceComputation<ServiceData> {
        unreachable!("never dispatched in these tests")
    }
}

#[tokio::test]
async fn test_metadata_defaults_fill_missing_fields() {
    let harness = TestHarness::new(0);
    harness.engine.registry().register(Arc::new(Defaults));

    let submitted = harness
        .engine
        .submit_single_service(ServiceData::new("defaults"))
        .await
        .unwrap();
    assert_eq!(submitted.priority, Some(7));
    assert_eq!(submitted.service_timeout, Some(1_500));

    let explicit = harness
        .engine
        .submit_single_service(ServiceData::new("defaults").with_priority(2).with_timeout_ms(10))
        .await
        .unwrap();
    assert_eq!(explicit.priority, Some(2));
    assert_eq!(explicit.service_timeout, Some(10));
}

#[tokio::test]
async fn test_identifier_is_assigned_once() {
    let harness = TestHarness::new(0);
    let submitted = harness
        .engine
        .submit_single_service(ServiceData::new("stable"))
        .await
        .unwrap();
    let id = submitted.id.expect("id assigned on submission");

    let mut stored = harness.stored(id).await;
    assert_eq!(stored.id, Some(id));
    stored.transition_to(ServiceState::Running, "running").unwrap();
    harness.persistence.update(&stored).await.unwrap();
    stored.transition_to(ServiceState::Successful, "done").unwrap();
    harness.persistence.update(&stored).await.unwrap();

    let reloaded = harness.stored(id).await;
    assert_eq!(reloaded.id, Some(id));
    assert_eq!(reloaded.state, ServiceState::Successful);

    // saving the hierarchy again keeps the id
    let mut again = reloaded.clone();
    harness.persistence.save_hierarchy(&mut again).await.unwrap();
    assert_eq!(again.id, Some(id));
}

#[tokio::test]
async fn test_cancel_removes_waiting_service() {
    let harness = TestHarness::new(0);
    let submitted = harness
        .engine
        .submit_single_service(ServiceData::new("doomed"))
        .await
        .unwrap();
    let mut events = harness.engine.events().subscribe();

    let canceled = harness
        .engine
        .cancel_service(submitted.id.unwrap())
        .await
        .unwrap();
    assert_eq!(canceled.state, ServiceState::Canceled);
    assert_eq!(harness.engine.get_server_stats().waiting_services, 0);

    let event = events.recv().await.unwrap();
    assert_eq!(event.name, jacs_services::events::names::SERVICE_CANCELED);
    assert_eq!(event.service_id, submitted.id);
}
