#![allow(dead_code)]

pub mod lifecycles;

use std::sync::Arc;
use std::time::Duration;

use jacs_services::computation::ServiceComputationFactory;
use jacs_services::config::{ComputationConfig, QueueConfig, ServiceConfig};
use jacs_services::models::{ServiceData, ServiceId};
use jacs_services::orchestration::{
    InMemoryServiceQueue, JacsServiceDispatcher, JacsServiceEngine, ServiceRegistry,
};
use jacs_services::persistence::{InMemoryServiceDataPersistence, ServiceDataPersistence};
use jacs_services::processors::{LifeCycleServiceProcessor, ProcessorContext, ServiceLifecycle};
use jacs_services::state_machine::ServiceState;
use tokio::sync::watch;

pub use lifecycles::*;

/// Fast polling lanes for tests
pub fn test_computation_config() -> ComputationConfig {
    ComputationConfig {
        main_pool_size: 4,
        suspend_pool_size: 4,
        poll_interval_ms: 2,
        max_poll_interval_ms: 10,
    }
}

pub fn test_service_config() -> ServiceConfig {
    ServiceConfig {
        result_retries: 5,
        result_retry_interval_ms: 0,
        ..ServiceConfig::default()
    }
}

/// In-memory engine with everything a test needs to submit and run services
pub struct TestHarness {
    pub persistence: Arc<dyn ServiceDataPersistence>,
    pub engine: Arc<JacsServiceEngine>,
    pub factory: ServiceComputationFactory,
    pub dispatcher: JacsServiceDispatcher,
    pub ctx: ProcessorContext,
}

impl TestHarness {
    pub fn new(slots: usize) -> Self {
        Self::with_service_config(slots, test_service_config())
    }

    pub fn with_service_config(slots: usize, service_config: ServiceConfig) -> Self {
        let persistence: Arc<dyn ServiceDataPersistence> =
            Arc::new(InMemoryServiceDataPersistence::new());
        let queue = Arc::new(InMemoryServiceQueue::new(
            persistence.clone(),
            &QueueConfig::default(),
        ));
        let engine = Arc::new(JacsServiceEngine::new(
            persistence.clone(),
            queue,
            Arc::new(ServiceRegistry::new()),
            slots,
        ));
        let factory = ServiceComputationFactory::new(&test_computation_config())
            .expect("tests run inside a tokio runtime");
        let dispatcher = JacsServiceDispatcher::new(engine.clone())
            .with_dispatch_interval(Duration::from_millis(5))
            .with_refresh_interval(Duration::from_millis(20));
        let ctx = ProcessorContext::new(engine.clone(), factory.clone(), service_config);
        Self {
            persistence,
            engine,
            factory,
            dispatcher,
            ctx,
        }
    }

    pub fn register<L: ServiceLifecycle>(&self, lifecycle: L) {
        self.engine
            .registry()
            .register(Arc::new(LifeCycleServiceProcessor::new(
                lifecycle,
                self.ctx.clone(),
            )));
    }

    /// Run the dispatch loop in the background until the sender is dropped
    pub fn spawn_dispatch_loop(&self) -> watch::Sender<bool> {
        let (sender, receiver) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(receiver).await });
        sender
    }

    pub async fn stored(&self, id: ServiceId) -> ServiceData {
        self.persistence
            .get_by_id(id)
            .await
            .expect("service is persisted")
    }

    /// Poll the store until the service reaches `state`
    pub async fn wait_for_state(&self, id: ServiceId, state: ServiceState) -> ServiceData {
        for _ in 0..400 {
            let stored = self.stored(id).await;
            if stored.state == state {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "service {id} never reached {state}, last state {}",
            self.stored(id).await.state
        );
    }

    /// Poll the store until the service finished
    pub async fn wait_for_terminal(&self, id: ServiceId) -> ServiceData {
        for _ in 0..400 {
            let stored = self.stored(id).await;
            if stored.state.is_terminal() {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("service {id} never finished");
    }
}
