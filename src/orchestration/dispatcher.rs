//! # Service Dispatcher
//!
//! Moves services from the ready queue onto processors while processing slots
//! remain.
//!
//! ## Architecture
//!
//! Each dispatch cycle takes a slot, dequeues the highest priority candidate,
//! re-reads its stored record (the queue entry may be stale), persists
//! `DISPATCHED` and hands the record, together with the slot, to the
//! registered processor. The resulting computation is awaited on a spawned
//! task which persists the final state if the processor did not, then returns
//! the slot. A processor waiting on dependencies parks its slot in the
//! meantime (see [`JacsServiceEngine::park_slot`]).
//!
//! A cycle with no free slot dequeues nothing, so queued work keeps its order.
//! [`JacsServiceDispatcher::run`] repeats dispatch cycles and queue refreshes
//! until shut down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::engine::JacsServiceEngine;
use crate::computation::{ComputationError, ComputationResult};
use crate::config::JacsConfig;
use crate::events::names;
use crate::logging::{log_error, log_service_operation};
use crate::models::{ServiceData, ServiceId};
use crate::state_machine::ServiceState;

/// Pulls ready services and starts their processors
#[derive(Debug, Clone)]
pub struct JacsServiceDispatcher {
    engine: Arc<JacsServiceEngine>,
    dispatch_interval: Duration,
    refresh_interval: Duration,
}

impl JacsServiceDispatcher {
    pub fn new(engine: Arc<JacsServiceEngine>) -> Self {
        let defaults = JacsConfig::default();
        Self {
            engine,
            dispatch_interval: defaults.engine.dispatch_interval(),
            refresh_interval: defaults.queue.refresh_interval(),
        }
    }

    pub fn from_config(engine: Arc<JacsServiceEngine>, config: &JacsConfig) -> Self {
        Self::new(engine)
            .with_dispatch_interval(config.engine.dispatch_interval())
            .with_refresh_interval(config.queue.refresh_interval())
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn engine(&self) -> &Arc<JacsServiceEngine> {
        &self.engine
    }

    /// Start processors for ready services until slots or candidates run out;
    /// returns how many were started
    pub async fn dispatch_services(&self) -> usize {
        let mut dispatched = 0;
        loop {
            if !self.engine.acquire_slot() {
                debug!(dispatched, "no available processing slots");
                break;
            }
            let Some(candidate) = self.engine.queue().dequeue_service() else {
                self.engine.release_slot();
                break;
            };
            if self.dispatch(candidate).await {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Returns false when the candidate was dropped; its slot is released then
    async fn dispatch(&self, candidate: ServiceData) -> bool {
        let Some(id) = candidate.id else {
            warn!(service = %candidate.name, "Dequeued a service without id");
            self.engine.release_slot();
            return false;
        };

        let mut service_data = match self.engine.persistence().find_by_id(id).await {
            Ok(Some(stored)) if stored.state.is_runnable() => stored,
            Ok(Some(stored)) => {
                debug!(service = %stored, "Service no longer runnable, skipping");
                self.abandon(id);
                return false;
            }
            Ok(None) => {
                warn!(service_id = %id, "Queued service disappeared from the store");
                self.abandon(id);
                return false;
            }
            Err(e) => {
                log_error("dispatcher", "load_service", &e.to_string(), Some(&candidate.name));
                self.abandon(id);
                return false;
            }
        };

        let Some(processor) = self.engine.get_service_processor(&service_data) else {
            warn!(service = %service_data, "No processor registered");
            let error = ComputationError::RegistryMiss(service_data.name.clone());
            finalize(&self.engine, id, Err(error)).await;
            self.abandon(id);
            return false;
        };

        if let Err(e) = service_data.transition_to(ServiceState::Dispatched, "dispatched") {
            log_error("dispatcher", "dispatch", &e.to_string(), Some(&service_data.name));
            self.abandon(id);
            return false;
        }
        if let Err(e) = self.engine.persistence().update(&service_data).await {
            log_error("dispatcher", "dispatch", &e.to_string(), Some(&service_data.name));
            self.abandon(id);
            return false;
        }

        log_service_operation(
            "dispatch",
            Some(id),
            &service_data.name,
            service_data.state,
            None,
        );
        self.engine
            .events()
            .publish_service_event(names::SERVICE_DISPATCHED, &service_data);

        self.engine.assign_slot(id);
        let computation = processor.process(service_data);
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let result = computation.await;
            finalize(&engine, id, result).await;
            engine.release_service_slot(id);
            engine.queue().complete_service(id);
        });
        true
    }

    fn abandon(&self, id: ServiceId) {
        self.engine.release_slot();
        self.engine.queue().complete_service(id);
    }

    /// Refresh the queue and dispatch on their intervals until `shutdown`
    /// turns true or its sender goes away
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            dispatch_interval_ms = self.dispatch_interval.as_millis() as u64,
            refresh_interval_ms = self.refresh_interval.as_millis() as u64,
            "🔄 DISPATCHER: Starting dispatch loop"
        );
        let mut dispatch_tick = tokio::time::interval(self.dispatch_interval);
        dispatch_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh_tick = tokio::time::interval(self.refresh_interval);
        refresh_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = refresh_tick.tick() => {
                    if let Err(e) = self.engine.queue().refresh_service_queue().await {
                        error!("Queue refresh failed: {}", e);
                    }
                }
                _ = dispatch_tick.tick() => {
                    let dispatched = self.dispatch_services().await;
                    if dispatched > 0 {
                        debug!(dispatched, "Dispatch cycle finished");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("🛑 DISPATCHER: Dispatch loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Persist the final state for `id` unless the record already has one, and
/// publish the matching event
async fn finalize(engine: &JacsServiceEngine, id: ServiceId, result: ComputationResult<ServiceData>) {
    let stored = match engine.persistence().get_by_id(id).await {
        Ok(stored) => stored,
        Err(e) => {
            log_error("dispatcher", "finalize", &e.to_string(), None);
            return;
        }
    };

    let record = if stored.state.is_terminal() {
        stored
    } else {
        let (mut record, target, details) = match result {
            Ok(returned) if returned.id == Some(id) => {
                (returned, ServiceState::Successful, "completed".to_string())
            }
            Ok(_) => (stored, ServiceState::Successful, "completed".to_string()),
            Err(error) => (stored, error.terminal_state(), error.to_string()),
        };
        match record.transition_to(target, details) {
            Ok(()) => {
                if let Err(e) = engine.persistence().update(&record).await {
                    log_error("dispatcher", "finalize", &e.to_string(), Some(&record.name));
                }
            }
            Err(e) => log_error("dispatcher", "finalize", &e.to_string(), Some(&record.name)),
        }
        record
    };

    let event = if record.has_completed_successfully() {
        names::SERVICE_COMPLETED
    } else {
        names::SERVICE_FAILED
    };
    log_service_operation("complete", Some(id), &record.name, record.state, None);
    engine.events().publish_service_event(event, &record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::{ServiceComputation, ServiceComputationFactory};
    use crate::config::{ComputationConfig, QueueConfig};
    use crate::models::ServiceMetaData;
    use crate::orchestration::{InMemoryServiceQueue, ServiceRegistry};
    use crate::persistence::{InMemoryServiceDataPersistence, ServiceDataPersistence};
    use crate::processors::ServiceProcessor;

    struct Echo {
        factory: ServiceComputationFactory,
    }

    impl ServiceProcessor for Echo {
        fn metadata(&self) -> ServiceMetaData {
            ServiceMetaData::new("echo")
        }

        fn process(&self, service_data: ServiceData) -> ServiceComputation<ServiceData> {
            self.factory.new_completed_computation(service_data)
        }
    }

    async fn setup(slots: usize) -> (Arc<JacsServiceEngine>, JacsServiceDispatcher) {
        let persistence: Arc<dyn ServiceDataPersistence> =
            Arc::new(InMemoryServiceDataPersistence::new());
        let queue = Arc::new(InMemoryServiceQueue::new(
            persistence.clone(),
            &QueueConfig::default(),
        ));
        let registry = Arc::new(ServiceRegistry::new());
        let factory = ServiceComputationFactory::new(&ComputationConfig::default()).unwrap();
        registry.register(Arc::new(Echo { factory }));
        let engine = Arc::new(JacsServiceEngine::new(persistence, queue, registry, slots));
        let dispatcher = JacsServiceDispatcher::new(engine.clone());
        (engine, dispatcher)
    }

    async fn wait_for_state(engine: &JacsServiceEngine, id: ServiceId, state: ServiceState) {
        for _ in 0..200 {
            if engine.persistence().get_by_id(id).await.unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("service {id} never reached {state}");
    }

    #[tokio::test]
    async fn test_registry_miss_is_persisted_as_error() {
        let (engine, dispatcher) = setup(1).await;
        let submitted = engine
            .submit_single_service(ServiceData::new("nobody"))
            .await
            .unwrap();
        assert_eq!(dispatcher.dispatch_services().await, 0);

        let stored = engine.persistence().get_by_id(submitted.id.unwrap()).await.unwrap();
        assert_eq!(stored.state, ServiceState::Error);
        assert_eq!(engine.available_slots(), 1);
        assert_eq!(engine.queue().get_in_flight_services_size(), 0);
    }

    #[tokio::test]
    async fn test_canceled_candidate_is_skipped() {
        let (engine, dispatcher) = setup(1).await;
        let submitted = engine
            .submit_single_service(ServiceData::new("echo"))
            .await
            .unwrap();
        let id = submitted.id.unwrap();

        // cancel behind the queue's back
        let mut stored = engine.persistence().get_by_id(id).await.unwrap();
        stored.transition_to(ServiceState::Canceled, "test").unwrap();
        engine.persistence().update(&stored).await.unwrap();

        assert_eq!(dispatcher.dispatch_services().await, 0);
        assert_eq!(engine.available_slots(), 1);
        assert_eq!(
            engine.persistence().get_by_id(id).await.unwrap().state,
            ServiceState::Canceled
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (engine, dispatcher) = setup(2).await;
        let dispatcher = dispatcher
            .with_dispatch_interval(Duration::from_millis(5))
            .with_refresh_interval(Duration::from_millis(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_handle = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

        let submitted = engine
            .submit_single_service(ServiceData::new("echo"))
            .await
            .unwrap();
        wait_for_state(&engine, submitted.id.unwrap(), ServiceState::Successful).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), loop_handle)
            .await
            .unwrap()
            .unwrap();
    }
}
