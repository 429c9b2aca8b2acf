//! # Service Queue
//!
//! Priority ordered, capacity bounded set of services waiting for a
//! processing slot.
//!
//! ## Architecture
//!
//! The persistent store is the source of truth; the queue is an in-memory
//! window over its runnable records. Services enter it either directly on
//! submission or through [`ServiceQueue::refresh_service_queue`], which pages
//! through `CREATED`/`QUEUED` records until the queue is full.
//!
//! Ordering is by priority (higher first), then by admission order. A dequeued
//! service stays "in flight" until [`ServiceQueue::complete_service`] is called
//! so a refresh racing with its state update cannot admit it twice.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::QueueConfig;
use crate::models::{PageRequest, ServiceData, ServiceId};
use crate::persistence::{PersistenceResult, ServiceDataPersistence};
use crate::state_machine::ServiceState;

/// Why [`ServiceQueue::enqueue_service`] did not admit a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Admitted,
    /// Record has not been persisted yet
    MissingId,
    /// Already waiting or in flight
    Duplicate,
    /// At capacity; a later refresh picks the record up from the store
    Full,
}

impl EnqueueOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Ready queue consumed by the dispatcher
#[async_trait]
pub trait ServiceQueue: Send + Sync {
    fn enqueue_service(&self, service_data: ServiceData) -> EnqueueOutcome;

    /// Highest priority ready service, marked in flight
    fn dequeue_service(&self) -> Option<ServiceData>;

    /// Forget an in-flight service once its processing finished
    fn complete_service(&self, id: ServiceId);

    /// Drop a waiting service, e.g. after it was canceled
    fn remove_service(&self, id: ServiceId) -> bool;

    /// Admit runnable records from the store; returns how many were admitted
    async fn refresh_service_queue(&self) -> PersistenceResult<usize>;

    fn get_ready_services_size(&self) -> usize;

    fn get_in_flight_services_size(&self) -> usize;

    fn max_ready_size(&self) -> usize;
}

type QueueKey = (Reverse<i32>, u64);

#[derive(Default)]
struct QueueState {
    ready: BTreeMap<QueueKey, ServiceData>,
    keys: HashMap<ServiceId, QueueKey>,
    in_flight: HashSet<ServiceId>,
    next_sequence: u64,
}

impl QueueState {
    fn contains(&self, id: ServiceId) -> bool {
        self.keys.contains_key(&id) || self.in_flight.contains(&id)
    }

    fn admit(&mut self, id: ServiceId, service_data: ServiceData) {
        let key = (Reverse(service_data.priority()), self.next_sequence);
        self.next_sequence += 1;
        self.keys.insert(id, key);
        self.ready.insert(key, service_data);
    }
}

/// Process-local [`ServiceQueue`] backed by a [`ServiceDataPersistence`]
pub struct InMemoryServiceQueue {
    persistence: Arc<dyn ServiceDataPersistence>,
    state: Mutex<QueueState>,
    max_ready_size: usize,
    refresh_page_size: usize,
}

impl std::fmt::Debug for InMemoryServiceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryServiceQueue")
            .field("ready", &self.get_ready_services_size())
            .field("in_flight", &self.get_in_flight_services_size())
            .field("max_ready_size", &self.max_ready_size)
            .finish()
    }
}

impl InMemoryServiceQueue {
    pub fn new(persistence: Arc<dyn ServiceDataPersistence>, config: &QueueConfig) -> Self {
        Self {
            persistence,
            state: Mutex::new(QueueState::default()),
            max_ready_size: config.max_ready_size.max(1),
            refresh_page_size: config.refresh_page_size.max(1),
        }
    }

    /// Ids currently waiting, in dequeue order
    pub fn ready_service_ids(&self) -> Vec<ServiceId> {
        self.state
            .lock()
            .ready
            .values()
            .filter_map(|sd| sd.id)
            .collect()
    }
}

#[async_trait]
impl ServiceQueue for InMemoryServiceQueue {
    fn enqueue_service(&self, service_data: ServiceData) -> EnqueueOutcome {
        let Some(id) = service_data.id else {
            return EnqueueOutcome::MissingId;
        };
        let mut state = self.state.lock();
        if state.contains(id) {
            return EnqueueOutcome::Duplicate;
        }
        if state.ready.len() >= self.max_ready_size {
            debug!(service_id = %id, max_ready_size = self.max_ready_size, "Ready queue full, leaving service for a later refresh");
            return EnqueueOutcome::Full;
        }
        trace!(service_id = %id, priority = service_data.priority(), "Enqueued service");
        state.admit(id, service_data);
        EnqueueOutcome::Admitted
    }

    fn dequeue_service(&self) -> Option<ServiceData> {
        let mut state = self.state.lock();
        let (_, service_data) = state.ready.pop_first()?;
        if let Some(id) = service_data.id {
            state.keys.remove(&id);
            state.in_flight.insert(id);
        }
        Some(service_data)
    }

    fn complete_service(&self, id: ServiceId) {
        self.state.lock().in_flight.remove(&id);
    }

    fn remove_service(&self, id: ServiceId) -> bool {
        let mut state = self.state.lock();
        match state.keys.remove(&id) {
            Some(key) => state.ready.remove(&key).is_some(),
            None => false,
        }
    }

    async fn refresh_service_queue(&self) -> PersistenceResult<usize> {
        let mut admitted = 0;
        let mut page_number = 0;

        loop {
            if self.get_ready_services_size() >= self.max_ready_size {
                break;
            }
            let page = self
                .persistence
                .find_services_by_state(
                    &ServiceState::RUNNABLE,
                    &PageRequest::new(page_number, self.refresh_page_size),
                )
                .await?;
            let fetched = page.len();

            {
                let mut state = self.state.lock();
                for service_data in page.result_list {
                    if state.ready.len() >= self.max_ready_size {
                        break;
                    }
                    let Some(id) = service_data.id else { continue };
                    if state.contains(id) {
                        continue;
                    }
                    state.admit(id, service_data);
                    admitted += 1;
                }
            }

            if fetched < self.refresh_page_size {
                break;
            }
            page_number += 1;
        }

        if admitted > 0 {
            debug!(
                admitted,
                ready = self.get_ready_services_size(),
                "Refreshed service queue"
            );
        }
        Ok(admitted)
    }

    fn get_ready_services_size(&self) -> usize {
        self.state.lock().ready.len()
    }

    fn get_in_flight_services_size(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn max_ready_size(&self) -> usize {
        self.max_ready_size
    }
}
