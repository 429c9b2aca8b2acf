//! # Service Engine
//!
//! ## Architecture: Admission Control Front Door
//!
//! The engine owns the processing slot budget and is the only way services
//! enter the system. Submitting a service persists its whole hierarchy (the
//! service plus any in-memory dependencies), moves new records to `QUEUED`
//! and offers every runnable record of the hierarchy to the ready queue.
//!
//! ## Processing Slots
//!
//! The dispatcher takes a slot before dequeuing and hands it to the service
//! it starts. A service that suspends to wait for its dependencies parks its
//! slot so the dependencies can run; it has to win a slot back before it
//! resumes. Services run in place through `invoke` never hold a slot.
//!
//! ## Priorities
//!
//! - A dependency without an explicit priority gets its dependent's priority
//!   plus one, so it is dispatched before the service waiting on it.
//! - Services submitted together are normalized so the batch is strictly
//!   descending in submission order: walking from the last service to the
//!   first, each priority becomes `max(own, next + 1)`. `[1, 3, 1]` becomes
//!   `[4, 3, 1]`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = JacsServiceEngine::new(persistence, queue, registry, 20);
//! let submitted = engine.submit_single_service(ServiceData::new("runScript")).await?;
//! let stats = engine.get_server_stats();
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::registry::ServiceRegistry;
use super::service_queue::ServiceQueue;
use crate::error::{JacsError, Result};
use crate::events::{names, EventPublisher, ServiceLifecycleEvent};
use crate::logging::log_service_operation;
use crate::models::{ServiceData, ServiceId};
use crate::persistence::ServiceDataPersistence;
use crate::processors::ServiceProcessor;
use crate::state_machine::ServiceState;

/// Snapshot of engine capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub total_slots: usize,
    pub available_slots: usize,
    pub running_services: usize,
    pub suspended_services: usize,
    pub waiting_services: usize,
}

#[derive(Debug, Default)]
struct SlotCounters {
    total: usize,
    in_use: usize,
    holders: HashSet<ServiceId>,
    parked: HashSet<ServiceId>,
}

impl SlotCounters {
    fn available(&self) -> usize {
        self.total.saturating_sub(self.in_use)
    }
}

/// Make `priorities` strictly descending while keeping explicit orderings.
///
/// Values are only ever raised, except at the `i32` ceiling: a batch that
/// would climb past `i32::MAX` is capped there and steps down by one from the
/// top instead.
pub fn normalize_priorities(priorities: &[i32]) -> Vec<i32> {
    let mut normalized: Vec<i64> = priorities.iter().map(|&p| i64::from(p)).collect();
    for i in (0..normalized.len().saturating_sub(1)).rev() {
        normalized[i] = normalized[i].max(normalized[i + 1] + 1);
    }
    let mut ceiling = i64::from(i32::MAX);
    for priority in normalized.iter_mut() {
        *priority = (*priority).min(ceiling);
        ceiling = *priority - 1;
    }
    normalized
        .into_iter()
        .map(|p| i32::try_from(p).unwrap_or(i32::MIN))
        .collect()
}

/// Admission control, slot bookkeeping and processor lookup
pub struct JacsServiceEngine {
    persistence: Arc<dyn ServiceDataPersistence>,
    queue: Arc<dyn ServiceQueue>,
    registry: Arc<ServiceRegistry>,
    events: EventPublisher,
    slots: Mutex<SlotCounters>,
}

impl std::fmt::Debug for JacsServiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JacsServiceEngine")
            .field("stats", &self.get_server_stats())
            .finish()
    }
}

impl JacsServiceEngine {
    pub fn new(
        persistence: Arc<dyn ServiceDataPersistence>,
        queue: Arc<dyn ServiceQueue>,
        registry: Arc<ServiceRegistry>,
        processing_slots: usize,
    ) -> Self {
        info!(processing_slots, "🚀 Creating service engine");
        Self {
            persistence,
            queue,
            registry,
            events: EventPublisher::default(),
            slots: Mutex::new(SlotCounters {
                total: processing_slots,
                ..SlotCounters::default()
            }),
        }
    }

    pub fn with_event_publisher(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn persistence(&self) -> &Arc<dyn ServiceDataPersistence> {
        &self.persistence
    }

    pub fn queue(&self) -> &Arc<dyn ServiceQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Change the slot budget; slots already in use stay in use
    pub fn set_processing_slots_count(&self, count: usize) {
        let mut slots = self.slots.lock();
        slots.total = count;
        info!(total = count, in_use = slots.in_use, "Processing slots updated");
    }

    pub fn available_slots(&self) -> usize {
        self.slots.lock().available()
    }

    /// Take one slot if any is free
    pub fn acquire_slot(&self) -> bool {
        let mut slots = self.slots.lock();
        if slots.available() == 0 {
            return false;
        }
        slots.in_use += 1;
        true
    }

    pub fn release_slot(&self) {
        let mut slots = self.slots.lock();
        slots.in_use = slots.in_use.saturating_sub(1);
    }

    /// Hand a slot taken with [`acquire_slot`](Self::acquire_slot) to `id`
    pub fn assign_slot(&self, id: ServiceId) {
        self.slots.lock().holders.insert(id);
    }

    /// Give up the slot `id` holds while it waits; returns whether one was freed
    pub fn park_slot(&self, id: ServiceId) -> bool {
        let mut slots = self.slots.lock();
        if !slots.holders.remove(&id) {
            return false;
        }
        slots.in_use = slots.in_use.saturating_sub(1);
        slots.parked.insert(id);
        debug!(service_id = %id, in_use = slots.in_use, "Processing slot parked");
        true
    }

    /// Take a slot back for a parked service. False while none is free;
    /// services that never parked may always resume.
    pub fn resume_slot(&self, id: ServiceId) -> bool {
        let mut slots = self.slots.lock();
        if !slots.parked.contains(&id) {
            return true;
        }
        if slots.available() == 0 {
            return false;
        }
        slots.parked.remove(&id);
        slots.holders.insert(id);
        slots.in_use += 1;
        debug!(service_id = %id, in_use = slots.in_use, "Processing slot resumed");
        true
    }

    /// Return whatever slot `id` holds once it finished
    pub fn release_service_slot(&self, id: ServiceId) {
        let mut slots = self.slots.lock();
        slots.parked.remove(&id);
        if slots.holders.remove(&id) {
            slots.in_use = slots.in_use.saturating_sub(1);
        }
    }

    pub fn get_server_stats(&self) -> ServerStats {
        let (total_slots, available_slots, running_services, suspended_services) = {
            let slots = self.slots.lock();
            (slots.total, slots.available(), slots.in_use, slots.parked.len())
        };
        ServerStats {
            total_slots,
            available_slots,
            running_services,
            suspended_services,
            waiting_services: self.queue.get_ready_services_size(),
        }
    }

    /// Processor registered for the service's name
    pub fn get_service_processor(&self, service_data: &ServiceData) -> Option<Arc<dyn ServiceProcessor>> {
        self.registry.lookup_service(&service_data.name)
    }

    /// Persist a service with its in-memory dependencies and queue it
    #[instrument(skip(self, service_data), fields(service = %service_data.name))]
    pub async fn submit_single_service(&self, mut service_data: ServiceData) -> Result<ServiceData> {
        self.prepare_for_submission(&mut service_data, None)?;
        self.persistence.save_hierarchy(&mut service_data).await?;

        let mut admitted = 0;
        for record in service_data.hierarchy() {
            if !record.state.is_runnable() {
                continue;
            }
            let mut entry = record.clone();
            entry.dependencies.clear();
            if self.queue.enqueue_service(entry).is_admitted() {
                admitted += 1;
            }
        }

        debug!(service_id = ?service_data.id, admitted, "Service hierarchy submitted");
        log_service_operation(
            "submit",
            service_data.id,
            &service_data.name,
            service_data.state,
            None,
        );
        self.events
            .publish_service_event(names::SERVICE_SUBMITTED, &service_data);
        Ok(service_data)
    }

    /// Submit services together, strictly descending priority in submission order
    pub async fn submit_multiple_services(
        &self,
        services: Vec<ServiceData>,
    ) -> Result<Vec<ServiceData>> {
        let priorities: Vec<i32> = services
            .iter()
            .map(|sd| sd.priority.unwrap_or_else(|| self.default_priority(sd)))
            .collect();
        let normalized = normalize_priorities(&priorities);

        let mut submitted = Vec::with_capacity(services.len());
        for (mut service_data, priority) in services.into_iter().zip(normalized) {
            service_data.priority = Some(priority);
            submitted.push(self.submit_single_service(service_data).await?);
        }
        Ok(submitted)
    }

    /// Administratively cancel a service that has not finished yet
    pub async fn cancel_service(&self, id: ServiceId) -> Result<ServiceData> {
        let mut service_data = self.persistence.get_by_id(id).await?;
        service_data.transition_to(ServiceState::Canceled, "canceled by request")?;
        self.persistence.update(&service_data).await?;
        let dequeued = self.queue.remove_service(id);

        info!(service_id = %id, dequeued, "🛑 Service canceled");
        self.events
            .publish(ServiceLifecycleEvent::new(names::SERVICE_CANCELED, &service_data));
        Ok(service_data)
    }

    fn default_priority(&self, service_data: &ServiceData) -> i32 {
        self.registry
            .get_service_metadata(&service_data.name)
            .and_then(|metadata| metadata.default_priority)
            .unwrap_or(0)
    }

    /// Fill in priorities and timeouts and move new records to QUEUED
    fn prepare_for_submission(
        &self,
        service_data: &mut ServiceData,
        dependent_priority: Option<i32>,
    ) -> Result<()> {
        if !service_data.has_id() {
            if service_data.priority.is_none() {
                service_data.priority = Some(match dependent_priority {
                    Some(priority) => priority.saturating_add(1),
                    None => self.default_priority(service_data),
                });
            }
            if service_data.service_timeout.is_none() {
                service_data.service_timeout = self
                    .registry
                    .get_service_metadata(&service_data.name)
                    .and_then(|metadata| metadata.default_timeout_ms);
            }
            if service_data.state == ServiceState::Created {
                service_data
                    .transition_to(ServiceState::Queued, "submitted")
                    .map_err(JacsError::from)?;
            }
        }

        let priority = service_data.priority();
        for dependency in service_data.dependencies.iter_mut() {
            self.prepare_for_submission(dependency, Some(priority))?;
        }
        Ok(())
    }
}
