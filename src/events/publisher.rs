use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{ServiceData, ServiceId};
use crate::state_machine::ServiceState;

/// Event names published by the engine and dispatcher
pub mod names {
    pub const SERVICE_SUBMITTED: &str = "service.submitted";
    pub const SERVICE_DISPATCHED: &str = "service.dispatched";
    pub const SERVICE_COMPLETED: &str = "service.completed";
    pub const SERVICE_FAILED: &str = "service.failed";
    pub const SERVICE_CANCELED: &str = "service.canceled";
}

/// Snapshot of a service at the moment something happened to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceLifecycleEvent {
    pub name: String,
    pub service_id: Option<ServiceId>,
    pub service_name: String,
    pub state: ServiceState,
    pub details: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl ServiceLifecycleEvent {
    pub fn new(name: impl Into<String>, service_data: &ServiceData) -> Self {
        Self {
            name: name.into(),
            service_id: service_data.id,
            service_name: service_data.name.clone(),
            state: service_data.state,
            details: None,
            published_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Broadcast publisher for service lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ServiceLifecycleEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many subscribers received it.
    ///
    /// Publishing without subscribers is not an error.
    pub fn publish(&self, event: ServiceLifecycleEvent) -> usize {
        trace!(event = %event.name, service_id = ?event.service_id, "Publishing lifecycle event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Shorthand for publishing `name` for `service_data`
    pub fn publish_service_event(&self, name: &str, service_data: &ServiceData) -> usize {
        self.publish(ServiceLifecycleEvent::new(name, service_data))
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceLifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
