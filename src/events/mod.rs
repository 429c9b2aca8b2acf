//! # Service Lifecycle Events
//!
//! Broadcast notifications emitted when services are submitted, dispatched,
//! finished or canceled.

pub mod publisher;

pub use publisher::{names, EventPublisher, ServiceLifecycleEvent};
