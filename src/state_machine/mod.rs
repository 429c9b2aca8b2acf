//! # Service State Machine
//!
//! States, transition rules and event log entries for persisted service records.
//! Transitions are monotonic: once a service reaches a terminal state
//! (SUCCESSFUL, ERROR, CANCELED, TIMEOUT) nothing moves it again.

pub mod errors;
pub mod events;
pub mod states;

pub use errors::{StateTransitionError, StateTransitionResult};
pub use events::{ServiceEvent, ServiceEventType};
pub use states::ServiceState;
