use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::states::ServiceState;

/// Kinds of entries recorded in a service's event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEventType {
    Created,
    Queued,
    Dispatched,
    Running,
    Suspend,
    Completed,
    Failed,
    Canceled,
    Timeout,
}

impl ServiceEventType {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Suspend => "suspend",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
        }
    }

    /// Event type that records entering the given state
    pub fn for_state(state: ServiceState) -> Self {
        match state {
            ServiceState::Created => Self::Created,
            ServiceState::Queued => Self::Queued,
            ServiceState::Dispatched => Self::Dispatched,
            ServiceState::Running => Self::Running,
            ServiceState::Suspended => Self::Suspend,
            ServiceState::Successful => Self::Completed,
            ServiceState::Error => Self::Failed,
            ServiceState::Canceled => Self::Canceled,
            ServiceState::Timeout => Self::Timeout,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Timeout
        )
    }
}

impl fmt::Display for ServiceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// One entry in a service's append-only event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub event_type: ServiceEventType,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

impl ServiceEvent {
    pub fn new(event_type: ServiceEventType, value: impl Into<String>) -> Self {
        Self {
            event_type,
            value: value.into(),
            timestamp: Utc::now(),
        }
    }
}
