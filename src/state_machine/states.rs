use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::StateTransitionError;

/// Lifecycle states of a persisted service record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    /// Record built in memory or just persisted, not yet queued
    #[default]
    Created,
    /// Waiting in the ready queue for a processing slot
    Queued,
    /// Dequeued and handed to a processor
    Dispatched,
    /// Processor is executing the service
    Running,
    /// Waiting for dependencies to reach a terminal state
    Suspended,
    /// Finished successfully
    Successful,
    /// Finished with a processing or dependency failure
    Error,
    /// Canceled by an external actor
    Canceled,
    /// Deadline exceeded before the service finished
    Timeout,
}

impl ServiceState {
    pub const ALL: [ServiceState; 9] = [
        Self::Created,
        Self::Queued,
        Self::Dispatched,
        Self::Running,
        Self::Suspended,
        Self::Successful,
        Self::Error,
        Self::Canceled,
        Self::Timeout,
    ];

    /// States the ready queue admits on refresh
    pub const RUNNABLE: [ServiceState; 2] = [Self::Created, Self::Queued];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Successful | Self::Error | Self::Canceled | Self::Timeout
        )
    }

    /// Terminal states other than success
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Canceled | Self::Timeout)
    }

    pub fn is_runnable(&self) -> bool {
        Self::RUNNABLE.contains(self)
    }

    /// Check if the service is being worked on
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Running | Self::Suspended)
    }

    /// Whether moving from `self` to `target` is a legal transition.
    ///
    /// Self-transitions on non-terminal states are accepted as no-ops.
    pub fn can_transition_to(&self, target: ServiceState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == target || target.is_terminal() {
            return true;
        }
        matches!(
            (self, target),
            (Self::Created, Self::Queued)
                | (Self::Created, Self::Dispatched)
                | (Self::Queued, Self::Dispatched)
                | (Self::Created, Self::Running)
                | (Self::Queued, Self::Running)
                | (Self::Dispatched, Self::Running)
                | (Self::Running, Self::Suspended)
                | (Self::Suspended, Self::Running)
        )
    }

    /// Validate a transition, returning the target state when legal
    pub fn transition_to(&self, target: ServiceState) -> Result<ServiceState, StateTransitionError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else if self.is_terminal() {
            Err(StateTransitionError::TerminalState {
                from: *self,
                to: target,
            })
        } else {
            Err(StateTransitionError::InvalidTransition {
                from: *self,
                to: target,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Queued => "QUEUED",
            Self::Dispatched => "DISPATCHED",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Successful => "SUCCESSFUL",
            Self::Error => "ERROR",
            Self::Canceled => "CANCELED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Invalid service state: {s}"))
    }
}
