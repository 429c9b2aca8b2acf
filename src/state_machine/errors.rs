use super::states::ServiceState;

/// Rejected state machine moves
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Service is in terminal state {from}, cannot move to {to}")]
    TerminalState { from: ServiceState, to: ServiceState },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: ServiceState, to: ServiceState },
}

pub type StateTransitionResult<T> = Result<T, StateTransitionError>;
