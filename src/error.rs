use crate::computation::ComputationError;
use crate::config::ConfigurationError;
use crate::persistence::PersistenceError;
use crate::state_machine::StateTransitionError;

/// Top-level error for engine setup and administrative operations.
///
/// Failures that happen while a service is being processed travel as
/// [`ComputationError`] inside a `ServiceComputation`; this type covers
/// everything around it.
#[derive(Debug, thiserror::Error)]
pub enum JacsError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Computation error: {0}")]
    Computation(#[from] ComputationError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JacsError>;
