use crate::models::ServiceData;
use crate::persistence::PersistenceError;
use crate::state_machine::ServiceState;

/// Why a service computation failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputationError {
    /// A required dependency ended in ERROR, CANCELED or TIMEOUT
    #[error("Service {service} failed because of its dependencies: {reason}")]
    DependencyFailure { service: String, reason: String },

    /// The service deadline passed while waiting
    #[error("Service {service} timed out after {elapsed_ms}ms")]
    Timeout { service: String, elapsed_ms: u64 },

    /// Local or external processing raised or reported a failure
    #[error("Processing error for service {service}: {reason}")]
    Processing { service: String, reason: String },

    /// The stored record was canceled while the computation ran
    #[error("Service {service} was canceled")]
    Canceled { service: String },

    /// No processor is registered under the requested name
    #[error("No processor registered for service '{0}'")]
    RegistryMiss(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The producer of a computation went away without resolving it
    #[error("Computation abandoned before producing a result")]
    Abandoned,
}

impl ComputationError {
    pub fn dependency_failure(service_data: &ServiceData, reason: impl Into<String>) -> Self {
        Self::DependencyFailure {
            service: service_label(service_data),
            reason: reason.into(),
        }
    }

    pub fn timeout(service_data: &ServiceData, elapsed_ms: u64) -> Self {
        Self::Timeout {
            service: service_label(service_data),
            elapsed_ms,
        }
    }

    pub fn processing(service_data: &ServiceData, reason: impl Into<String>) -> Self {
        Self::Processing {
            service: service_label(service_data),
            reason: reason.into(),
        }
    }

    pub fn canceled(service_data: &ServiceData) -> Self {
        Self::Canceled {
            service: service_label(service_data),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Terminal state a service failing with this error is persisted in
    pub fn terminal_state(&self) -> ServiceState {
        match self {
            Self::Timeout { .. } => ServiceState::Timeout,
            Self::Canceled { .. } => ServiceState::Canceled,
            _ => ServiceState::Error,
        }
    }
}

/// `name#id` label used in error messages
pub fn service_label(service_data: &ServiceData) -> String {
    match service_data.id {
        Some(id) => format!("{}#{}", service_data.name, id),
        None => service_data.name.clone(),
    }
}

pub type ComputationResult<T> = Result<T, ComputationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceId;

    #[test]
    fn test_error_messages_and_states() {
        let mut sd = ServiceData::new("flirt");
        sd.id = Some(ServiceId(5));

        let timeout = ComputationError::timeout(&sd, 1200);
        assert_eq!(timeout.to_string(), "Service flirt#5 timed out after 1200ms");
        assert!(timeout.is_timeout());
        assert_eq!(timeout.terminal_state(), ServiceState::Timeout);

        let failure = ComputationError::dependency_failure(&sd, "convert#6 [ERROR]");
        assert_eq!(failure.terminal_state(), ServiceState::Error);
        assert!(failure.to_string().contains("convert#6"));

        assert_eq!(
            ComputationError::RegistryMiss("missing".into()).to_string(),
            "No processor registered for service 'missing'"
        );
    }
}
