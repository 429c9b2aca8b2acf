//! # Service Data Persistence
//!
//! The persisted service hierarchy is the single source of truth for state
//! visibility across threads and processes. Every state change is written
//! through [`ServiceDataPersistence`] before it counts, and readers always
//! re-fetch instead of caching.
//!
//! ## Implementations
//!
//! - [`InMemoryServiceDataPersistence`]: process-local store used by tests and
//!   single-node deployments without a database
//! - [`PgServiceDataPersistence`]: PostgreSQL store with a JSONB payload column
//!   and a dependency edge table

pub mod hierarchy;
pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use crate::models::{PageRequest, PageResult, ServiceData, ServiceId};
use crate::state_machine::ServiceState;

pub use in_memory::InMemoryServiceDataPersistence;
pub use postgres::PgServiceDataPersistence;

/// Errors raised by the persistence collaborator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistenceError {
    #[error("Service {0} not found")]
    NotFound(ServiceId),

    #[error("Service record has not been persisted yet: {0}")]
    MissingId(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Storage operations the engine relies on
#[async_trait]
pub trait ServiceDataPersistence: Send + Sync {
    /// Fetch one record without its dependency tree
    async fn find_by_id(&self, id: ServiceId) -> PersistenceResult<Option<ServiceData>>;

    /// Fetch a record with its full transitive dependency tree attached
    async fn find_service_hierarchy(&self, id: ServiceId) -> PersistenceResult<Option<ServiceData>>;

    /// Records whose parent is `id`
    async fn find_child_services(&self, id: ServiceId) -> PersistenceResult<Vec<ServiceData>>;

    /// Records in any of `states`, highest priority first, then by id
    async fn find_services_by_state(
        &self,
        states: &[ServiceState],
        page: &PageRequest,
    ) -> PersistenceResult<PageResult<ServiceData>>;

    /// Persist a record together with its in-memory dependencies.
    ///
    /// Ids are assigned once to every record that does not have one yet;
    /// parent/root ids and dependency ids are wired on the way.
    async fn save_hierarchy(&self, service_data: &mut ServiceData) -> PersistenceResult<()>;

    /// Overwrite an already persisted record
    async fn update(&self, service_data: &ServiceData) -> PersistenceResult<()>;

    /// Overwrite every record of an already persisted hierarchy
    async fn update_hierarchy(&self, service_data: &ServiceData) -> PersistenceResult<()> {
        for record in service_data.hierarchy() {
            self.update(record).await?;
        }
        Ok(())
    }

    /// Fetch a record that must exist
    async fn get_by_id(&self, id: ServiceId) -> PersistenceResult<ServiceData> {
        self.find_by_id(id)
            .await?
            .ok_or(PersistenceError::NotFound(id))
    }
}
