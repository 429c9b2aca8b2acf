//! # Service Orchestration
//!
//! Admission, queueing and dispatch of services.
//!
//! ## Core Components
//!
//! - **JacsServiceEngine**: front door for submissions, owner of the
//!   processing slot budget and of processor lookup
//! - **ServiceQueue**: priority ordered window over the runnable records of the
//!   store, refreshed periodically
//! - **JacsServiceDispatcher**: starts processors for ready services while
//!   slots remain and persists their outcome
//! - **ServiceRegistry**: explicit name to processor mapping populated at
//!   startup
//! - **JacsServiceSystem**: configuration driven wiring and lifecycle of all of
//!   the above

pub mod bootstrap;
pub mod dispatcher;
pub mod engine;
pub mod registry;
pub mod service_queue;

pub use bootstrap::{BootstrapConfig, JacsServiceSystem, SystemStatus};
pub use dispatcher::JacsServiceDispatcher;
pub use engine::{normalize_priorities, JacsServiceEngine, ServerStats};
pub use registry::ServiceRegistry;
pub use service_queue::{EnqueueOutcome, InMemoryServiceQueue, ServiceQueue};
