#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # JACS Services
//!
//! Asynchronous service execution engine.
//!
//! ## Overview
//!
//! A *service* is a persisted request for a unit of work, handled by the
//! *processor* registered under its name. Services may depend on other
//! services; a service only runs its own processing once every dependency
//! finished successfully. The engine admits services into a priority ordered
//! ready queue, the dispatcher starts their processors while processing slots
//! remain, and every state change is written to the store before it counts.
//!
//! ## Architecture
//!
//! - **Computations** ([`computation`]): single-resolution futures with
//!   chaining combinators, executed on a bounded main lane. Anything that
//!   polls (dependency waits, external process completion, result
//!   retrieval) runs on a separate suspend lane and is rescheduled with
//!   backoff while pending.
//! - **Orchestration** ([`orchestration`]): engine, ready queue, dispatcher,
//!   registry and system bootstrap.
//! - **Processors** ([`processors`]): the hook based lifecycle every service
//!   goes through, including processors that run external scripts.
//! - **Persistence** ([`persistence`]): in-memory and PostgreSQL stores.
//!
//! ## Module Organization
//!
//! - [`models`] - Service records, metadata and paging
//! - [`state_machine`] - Service states, events and transition rules
//! - [`config`] - Layered YAML and environment configuration
//! - [`error`] - Structured error handling
//! - [`events`] - Lifecycle event broadcasting
//! - [`logging`] - Structured console and JSON file logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jacs_services::config::ConfigManager;
//! use jacs_services::models::ServiceData;
//! use jacs_services::orchestration::JacsServiceSystem;
//!
//! # tokio_test::block_on(async {
//! let manager = ConfigManager::load()?;
//! let mut system = JacsServiceSystem::bootstrap(manager).await?;
//! system.register_builtin_processors()?;
//! system.start();
//!
//! let service = ServiceData::new("runScript").with_args(["-script", "/opt/jobs/nightly.sh"]);
//! let submitted = system.engine().submit_single_service(service).await?;
//! println!("submitted {submitted}");
//!
//! system.stop().await?;
//! # Ok::<(), jacs_services::error::JacsError>(())
//! # });
//! ```

pub mod computation;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod processors;
pub mod state_machine;

pub use computation::{
    ComputationError, ComputationResult, ServiceComputation, ServiceComputationFactory,
};
pub use config::{ConfigManager, JacsConfig};
pub use error::{JacsError, Result};
pub use models::{ServiceData, ServiceId, ServiceMetaData};
pub use orchestration::{
    JacsServiceDispatcher, JacsServiceEngine, JacsServiceSystem, ServiceRegistry,
};
pub use processors::ServiceProcessor;
pub use state_machine::ServiceState;
