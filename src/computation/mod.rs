//! # Service Computations
//!
//! The concurrency primitive the engine, dispatcher and processors are built
//! on: [`ServiceComputation`] futures created by a [`ServiceComputationFactory`]
//! and executed on two bounded [`ServiceComputationQueue`] lanes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jacs_services::computation::{ContinuationCond, ServiceComputationFactory};
//! use jacs_services::config::ComputationConfig;
//!
//! # tokio_test::block_on(async {
//! let factory = ServiceComputationFactory::new(&ComputationConfig::default()).unwrap();
//! let doubled = factory
//!     .new_completed_computation(21)
//!     .then_apply(|v| v * 2)
//!     .then_suspend_until(|v| async move { Ok(ContinuationCond::Ready(v)) })
//!     .await;
//! assert_eq!(doubled, Ok(42));
//! # });
//! ```

pub mod errors;
pub mod factory;
pub mod queue;
pub mod service_computation;

pub use errors::{service_label, ComputationError, ComputationResult};
pub use factory::ServiceComputationFactory;
pub use queue::{Backoff, ComputationTask, QueueStats, ServiceComputationQueue, TaskPoll};
pub use service_computation::{ContinuationCond, ServiceComputation};
