//! # Service Processors
//!
//! A processor is the handler registered under a service name. The dispatcher
//! hands it a dequeued record and gets back a [`ServiceComputation`] that
//! resolves once the service has finished.
//!
//! ## Architecture
//!
//! - [`ServiceProcessor`]: the object-safe seam the registry stores
//! - [`ServiceLifecycle`]: hook based processors; [`LifeCycleServiceProcessor`]
//!   drives the hooks through dependency submission, dependency waiting,
//!   processing and result retrieval, persisting every state change
//! - [`ExternalServiceLifecycle`]: processors that run an external script,
//!   adapted to [`ServiceLifecycle`] by [`ExeBasedLifecycle`]
//! - [`ProcessorContext`]: shared engine, computation factory and service
//!   defaults handed to every hook
//!
//! ## Usage
//!
//! ```rust,ignore
//! let ctx = ProcessorContext::new(engine.clone(), factory, config.service.clone());
//! let processor = LifeCycleServiceProcessor::new(MyLifecycle, ctx);
//! registry.register(Arc::new(processor));
//! ```

pub mod context;
pub mod exe_based;
pub mod lifecycle;
pub mod output_scan;
pub mod run_script;
pub mod runners;
pub mod script;

use crate::computation::ServiceComputation;
use crate::models::{ServiceData, ServiceMetaData};

pub use context::ProcessorContext;
pub use exe_based::{ExeBasedLifecycle, ExternalServiceLifecycle};
pub use lifecycle::{LifeCycleServiceProcessor, ServiceLifecycle};
pub use output_scan::{is_error_line, scan_for_errors};
pub use run_script::{RunScriptProcessor, ScriptArgs, ScriptOutput, RUN_SCRIPT_SERVICE};
pub use runners::{
    ExternalJobHandle, ExternalProcessRequest, ExternalProcessRunner, JobOutcome,
    LocalProcessRunner,
};
pub use script::{quote_arg, ExternalCodeBlock, ScriptWriter};

/// Handler for one kind of service
pub trait ServiceProcessor: Send + Sync {
    /// Static description; `service_name` is the registry key
    fn metadata(&self) -> ServiceMetaData;

    /// Run the service, resolving to the final record or the failure cause
    fn process(&self, service_data: ServiceData) -> ServiceComputation<ServiceData>;
}
