//! # External Process Runners
//!
//! A runner launches the script prepared by an exe-based processor and hands
//! back a handle the processor polls from the suspend lane. Processors get a
//! set of runners and pick the first one that supports the service's
//! processing location.

pub mod local;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::computation::ComputationResult;
use crate::models::ProcessingLocation;

pub use local::LocalProcessRunner;

/// Everything needed to launch one external script
#[derive(Debug, Clone)]
pub struct ExternalProcessRequest {
    /// `name#id` of the service, used in errors
    pub service: String,
    pub script_path: PathBuf,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

/// How a finished job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    /// `None` when the job was killed by a signal
    pub exit_code: Option<i32>,
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Strategy for launching external scripts
#[async_trait]
pub trait ExternalProcessRunner: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, location: ProcessingLocation) -> bool;

    async fn run(&self, request: ExternalProcessRequest)
        -> ComputationResult<Box<dyn ExternalJobHandle>>;
}

/// A launched job
#[async_trait]
pub trait ExternalJobHandle: Send {
    /// `Some` once the job finished
    async fn poll(&mut self) -> ComputationResult<Option<JobOutcome>>;

    async fn terminate(&mut self) -> ComputationResult<()>;
}
