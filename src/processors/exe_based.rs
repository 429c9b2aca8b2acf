//! # Exe-Based Processors
//!
//! Services whose work is done by an external program. The implementation
//! only writes the commands to run ([`ExternalServiceLifecycle`]);
//! [`ExeBasedLifecycle`] turns that into a [`ServiceLifecycle`]:
//!
//! - the commands go to `<workdir>/<name>_<id>.sh`
//! - the environment carries the service identity and an `LD_LIBRARY_PATH`
//!   extended with `service.library_path`
//! - stdout and stderr are captured to `<workdir>/<name>-stdout.txt` and
//!   `<workdir>/<name>-stderr.txt`
//! - the first runner supporting the service's processing location launches
//!   the script and the job is polled from the suspend lane
//! - a non-zero exit code, or an error line in either capture, fails the
//!   service

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::context::{elapsed_ms, ProcessorContext};
use super::lifecycle::ServiceLifecycle;
use super::output_scan::scan_for_errors;
use super::runners::{ExternalJobHandle, ExternalProcessRequest, ExternalProcessRunner, JobOutcome};
use super::script::ScriptWriter;
use crate::computation::{ComputationError, ComputationResult, ContinuationCond, ServiceComputation};
use crate::models::{ServiceData, ServiceMetaData};

const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Hooks of a service run by an external program
#[async_trait]
pub trait ExternalServiceLifecycle: Send + Sync + 'static {
    type Output: Serialize + Send + 'static;

    fn metadata(&self) -> ServiceMetaData;

    async fn submit_dependencies(
        &self,
        _ctx: &ProcessorContext,
        _service_data: &ServiceData,
    ) -> ComputationResult<Vec<ServiceData>> {
        Ok(Vec::new())
    }

    /// Write the commands the external script runs
    fn prepare_external_script(
        &self,
        ctx: &ProcessorContext,
        service_data: &ServiceData,
        script: &mut ScriptWriter,
    ) -> ComputationResult<()>;

    /// Adjust the environment the script runs with
    fn prepare_environment(
        &self,
        _ctx: &ProcessorContext,
        _service_data: &ServiceData,
        _env: &mut HashMap<String, String>,
    ) -> ComputationResult<()> {
        Ok(())
    }

    async fn is_result_ready(
        &self,
        _ctx: &ProcessorContext,
        _service_data: &ServiceData,
    ) -> ComputationResult<bool> {
        Ok(true)
    }

    async fn collect_result(
        &self,
        ctx: &ProcessorContext,
        service_data: &ServiceData,
    ) -> ComputationResult<Self::Output>;
}

type SharedJob = Arc<Mutex<Box<dyn ExternalJobHandle>>>;

/// [`ServiceLifecycle`] running an [`ExternalServiceLifecycle`] through one of
/// the configured runners
pub struct ExeBasedLifecycle<E> {
    inner: Arc<E>,
    runners: Arc<Vec<Arc<dyn ExternalProcessRunner>>>,
}

impl<E> Clone for ExeBasedLifecycle<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            runners: self.runners.clone(),
        }
    }
}

impl<E: ExternalServiceLifecycle> ExeBasedLifecycle<E> {
    pub fn new(inner: E, runners: Vec<Arc<dyn ExternalProcessRunner>>) -> Self {
        Self {
            inner: Arc::new(inner),
            runners: Arc::new(runners),
        }
    }

    pub fn inner(&self) -> &Arc<E> {
        &self.inner
    }

    pub fn script_path(ctx: &ProcessorContext, service_data: &ServiceData) -> PathBuf {
        ctx.working_directory(service_data)
            .join(format!("{}.sh", service_data.service_dir_name()))
    }

    pub fn stdout_path(ctx: &ProcessorContext, service_data: &ServiceData) -> PathBuf {
        ctx.working_directory(service_data)
            .join(format!("{}-stdout.txt", service_data.name))
    }

    pub fn stderr_path(ctx: &ProcessorContext, service_data: &ServiceData) -> PathBuf {
        ctx.working_directory(service_data)
            .join(format!("{}-stderr.txt", service_data.name))
    }

    fn select_runner(
        &self,
        service_data: &ServiceData,
    ) -> ComputationResult<Arc<dyn ExternalProcessRunner>> {
        let location = service_data.processing_location.unwrap_or_default();
        self.runners
            .iter()
            .find(|runner| runner.supports(location))
            .cloned()
            .ok_or_else(|| {
                ComputationError::processing(
                    service_data,
                    format!("no process runner supports {location:?} processing"),
                )
            })
    }

    fn build_environment(
        &self,
        ctx: &ProcessorContext,
        service_data: &ServiceData,
    ) -> ComputationResult<HashMap<String, String>> {
        let config = ctx.service_config();
        let mut env = HashMap::new();
        env.insert("JACS_SERVICE_NAME".to_string(), service_data.name.clone());
        if let Some(id) = service_data.id {
            env.insert("JACS_SERVICE_ID".to_string(), id.to_string());
        }
        env.insert(
            "JACS_WORKING_DIR".to_string(),
            ctx.working_directory(service_data).display().to_string(),
        );
        if let Some(executables) = &config.executables_base_dir {
            env.insert(
                "JACS_EXECUTABLES_DIR".to_string(),
                executables.display().to_string(),
            );
        }

        let mut library_path: Vec<String> = config.library_path.clone();
        if let Ok(existing) = std::env::var(LIBRARY_PATH_VAR) {
            library_path.extend(
                existing
                    .split(':')
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_string),
            );
        }
        if !library_path.is_empty() {
            env.insert(LIBRARY_PATH_VAR.to_string(), library_path.join(":"));
        }

        self.inner.prepare_environment(ctx, service_data, &mut env)?;
        Ok(env)
    }

    async fn launch(
        &self,
        ctx: &ProcessorContext,
        service_data: &ServiceData,
    ) -> ComputationResult<SharedJob> {
        let io_error = |e: std::io::Error| ComputationError::processing(service_data, e.to_string());
        let working_dir = ctx.working_directory(service_data);
        tokio::fs::create_dir_all(&working_dir)
            .await
            .map_err(io_error)?;

        let mut script = ScriptWriter::new();
        self.inner
            .prepare_external_script(ctx, service_data, &mut script)?;
        let script_path = Self::script_path(ctx, service_data);
        tokio::fs::write(&script_path, script.finish())
            .await
            .map_err(io_error)?;

        let runner = self.select_runner(service_data)?;
        let request = ExternalProcessRequest {
            service: crate::computation::service_label(service_data),
            script_path,
            working_dir,
            env: self.build_environment(ctx, service_data)?,
            stdout_path: Self::stdout_path(ctx, service_data),
            stderr_path: Self::stderr_path(ctx, service_data),
        };
        info!(service = %service_data, runner = runner.name(), "Launching external process");
        let job = runner.run(request).await?;
        Ok(Arc::new(Mutex::new(job)))
    }

    /// Resolve once the job finished; past the deadline the job is terminated
    fn wait_for_process(
        ctx: &ProcessorContext,
        service_data: ServiceData,
        job: SharedJob,
    ) -> ServiceComputation<(ServiceData, JobOutcome)> {
        ctx.factory().suspend_until(move || {
            let service_data = service_data.clone();
            let job = job.clone();
            async move {
                let mut job = job.lock().await;
                if let Some(outcome) = job.poll().await? {
                    return Ok(ContinuationCond::Ready((service_data, outcome)));
                }
                if service_data.has_timed_out() {
                    warn!(service = %service_data, "Deadline passed, terminating external process");
                    job.terminate().await?;
                    return Err(ComputationError::timeout(
                        &service_data,
                        elapsed_ms(&service_data),
                    ));
                }
                Ok(ContinuationCond::Pending)
            }
        })
    }

    async fn check_outcome(
        service_data: ServiceData,
        outcome: JobOutcome,
    ) -> ComputationResult<ServiceData> {
        if !outcome.success() {
            let code = outcome
                .exit_code
                .map_or_else(|| "a signal".to_string(), |code| format!("exit code {code}"));
            return Err(ComputationError::processing(
                &service_data,
                format!("external process ended with {code}"),
            ));
        }

        let mut error_lines = Vec::new();
        for path in [&service_data.output_path, &service_data.error_path]
            .into_iter()
            .flatten()
        {
            let found = scan_for_errors(Path::new(path))
                .await
                .map_err(|e| ComputationError::processing(&service_data, e.to_string()))?;
            error_lines.extend(found);
        }
        if let Some(first) = error_lines.first() {
            return Err(ComputationError::processing(
                &service_data,
                format!(
                    "{} error line(s) in process output, first: {first}",
                    error_lines.len()
                ),
            ));
        }
        debug!(service = %service_data, "External process output is clean");
        Ok(service_data)
    }
}

#[async_trait]
impl<E: ExternalServiceLifecycle> ServiceLifecycle for ExeBasedLifecycle<E> {
    type Output = E::Output;

    fn metadata(&self) -> ServiceMetaData {
        self.inner.metadata()
    }

    async fn submit_dependencies(
        &self,
        ctx: &ProcessorContext,
        service_data: &ServiceData,
    ) -> ComputationResult<Vec<ServiceData>> {
        self.inner.submit_dependencies(ctx, service_data).await
    }

    async fn prepare_processing(
        &self,
        ctx: &ProcessorContext,
        service_data: &mut ServiceData,
    ) -> ComputationResult<()> {
        service_data.output_path = Some(Self::stdout_path(ctx, service_data).display().to_string());
        service_data.error_path = Some(Self::stderr_path(ctx, service_data).display().to_string());
        ctx.persistence().update(service_data).await?;
        Ok(())
    }

    fn processing(
        &self,
        ctx: &ProcessorContext,
        service_data: ServiceData,
    ) -> ServiceComputation<ServiceData> {
        let this = self.clone();
        let launch_ctx = ctx.clone();
        let wait_ctx = ctx.clone();
        ctx.factory()
            .new_computation(async move {
                let job = this.launch(&launch_ctx, &service_data).await?;
                Ok((service_data, job))
            })
            .then_compose(move |(service_data, job)| Self::wait_for_process(&wait_ctx, service_data, job))
            .then_apply_async(|(service_data, outcome)| Self::check_outcome(service_data, outcome))
    }

    async fn is_result_ready(
        &self,
        ctx: &ProcessorContext,
        service_data: &ServiceData,
    ) -> ComputationResult<bool> {
        self.inner.is_result_ready(ctx, service_data).await
    }

    async fn collect_result(
        &self,
        ctx: &ProcessorContext,
        service_data: &ServiceData,
    ) -> ComputationResult<Self::Output> {
        self.inner.collect_result(ctx, service_data).await
    }
}
