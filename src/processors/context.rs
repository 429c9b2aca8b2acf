//! Shared collaborators and persistence helpers for processors.
//!
//! Every state change goes through [`ProcessorContext::update_state`], which
//! re-reads the stored record first. A record that another actor already moved
//! to a terminal state (an administrative cancel, a timeout recorded by a
//! waiter) is never overwritten.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::computation::{
    ComputationError, ComputationResult, ContinuationCond, ServiceComputation,
    ServiceComputationFactory,
};
use crate::config::ServiceConfig;
use crate::error::JacsError;
use crate::models::{ServiceData, ServiceId};
use crate::orchestration::JacsServiceEngine;
use crate::persistence::{PersistenceError, ServiceDataPersistence};
use crate::state_machine::ServiceState;

/// Engine, computation lanes and service defaults used by processors
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    engine: Arc<JacsServiceEngine>,
    factory: ServiceComputationFactory,
    service_config: Arc<ServiceConfig>,
}

/// Milliseconds since processing started, 0 when it has not started
pub(crate) fn elapsed_ms(service_data: &ServiceData) -> u64 {
    service_data
        .elapsed_since_start()
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

fn require_id(service_data: &ServiceData) -> ComputationResult<ServiceId> {
    service_data.id.ok_or_else(|| {
        ComputationError::Persistence(PersistenceError::MissingId(service_data.name.clone()))
    })
}

/// Map engine level failures onto the computation taxonomy
pub(crate) fn engine_error(service_data: &ServiceData, error: JacsError) -> ComputationError {
    match error {
        JacsError::Computation(error) => error,
        JacsError::Persistence(error) => ComputationError::Persistence(error),
        other => ComputationError::processing(service_data, other.to_string()),
    }
}

impl ProcessorContext {
    pub fn new(
        engine: Arc<JacsServiceEngine>,
        factory: ServiceComputationFactory,
        service_config: ServiceConfig,
    ) -> Self {
        Self {
            engine,
            factory,
            service_config: Arc::new(service_config),
        }
    }

    pub fn engine(&self) -> &Arc<JacsServiceEngine> {
        &self.engine
    }

    pub fn factory(&self) -> &ServiceComputationFactory {
        &self.factory
    }

    pub fn persistence(&self) -> &Arc<dyn ServiceDataPersistence> {
        self.engine.persistence()
    }

    pub fn service_config(&self) -> &ServiceConfig {
        &self.service_config
    }

    /// `<workspace>/<name>_<id>`, falling back to the configured default
    /// directory and then the OS temp directory
    pub fn working_directory(&self, service_data: &ServiceData) -> PathBuf {
        let base = service_data
            .workspace
            .as_ref()
            .filter(|workspace| !workspace.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| self.service_config.default_working_dir.clone())
            .unwrap_or_else(std::env::temp_dir);
        base.join(service_data.service_dir_name())
    }

    /// Move the record to `target` and persist it, unless the stored record
    /// already finished
    pub async fn update_state(
        &self,
        service_data: &mut ServiceData,
        target: ServiceState,
        details: &str,
    ) -> ComputationResult<()> {
        let id = require_id(service_data)?;
        let stored = self.persistence().get_by_id(id).await?;
        if stored.state.is_terminal() {
            service_data.state = stored.state;
            if stored.state == target {
                return Ok(());
            }
            if stored.state == ServiceState::Canceled {
                return Err(ComputationError::canceled(service_data));
            }
            return Err(ComputationError::processing(
                service_data,
                format!("already finished in state {}", stored.state),
            ));
        }

        service_data
            .transition_to(target, details)
            .map_err(|e| ComputationError::processing(service_data, e.to_string()))?;
        self.persistence().update(service_data).await?;
        debug!(service = %service_data, "Service state persisted");
        Ok(())
    }

    /// Persist the terminal state matching `error` if nobody recorded one yet
    pub async fn record_failure(&self, service_data: &ServiceData, error: &ComputationError) {
        let Some(id) = service_data.id else {
            warn!(service = %service_data.name, error = %error, "Failure of an unsaved service not persisted");
            return;
        };
        let mut stored = match self.persistence().get_by_id(id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(service_id = %id, error = %e, "Could not load service to record its failure");
                return;
            }
        };
        if stored.state.is_terminal() {
            return;
        }
        if stored.transition_to(error.terminal_state(), error.to_string()).is_ok() {
            if let Err(e) = self.persistence().update(&stored).await {
                warn!(service_id = %id, error = %e, "Could not persist service failure");
            }
        }
    }

    /// Submit `dependencies` through the engine as children of `service_data`
    pub async fn submit_dependencies(
        &self,
        service_data: &mut ServiceData,
        dependencies: Vec<ServiceData>,
    ) -> ComputationResult<()> {
        for mut dependency in dependencies {
            dependency.update_parent_service(service_data);
            if dependency.priority.is_none() {
                dependency.priority = Some(service_data.priority().saturating_add(1));
            }
            let submitted = self
                .engine
                .submit_single_service(dependency)
                .await
                .map_err(|e| engine_error(service_data, e))?;
            if let Some(id) = submitted.id {
                if !service_data.dependency_ids.contains(&id) {
                    service_data.dependency_ids.push(id);
                }
            }
        }
        self.persistence().update(service_data).await?;
        Ok(())
    }

    /// Resolves with the freshly stored record once every service in its
    /// dependency hierarchy finished successfully.
    ///
    /// Fails as soon as any of them is in ERROR, CANCELED or TIMEOUT, and
    /// with a timeout once the service deadline passes while waiting. A
    /// service that parked its processing slot resumes only after winning a
    /// slot back.
    pub fn wait_for_dependencies(&self, service_data: ServiceData) -> ServiceComputation<ServiceData> {
        if service_data.dependency_ids.is_empty() {
            return self.factory.new_completed_computation(service_data);
        }
        let ctx = self.clone();
        self.factory.suspend_until(move || {
            let ctx = ctx.clone();
            let service_data = service_data.clone();
            async move { ctx.check_dependencies(&service_data).await }
        })
    }

    async fn check_dependencies(
        &self,
        service_data: &ServiceData,
    ) -> ComputationResult<ContinuationCond<ServiceData>> {
        let id = require_id(service_data)?;
        let mut stored = self
            .persistence()
            .find_service_hierarchy(id)
            .await?
            .ok_or(PersistenceError::NotFound(id))?;
        if stored.state == ServiceState::Canceled {
            return Err(ComputationError::canceled(&stored));
        }

        for node in stored.hierarchy() {
            let missing = node.dependency_ids.iter().find(|dependency_id| {
                !node
                    .dependencies
                    .iter()
                    .any(|loaded| loaded.id == Some(**dependency_id))
            });
            if let Some(missing) = missing {
                return Err(ComputationError::dependency_failure(
                    &stored,
                    format!("dependency {missing} of {node} does not exist"),
                ));
            }
        }

        let mut pending = 0;
        for dependency in stored.dependency_hierarchy() {
            if dependency.state.is_failure() {
                return Err(ComputationError::dependency_failure(
                    &stored,
                    format!("dependency {} ended in {}", dependency, dependency.state),
                ));
            }
            if !dependency.state.is_terminal() {
                pending += 1;
            }
        }
        stored.dependencies.clear();

        if pending == 0 {
            if self.engine.resume_slot(id) {
                return Ok(ContinuationCond::Ready(stored));
            }
            debug!(service = %stored, "Dependencies done, waiting for a processing slot");
        }
        if stored.has_timed_out() {
            return Err(ComputationError::timeout(&stored, elapsed_ms(&stored)));
        }
        debug!(service = %stored, pending, "Waiting for dependencies");
        Ok(ContinuationCond::Pending)
    }

    /// Resolves with the stored record once it finished successfully.
    ///
    /// Fails when the record ends in any other state or one of its child
    /// services failed. The deadline counts from the record's processing
    /// start, or from the start of the wait while it has not started yet; a
    /// passed deadline is persisted as TIMEOUT on the waited-on record.
    pub fn wait_for_completion(&self, service_data: &ServiceData) -> ServiceComputation<ServiceData> {
        let id = match require_id(service_data) {
            Ok(id) => id,
            Err(e) => return self.factory.new_failed_computation(e),
        };
        let waiting_since = Instant::now();
        let ctx = self.clone();
        self.factory.suspend_until(move || {
            let ctx = ctx.clone();
            async move { ctx.check_completion(id, waiting_since).await }
        })
    }

    async fn check_completion(
        &self,
        id: ServiceId,
        waiting_since: Instant,
    ) -> ComputationResult<ContinuationCond<ServiceData>> {
        let stored = self.persistence().get_by_id(id).await?;
        match stored.state {
            ServiceState::Successful => return Ok(ContinuationCond::Ready(stored)),
            ServiceState::Canceled => return Err(ComputationError::canceled(&stored)),
            ServiceState::Timeout => {
                return Err(ComputationError::timeout(&stored, elapsed_ms(&stored)))
            }
            ServiceState::Error => {
                return Err(ComputationError::processing(
                    &stored,
                    "finished in state ERROR",
                ))
            }
            _ => {}
        }

        let children = self.persistence().find_child_services(id).await?;
        if let Some(failed) = children.iter().find(|child| child.state.is_failure()) {
            let error = ComputationError::dependency_failure(
                &stored,
                format!("child service {} ended in {}", failed, failed.state),
            );
            self.record_failure(&stored, &error).await;
            return Err(error);
        }

        let elapsed = stored
            .elapsed_since_start()
            .unwrap_or_else(|| waiting_since.elapsed());
        if let Some(timeout) = stored.timeout() {
            if elapsed > timeout {
                warn!(service = %stored, elapsed_ms = waited_ms(elapsed), "⏰ Service timed out");
                let error = ComputationError::timeout(&stored, waited_ms(elapsed));
                self.record_failure(&stored, &error).await;
                return Err(error);
            }
        }
        Ok(ContinuationCond::Pending)
    }

    /// Persist `service_data` if needed and run its processor in place,
    /// bypassing the ready queue and the slot budget
    pub fn invoke(&self, service_data: ServiceData) -> ServiceComputation<ServiceData> {
        let Some(processor) = self.engine.get_service_processor(&service_data) else {
            return self
                .factory
                .new_failed_computation(ComputationError::RegistryMiss(service_data.name));
        };
        let persistence = self.persistence().clone();
        self.factory
            .new_computation(async move {
                let mut service_data = service_data;
                if !service_data.has_id() {
                    persistence.save_hierarchy(&mut service_data).await?;
                }
                Ok(service_data)
            })
            .then_compose(move |service_data| processor.process(service_data))
    }

    /// Submit `service_data` through the engine and wait for it to finish
    pub fn invoke_async(&self, service_data: ServiceData) -> ServiceComputation<ServiceData> {
        let engine = self.engine.clone();
        let ctx = self.clone();
        self.factory
            .new_computation(async move {
                let label = service_data.clone();
                engine
                    .submit_single_service(service_data)
                    .await
                    .map_err(|e| engine_error(&label, e))
            })
            .then_compose(move |submitted| ctx.wait_for_completion(&submitted))
    }
}

fn waited_ms(waited: Duration) -> u64 {
    waited.as_millis() as u64
}
