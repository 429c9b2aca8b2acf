use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jacs_services::computation::{ComputationError, ComputationResult, ServiceComputation};
use jacs_services::models::{ServiceData, ServiceMetaData};
use jacs_services::processors::{ProcessorContext, ServiceLifecycle};

/// Lifecycle whose processing succeeds or fails on demand and counts runs
#[derive(Clone)]
pub struct ScriptedLifecycle {
    pub name: String,
    pub failure: Option<String>,
    pub dependencies: Vec<String>,
    pub processed: Arc<AtomicUsize>,
}

impl ScriptedLifecycle {
    pub fn succeeding(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failure: None,
            dependencies: Vec::new(),
            processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::succeeding(name)
        }
    }

    /// Submit a fresh service named `dependency` before processing
    pub fn depending_on(mut self, dependency: &str) -> Self {
        self.dependencies.push(dependency.to_string());
        self
    }

    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceLifecycle for ScriptedLifecycle {
    type Output = String;

    fn metadata(&self) -> ServiceMetaData {
        ServiceMetaData::new(&self.name)
    }

    async fn submit_dependencies(
        &self,
        _ctx: &ProcessorContext,
        _service_data: &ServiceData,
    ) -> ComputationResult<Vec<ServiceData>> {
        Ok(self
            .dependencies
            .iter()
            .map(|name| ServiceData::new(name.as_str()))
            .collect())
    }

    fn processing(
        &self,
        ctx: &ProcessorContext,
        service_data: ServiceData,
    ) -> ServiceComputation<ServiceData> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(reason) => ctx
                .factory()
                .new_failed_computation(ComputationError::processing(&service_data, reason.as_str())),
            None => ctx.factory().new_completed_computation(service_data),
        }
    }

    async fn collect_result(
        &self,
        _ctx: &ProcessorContext,
        service_data: &ServiceData,
    ) -> ComputationResult<String> {
        Ok(format!("{} done", service_data.name))
    }
}
