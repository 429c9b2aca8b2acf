//! # Lifecycle Processors
//!
//! [`LifeCycleServiceProcessor`] runs a [`ServiceLifecycle`] through the fixed
//! pipeline every service follows:
//!
//! 1. record the start time and persist RUNNING
//! 2. submit the dependencies the lifecycle asks for
//! 3. persist SUSPENDED, park the processing slot and poll the stored
//!    hierarchy on the suspend lane until every dependency finished and a slot
//!    is free again; a failed dependency or a passed deadline ends the service
//!    without running its processing
//! 4. persist RUNNING, then `prepare_processing`, `processing` and
//!    `post_processing`
//! 5. poll `is_result_ready` up to `service.result_retries` times, store the
//!    collected result and persist SUCCESSFUL
//!
//! Any failure is persisted as the matching terminal state before the
//! returned computation resolves.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::context::{elapsed_ms, ProcessorContext};
use super::ServiceProcessor;
use crate::computation::{ComputationError, ComputationResult, ContinuationCond, ServiceComputation};
use crate::models::{ServiceData, ServiceMetaData};
use crate::state_machine::ServiceState;

/// Hooks a service implementation provides
#[async_trait]
pub trait ServiceLifecycle: Send + Sync + 'static {
    /// Result stored as JSON on the record
    type Output: Serialize + Send + 'static;

    fn metadata(&self) -> ServiceMetaData;

    /// Services that must finish before this one is processed
    async fn submit_dependencies(
        &self,
        _ctx: &ProcessorContext,
        _service_data: &ServiceData,
    ) -> ComputationResult<Vec<ServiceData>> {
        Ok(Vec::new())
    }

    async fn prepare_processing(
        &self,
        _ctx: &ProcessorContext,
        _service_data: &mut ServiceData,
    ) -> ComputationResult<()> {
        Ok(())
    }

    /// The work itself
    fn processing(
        &self,
        ctx: &ProcessorContext,
        service_data: ServiceData,
    ) -> ServiceComputation<ServiceData>;

    async fn post_processing(
        &self,
        _ctx: &ProcessorContext,
        _service_data: &mut ServiceData,
    ) -> ComputationResult<()> {
        Ok(())
    }

    /// Checked on the suspend lane until it returns true
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

/// [`ServiceProcessor`] driving a [`ServiceLifecycle`]
pub struct LifeCycleServiceProcessor<L> {
    lifecycle: Arc<L>,
    ctx: ProcessorContext,
}

impl<L> std::fmt::Debug for LifeCycleServiceProcessor<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifeCycleServiceProcessor")
            .field("lifecycle", &std::any::type_name::<L>())
            .finish()
    }
}

impl<L: ServiceLifecycle> LifeCycleServiceProcessor<L> {
    pub fn new(lifecycle: L, ctx: ProcessorContext) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
            ctx,
        }
    }

    pub fn lifecycle(&self) -> &Arc<L> {
        &self.lifecycle
    }

    pub fn context(&self) -> &ProcessorContext {
        &self.ctx
    }

    /// Resolves once the stored record reached a terminal state
    pub fn wait_for_completion(&self, service_data: &ServiceData) -> ServiceComputation<ServiceData> {
        self.ctx.wait_for_completion(service_data)
    }
}

async fn start_processing<L: ServiceLifecycle>(
    lifecycle: Arc<L>,
    ctx: ProcessorContext,
    mut service_data: ServiceData,
) -> ComputationResult<ServiceData> {
    if service_data.process_start_time.is_none() {
        service_data.process_start_time = Some(Utc::now());
    }
    ctx.update_state(&mut service_data, ServiceState::Running, "processing started")
        .await?;

    let dependencies = lifecycle.submit_dependencies(&ctx, &service_data).await?;
    if !dependencies.is_empty() {
        debug!(service = %service_data, count = dependencies.len(), "Submitting dependencies");
        ctx.submit_dependencies(&mut service_data, dependencies).await?;
    }
    if !service_data.dependency_ids.is_empty() {
        ctx.update_state(
            &mut service_data,
            ServiceState::Suspended,
            "waiting for dependencies",
        )
        .await?;
        if let Some(id) = service_data.id {
            ctx.engine().park_slot(id);
        }
    }
    Ok(service_data)
}

async fn prepare<L: ServiceLifecycle>(
    lifecycle: Arc<L>,
    ctx: ProcessorContext,
    mut service_data: ServiceData,
) -> ComputationResult<ServiceData> {
    if service_data.has_been_suspended() {
        ctx.update_state(
            &mut service_data,
            ServiceState::Running,
            "dependencies completed",
        )
        .await?;
    }
    lifecycle.prepare_processing(&ctx, &mut service_data).await?;
    Ok(service_data)
}

async fn finish<L: ServiceLifecycle>(
    lifecycle: Arc<L>,
    ctx: ProcessorContext,
    mut service_data: ServiceData,
) -> ComputationResult<ServiceData> {
    lifecycle.post_processing(&ctx, &mut service_data).await?;
    Ok(service_data)
}

/// Poll `is_result_ready` on the suspend lane and store the collected result.
///
/// Checks closer together than `result_retry_interval` do not count as
/// attempts. Running out of attempts, or past the service deadline, is a
/// timeout.
fn retrieve_result_when_ready<L: ServiceLifecycle>(
    lifecycle: Arc<L>,
    ctx: ProcessorContext,
    service_data: ServiceData,
) -> ServiceComputation<ServiceData> {
    let retries = ctx.service_config().result_retries.max(1);
    let interval = ctx.service_config().result_retry_interval();
    let mut attempts: u32 = 0;
    let mut last_attempt: Option<Instant> = None;
    let factory = ctx.factory().clone();

    factory.suspend_until(move || {
        let due = last_attempt.map_or(true, |at| at.elapsed() >= interval);
        if due {
            attempts += 1;
            last_attempt = Some(Instant::now());
        }
        let attempt = attempts;
        let lifecycle = lifecycle.clone();
        let ctx = ctx.clone();
        let service_data = service_data.clone();

        async move {
            if service_data.has_timed_out() {
                return Err(ComputationError::timeout(
                    &service_data,
                    elapsed_ms(&service_data),
                ));
            }
            if !due {
                return Ok(ContinuationCond::Pending);
            }
            if lifecycle.is_result_ready(&ctx, &service_data).await? {
                let output = lifecycle.collect_result(&ctx, &service_data).await?;
                let value = serde_json::to_value(output).map_err(|e| {
                    ComputationError::processing(&service_data, format!("result not serializable: {e}"))
                })?;
                let mut service_data = service_data;
                service_data.result = Some(value);
                return Ok(ContinuationCond::Ready(service_data));
            }
            if attempt >= retries {
                warn!(service = %service_data, attempts = attempt, "Result never became ready");
                return Err(ComputationError::timeout(
                    &service_data,
                    elapsed_ms(&service_data),
                ));
            }
            Ok(ContinuationCond::Pending)
        }
    })
}

async fn complete(
    ctx: ProcessorContext,
    mut service_data: ServiceData,
) -> ComputationResult<ServiceData> {
    ctx.update_state(&mut service_data, ServiceState::Successful, "completed")
        .await?;
    info!(service = %service_data, elapsed_ms = elapsed_ms(&service_data), "✅ Service completed");
    Ok(service_data)
}

impl<L: ServiceLifecycle> ServiceProcessor for LifeCycleServiceProcessor<L> {
    fn metadata(&self) -> ServiceMetaData {
        self.lifecycle.metadata()
    }

    fn process(&self, service_data: ServiceData) -> ServiceComputation<ServiceData> {
        let factory = self.ctx.factory().clone();
        let failed = service_data.clone();

        let (lifecycle, ctx) = (self.lifecycle.clone(), self.ctx.clone());
        let started = factory.new_computation(start_processing(lifecycle, ctx, service_data));

        let ctx = self.ctx.clone();
        let (lifecycle, prepare_ctx) = (self.lifecycle.clone(), self.ctx.clone());
        let (processing_lifecycle, processing_ctx) = (self.lifecycle.clone(), self.ctx.clone());
        let (finish_lifecycle, finish_ctx) = (self.lifecycle.clone(), self.ctx.clone());
        let (result_lifecycle, result_ctx) = (self.lifecycle.clone(), self.ctx.clone());
        let complete_ctx = self.ctx.clone();
        let failure_ctx = self.ctx.clone();

        started
            .then_compose(move |service_data| ctx.wait_for_dependencies(service_data))
            .then_apply_async(move |service_data| prepare(lifecycle, prepare_ctx, service_data))
            .then_compose(move |service_data| {
                processing_lifecycle.processing(&processing_ctx, service_data)
            })
            .then_apply_async(move |service_data| finish(finish_lifecycle, finish_ctx, service_data))
            .then_compose(move |service_data| {
                retrieve_result_when_ready(result_lifecycle, result_ctx, service_data)
            })
            .then_apply_async(move |service_data| complete(complete_ctx, service_data))
            .recover_with(move |error| {
                warn!(service = %failed, error = %error, "❌ Service failed");
                let factory = failure_ctx.factory().clone();
                factory.new_computation(async move {
                    failure_ctx.record_failure(&failed, &error).await;
                    Err(error)
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComputationConfig, QueueConfig, ServiceConfig};
    use crate::orchestration::{InMemoryServiceQueue, JacsServiceEngine, ServiceRegistry};
    use crate::persistence::{InMemoryServiceDataPersistence, ServiceDataPersistence};
    use crate::computation::ServiceComputationFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Doubler {
        ready_after: usize,
        checks: AtomicUsize,
    }

    #[async_trait]
    impl ServiceLifecycle for Doubler {
        type Output = i64;

        fn metadata(&self) -> ServiceMetaData {
            ServiceMetaData::new("doubler")
        }

        fn processing(
            &self,
            ctx: &ProcessorContext,
            service_data: ServiceData,
        ) -> ServiceComputation<ServiceData> {
            ctx.factory().new_completed_computation(service_data)
        }

        async fn is_result_ready(
            &self,
            _ctx: &ProcessorContext,
            _service_data: &ServiceData,
        ) -> ComputationResult<bool> {
            Ok(self.checks.fetch_add(1, Ordering::SeqCst) + 1 >= self.ready_after)
        }

        async fn collect_result(
            &self,
            _ctx: &ProcessorContext,
            service_data: &ServiceData,
        ) -> ComputationResult<i64> {
            let value = service_data
                .parameters
                .get("value")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| ComputationError::processing(service_data, "missing value"))?;
            Ok(value * 2)
        }
    }

    fn test_context(result_retries: u32) -> ProcessorContext {
        let persistence: Arc<dyn ServiceDataPersistence> =
            Arc::new(InMemoryServiceDataPersistence::new());
        let queue = Arc::new(InMemoryServiceQueue::new(
            persistence.clone(),
            &QueueConfig::default(),
        ));
        let engine = Arc::new(JacsServiceEngine::new(
            persistence,
            queue,
            Arc::new(ServiceRegistry::new()),
            2,
        ));
        let factory = ServiceComputationFactory::new(&ComputationConfig {
            main_pool_size: 2,
            suspend_pool_size: 2,
            poll_interval_ms: 1,
            max_poll_interval_ms: 2,
        })
        .unwrap();
        ProcessorContext::new(
            engine,
            factory,
            ServiceConfig {
                result_retries,
                result_retry_interval_ms: 0,
                ..ServiceConfig::default()
            },
        )
    }

    async fn saved(ctx: &ProcessorContext, service_data: ServiceData) -> ServiceData {
        let mut service_data = service_data;
        ctx.persistence()
            .save_hierarchy(&mut service_data)
            .await
            .unwrap();
        service_data
    }

    #[tokio::test]
    async fn test_result_is_stored_once_ready() {
        let ctx = test_context(5);
        let processor = LifeCycleServiceProcessor::new(
            Doubler {
                ready_after: 3,
                checks: AtomicUsize::new(0),
            },
            ctx.clone(),
        );
        let service = saved(
            &ctx,
            ServiceData::new("doubler").with_parameter("value", serde_json::json!(21)),
        )
        .await;

        let done = processor.process(service).await.unwrap();
        assert_eq!(done.state, ServiceState::Successful);
        assert_eq!(done.result, Some(serde_json::json!(42)));
        assert!(done.process_start_time.is_some());
        assert_eq!(processor.lifecycle().checks.load(Ordering::SeqCst), 3);

        let stored = ctx.persistence().get_by_id(done.id.unwrap()).await.unwrap();
        assert_eq!(stored.state, ServiceState::Successful);
        assert_eq!(stored.result, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_result_retries_exhausted_is_timeout() {
        let ctx = test_context(2);
        let processor = LifeCycleServiceProcessor::new(
            Doubler {
                ready_after: 10,
                checks: AtomicUsize::new(0),
            },
            ctx.clone(),
        );
        let service = saved(
            &ctx,
            ServiceData::new("doubler").with_parameter("value", serde_json::json!(1)),
        )
        .await;
        let id = service.id.unwrap();

        let result = processor.process(service).await;
        assert!(matches!(result, Err(ComputationError::Timeout { .. })));
        assert_eq!(
            ctx.persistence().get_by_id(id).await.unwrap().state,
            ServiceState::Timeout
        );
    }

    #[tokio::test]
    async fn test_collect_failure_persists_error() {
        let ctx = test_context(1);
        let processor = LifeCycleServiceProcessor::new(
            Doubler {
                ready_after: 1,
                checks: AtomicUsize::new(0),
            },
            ctx.clone(),
        );
        let service = saved(&ctx, ServiceData::new("doubler")).await;
        let id = service.id.unwrap();

        let result = processor.process(service).await;
        assert!(matches!(result, Err(ComputationError::Processing { .. })));
        assert_eq!(
            ctx.persistence().get_by_id(id).await.unwrap().state,
            ServiceState::Error
        );
    }
}
