use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use super::errors::{ComputationError, ComputationResult};
use super::queue::{Backoff, ComputationTask, ServiceComputationQueue, TaskPoll};
use super::service_computation::{ContinuationCond, ServiceComputation};
use crate::config::ComputationConfig;
use crate::error::{JacsError, Result};

/// Creates [`ServiceComputation`]s and owns the two lanes they run on.
///
/// The main queue runs continuations and processing steps. The suspend queue
/// runs checks that poll for something to happen, so waiting services never
/// take execution capacity away from services that can make progress.
#[derive(Debug, Clone)]
pub struct ServiceComputationFactory {
    main: ServiceComputationQueue,
    suspend: ServiceComputationQueue,
    handle: Handle,
}

impl ServiceComputationFactory {
    /// Build the lanes on the current tokio runtime
    pub fn new(config: &ComputationConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            JacsError::Runtime(format!("Computation factory needs a tokio runtime: {e}"))
        })?;
        Ok(Self::with_handle(config, handle))
    }

    pub fn with_handle(config: &ComputationConfig, handle: Handle) -> Self {
        let backoff = Backoff::new(
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_millis(config.max_poll_interval_ms),
        );
        // main lane tasks never report pending
        let main = ServiceComputationQueue::start("main", config.main_pool_size, backoff, &handle);
        let suspend =
            ServiceComputationQueue::start("suspend", config.suspend_pool_size, backoff, &handle);
        Self {
            main,
            suspend,
            handle,
        }
    }

    pub fn main_queue(&self) -> &ServiceComputationQueue {
        &self.main
    }

    pub fn suspend_queue(&self) -> &ServiceComputationQueue {
        &self.suspend
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn new_completed_computation<T: Send + 'static>(&self, value: T) -> ServiceComputation<T> {
        ServiceComputation::resolved(self.clone(), Ok(value))
    }

    pub fn new_failed_computation<T: Send + 'static>(
        &self,
        error: ComputationError,
    ) -> ServiceComputation<T> {
        ServiceComputation::resolved(self.clone(), Err(error))
    }

    /// Run `future` on the main queue
    pub fn new_computation<T, Fut>(&self, future: Fut) -> ServiceComputation<T>
    where
        T: Send + 'static,
        Fut: Future<Output = ComputationResult<T>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let accepted = self.main.submit_future(async move {
            let _ = sender.send(future.await);
        });
        if !accepted {
            return self.new_failed_computation(ComputationError::Abandoned);
        }
        ServiceComputation::waiting(self.clone(), receiver)
    }

    /// Run a synchronous step on the main queue
    pub fn supply<T, F>(&self, supplier: F) -> ServiceComputation<T>
    where
        T: Send + 'static,
        F: FnOnce() -> ComputationResult<T> + Send + 'static,
    {
        self.new_computation(async move { supplier() })
    }

    /// Run `check` on the suspend queue, rescheduling it with backoff until it
    /// returns [`ContinuationCond::Ready`] or fails
    pub fn suspend_until<T, F, Fut>(&self, check: F) -> ServiceComputation<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ComputationResult<ContinuationCond<T>>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let task = SuspendedTask {
            check,
            sender: Some(sender),
        };
        if !self.suspend.submit(Box::new(task)) {
            return self.new_failed_computation(ComputationError::Abandoned);
        }
        ServiceComputation::waiting(self.clone(), receiver)
    }

    /// Stop both lanes
    pub fn shutdown(&self) {
        self.main.shutdown();
        self.suspend.shutdown();
    }
}

struct SuspendedTask<T, F> {
    check: F,
    sender: Option<oneshot::Sender<ComputationResult<T>>>,
}

impl<T, F, Fut> ComputationTask for SuspendedTask<T, F>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ComputationResult<ContinuationCond<T>>> + Send + 'static,
{
    fn run(&mut self) -> BoxFuture<'_, TaskPoll> {
        async move {
            let abandoned = self.sender.as_ref().map_or(true, |sender| sender.is_closed());
            if abandoned {
                debug!("Suspended computation has no listener, dropping it");
                return TaskPoll::Complete;
            }
            let resolution = match (self.check)().await {
                Ok(ContinuationCond::Pending) => return TaskPoll::Pending,
                Ok(ContinuationCond::Ready(value)) => Ok(value),
                Err(error) => Err(error),
            };
            if let Some(sender) = self.sender.take() {
                let _ = sender.send(resolution);
            }
            TaskPoll::Complete
        }
        .boxed()
    }
}
