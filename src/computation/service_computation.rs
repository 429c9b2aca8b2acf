//! # Service Computation
//!
//! An eagerly scheduled, single-resolution future carrying either a value or a
//! [`ComputationError`].
//!
//! ## Architecture
//!
//! Every computation is backed by a oneshot channel whose sender is owned by the
//! work producing it, so a computation resolves at most once. Continuations
//! attached with the `then_*`, `when_complete` and `exceptionally` combinators
//! wait for the upstream result in a detached tokio task and then run their
//! closure on the factory's main queue. Nested computations returned by
//! `then_compose` are awaited outside the main queue, so a continuation never
//! holds an execution permit while it waits.
//!
//! Polling work (dependency waits, process completion, result retrieval) is
//! expressed with [`ServiceComputation::then_suspend_until`], which runs the
//! check on the suspend queue and reschedules it while it reports
//! [`ContinuationCond::Pending`].

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::errors::{ComputationError, ComputationResult};
use super::factory::ServiceComputationFactory;

/// Result of one check of a suspended computation
#[derive(Debug, Clone, PartialEq)]
pub enum ContinuationCond<T> {
    Ready(T),
    Pending,
}

impl<T> ContinuationCond<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

enum Outcome<T> {
    Resolved(Option<ComputationResult<T>>),
    Waiting(oneshot::Receiver<ComputationResult<T>>),
}

/// What a continuation produced: a final result or another computation to wait on
enum Step<U> {
    Done(ComputationResult<U>),
    Compose(ServiceComputation<U>),
}

/// Asynchronous outcome of one scheduled unit of service work
#[must_use = "a computation does nothing observable unless it is awaited or chained"]
pub struct ServiceComputation<T> {
    factory: ServiceComputationFactory,
    outcome: Outcome<T>,
}

// values are moved out of the outcome, never pinned in place
impl<T> Unpin for ServiceComputation<T> {}

impl<T> std::fmt::Debug for ServiceComputation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.outcome {
            Outcome::Resolved(Some(Ok(_))) => "completed",
            Outcome::Resolved(Some(Err(_))) => "failed",
            Outcome::Resolved(None) => "consumed",
            Outcome::Waiting(_) => "pending",
        };
        f.debug_struct("ServiceComputation")
            .field("state", &state)
            .finish()
    }
}

impl<T: Send + 'static> ServiceComputation<T> {
    pub(crate) fn resolved(factory: ServiceComputationFactory, result: ComputationResult<T>) -> Self {
        Self {
            factory,
            outcome: Outcome::Resolved(Some(result)),
        }
    }

    pub(crate) fn waiting(
        factory: ServiceComputationFactory,
        receiver: oneshot::Receiver<ComputationResult<T>>,
    ) -> Self {
        Self {
            factory,
            outcome: Outcome::Waiting(receiver),
        }
    }

    pub fn factory(&self) -> &ServiceComputationFactory {
        &self.factory
    }

    /// Whether the computation already holds its result
    pub fn is_done(&self) -> bool {
        matches!(self.outcome, Outcome::Resolved(Some(_)))
    }

    /// Wait for the result
    pub async fn get(self) -> ComputationResult<T> {
        self.await
    }

    fn chain<U, F>(self, continuation: F) -> ServiceComputation<U>
    where
        U: Send + 'static,
        F: FnOnce(ComputationResult<T>) -> Step<U> + Send + 'static,
    {
        let factory = self.factory.clone();
        let main = factory.main_queue().clone();
        let (sender, receiver) = oneshot::channel();

        factory.handle().spawn(async move {
            let upstream = self.await;
            let (step_sender, step_receiver) = oneshot::channel();
            main.submit_future(async move {
                let _ = step_sender.send(continuation(upstream));
            });
            let result = match step_receiver.await {
                Ok(Step::Done(result)) => result,
                Ok(Step::Compose(inner)) => inner.await,
                Err(_) => Err(ComputationError::Abandoned),
            };
            let _ = sender.send(result);
        });

        ServiceComputation::waiting(factory, receiver)
    }

    /// Transform a successful value
    pub fn then_apply<U, F>(self, f: F) -> ServiceComputation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.chain(move |result| Step::Done(result.map(f)))
    }

    /// Transform a successful value with a step that may itself fail
    pub fn then_try_apply<U, F>(self, f: F) -> ServiceComputation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ComputationResult<U> + Send + 'static,
    {
        self.chain(move |result| Step::Done(result.and_then(f)))
    }

    /// Continue with the computation returned by `f`
    pub fn then_compose<U, F>(self, f: F) -> ServiceComputation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ServiceComputation<U> + Send + 'static,
    {
        self.chain(move |result| match result {
            Ok(value) => Step::Compose(f(value)),
            Err(error) => Step::Done(Err(error)),
        })
    }

    /// Continue with an async step run on the main queue
    pub fn then_apply_async<U, F, Fut>(self, f: F) -> ServiceComputation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ComputationResult<U>> + Send + 'static,
    {
        let factory = self.factory.clone();
        self.then_compose(move |value| factory.new_computation(f(value)))
    }

    /// Poll `check` on the suspend queue until it reports ready or fails
    pub fn then_suspend_until<U, F, Fut>(self, check: F) -> ServiceComputation<U>
    where
        T: Clone,
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ComputationResult<ContinuationCond<U>>> + Send + 'static,
    {
        let factory = self.factory.clone();
        self.then_compose(move |value| {
            let mut check = check;
            factory.suspend_until(move || check(value.clone()))
        })
    }

    /// Observe the outcome without changing it; `f` runs exactly once
    pub fn when_complete<F>(self, f: F) -> ServiceComputation<T>
    where
        F: FnOnce(&ComputationResult<T>) + Send + 'static,
    {
        self.chain(move |result| {
            f(&result);
            Step::Done(result)
        })
    }

    /// Turn a failure into a value
    pub fn exceptionally<F>(self, f: F) -> ServiceComputation<T>
    where
        F: FnOnce(ComputationError) -> T + Send + 'static,
    {
        self.chain(move |result| Step::Done(Ok(result.unwrap_or_else(f))))
    }

    /// Replace a failure with the outcome of another computation
    pub fn recover_with<F>(self, f: F) -> ServiceComputation<T>
    where
        F: FnOnce(ComputationError) -> ServiceComputation<T> + Send + 'static,
    {
        self.chain(move |result| match result {
            Ok(value) => Step::Done(Ok(value)),
            Err(error) => Step::Compose(f(error)),
        })
    }

    /// Type-erased form, used where computations of several stages are stored
    pub fn boxed(self) -> BoxFuture<'static, ComputationResult<T>> {
        FutureExt::boxed(self)
    }
}

impl<T> Future for ServiceComputation<T> {
    type Output = ComputationResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().outcome {
            Outcome::Resolved(result) => {
                Poll::Ready(result.take().unwrap_or(Err(ComputationError::Abandoned)))
            }
            Outcome::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(ComputationError::Abandoned))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComputationConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_factory() -> ServiceComputationFactory {
        let config = ComputationConfig {
            main_pool_size: 4,
            suspend_pool_size: 2,
            poll_interval_ms: 1,
            max_poll_interval_ms: 5,
        };
        ServiceComputationFactory::new(&config).unwrap()
    }

    fn processing_error(reason: &str) -> ComputationError {
        ComputationError::Processing {
            service: "test".into(),
            reason: reason.into(),
        }
    }

    #[tokio::test]
    async fn test_completed_and_failed_computations() {
        let factory = test_factory();
        let done = factory.new_completed_computation(7);
        assert!(done.is_done());
        assert_eq!(done.await, Ok(7));

        let failed: ServiceComputation<i32> =
            factory.new_failed_computation(processing_error("boom"));
        assert_eq!(failed.await, Err(processing_error("boom")));
    }

    #[tokio::test]
    async fn test_chaining_applies_in_order() {
        let factory = test_factory();
        let result = factory
            .new_completed_computation(2)
            .then_apply(|v| v * 10)
            .then_compose({
                let factory = factory.clone();
                move |v| factory.new_computation(async move { Ok(v + 1) })
            })
            .then_apply_async(|v| async move { Ok(format!("value={v}")) })
            .await;
        assert_eq!(result, Ok("value=21".to_string()));
    }

    #[tokio::test]
    async fn test_failure_skips_apply_and_reaches_exceptionally() {
        let factory = test_factory();
        let applied = Arc::new(AtomicUsize::new(0));
        let counter = applied.clone();
        let result = factory
            .new_failed_computation::<i32>(processing_error("bad input"))
            .then_apply(move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                v + 1
            })
            .exceptionally(|error| match error {
                ComputationError::Processing { .. } => -1,
                _ => -2,
            })
            .await;
        assert_eq!(result, Ok(-1));
        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_when_complete_runs_exactly_once() {
        let factory = test_factory();
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let (s, f) = (successes.clone(), failures.clone());

        let result = factory
            .new_computation(async { Err::<(), _>(processing_error("late")) })
            .when_complete(move |result| {
                if result.is_ok() {
                    s.fetch_add(1, Ordering::SeqCst);
                } else {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recover_with_replaces_failure() {
        let factory = test_factory();
        let recovery = factory.clone();
        let result = factory
            .new_failed_computation::<&str>(ComputationError::RegistryMiss("x".into()))
            .recover_with(move |_| recovery.new_completed_computation("fallback"))
            .await;
        assert_eq!(result, Ok("fallback"));
    }

    #[tokio::test]
    async fn test_suspend_until_polls_until_ready() {
        let factory = test_factory();
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        let result = factory
            .new_completed_computation(3usize)
            .then_suspend_until(move |target| {
                let checks = counter.clone();
                async move {
                    let seen = checks.fetch_add(1, Ordering::SeqCst) + 1;
                    if seen >= target {
                        Ok(ContinuationCond::Ready(seen))
                    } else {
                        Ok(ContinuationCond::Pending)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert!(factory.suspend_queue().stats().rescheduled >= 2);
    }

    #[tokio::test]
    async fn test_dropped_producer_resolves_abandoned() {
        let factory = test_factory();
        let (sender, receiver) = oneshot::channel::<ComputationResult<u8>>();
        drop(sender);
        let computation = ServiceComputation::waiting(factory, receiver);
        assert_eq!(computation.await, Err(ComputationError::Abandoned));
    }
}
