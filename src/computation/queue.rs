//! # Service Computation Queue
//!
//! A bounded lane of tokio tasks. Submitted [`ComputationTask`]s are pulled by a
//! dispatcher loop and run once a semaphore permit is free, so at most
//! `concurrency` tasks of one queue execute at any time.
//!
//! A task that returns [`TaskPoll::Pending`] is not done yet: it gives its permit
//! back and is resubmitted after an exponential backoff. This is how waiting on
//! dependencies, external processes and results is realized without holding an
//! execution slot while nothing happens.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jacs_services::computation::{Backoff, ServiceComputationQueue};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let queue = ServiceComputationQueue::start(
//!     "main",
//!     4,
//!     Backoff::new(Duration::from_millis(100), Duration::from_secs(2)),
//!     &tokio::runtime::Handle::current(),
//! );
//! queue.submit_future(async { println!("ran on the main lane") });
//! # });
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Outcome of one run of a [`ComputationTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPoll {
    /// The task produced its result and is dropped
    Complete,
    /// The task must run again later
    Pending,
}

/// Unit of work executed by a [`ServiceComputationQueue`]
pub trait ComputationTask: Send + 'static {
    fn run(&mut self) -> BoxFuture<'_, TaskPoll>;
}

/// Delay between reruns of a pending task, doubling up to `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay before the rerun following `attempt` pending results
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(10_000))
    }
}

/// Runs a future once
struct OnceTask {
    future: Option<BoxFuture<'static, ()>>,
}

impl ComputationTask for OnceTask {
    fn run(&mut self) -> BoxFuture<'_, TaskPoll> {
        let future = self.future.take();
        async move {
            if let Some(future) = future {
                future.await;
            }
            TaskPoll::Complete
        }
        .boxed()
    }
}

struct ScheduledTask {
    task: Box<dyn ComputationTask>,
    attempt: u32,
}

/// Counters reported by [`ServiceComputationQueue::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub rescheduled: u64,
    pub running: usize,
}

#[derive(Default)]
struct QueueCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    rescheduled: AtomicU64,
    running: AtomicUsize,
}

struct QueueInner {
    name: String,
    concurrency: usize,
    sender: mpsc::UnboundedSender<ScheduledTask>,
    counters: Arc<QueueCounters>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }
}

/// Bounded task lane; clones share the same lane
#[derive(Clone)]
pub struct ServiceComputationQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for ServiceComputationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceComputationQueue")
            .field("name", &self.inner.name)
            .field("concurrency", &self.inner.concurrency)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ServiceComputationQueue {
    /// Spawn the dispatcher loop of a new lane on `handle`
    pub fn start(
        name: impl Into<String>,
        concurrency: usize,
        backoff: Backoff,
        handle: &Handle,
    ) -> Self {
        let name = name.into();
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(QueueCounters::default());

        let dispatcher = handle.spawn(dispatch_loop(
            name.clone(),
            receiver,
            sender.downgrade(),
            Arc::new(Semaphore::new(concurrency)),
            counters.clone(),
            backoff,
            handle.clone(),
        ));

        info!(queue = %name, concurrency, "🏊 Started computation queue");

        Self {
            inner: Arc::new(QueueInner {
                name,
                concurrency,
                sender,
                counters,
                dispatcher: Mutex::new(Some(dispatcher)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Enqueue a task; returns false once the lane has been shut down
    pub fn submit(&self, task: Box<dyn ComputationTask>) -> bool {
        let accepted = self
            .inner
            .sender
            .send(ScheduledTask { task, attempt: 0 })
            .is_ok();
        if accepted {
            self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(queue = %self.inner.name, "Computation queue is shut down, task dropped");
        }
        accepted
    }

    /// Run `future` once on this lane
    pub fn submit_future<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(Box::new(OnceTask {
            future: Some(future.boxed()),
        }))
    }

    pub fn stats(&self) -> QueueStats {
        let counters = &self.inner.counters;
        QueueStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            rescheduled: counters.rescheduled.load(Ordering::Relaxed),
            running: counters.running.load(Ordering::Relaxed),
        }
    }

    /// Stop pulling new tasks; tasks already running finish on their own
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
            info!(queue = %self.inner.name, "Computation queue shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.dispatcher.lock().is_none()
    }
}

async fn dispatch_loop(
    name: String,
    mut receiver: mpsc::UnboundedReceiver<ScheduledTask>,
    resubmit: mpsc::WeakUnboundedSender<ScheduledTask>,
    permits: Arc<Semaphore>,
    counters: Arc<QueueCounters>,
    backoff: Backoff,
    handle: Handle,
) {
    while let Some(scheduled) = receiver.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let counters = counters.clone();
        let resubmit = resubmit.clone();
        let name = name.clone();
        let timer = handle.clone();

        handle.spawn(async move {
            let ScheduledTask { mut task, attempt } = scheduled;
            counters.running.fetch_add(1, Ordering::Relaxed);
            let poll = task.run().await;
            counters.running.fetch_sub(1, Ordering::Relaxed);
            drop(permit);

            match poll {
                TaskPoll::Complete => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                TaskPoll::Pending => {
                    counters.rescheduled.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.delay_for(attempt);
                    trace!(queue = %name, attempt, delay_ms = delay.as_millis() as u64, "Task pending, rescheduling");
                    // the wait happens outside the permit
                    timer.spawn(async move {
                        tokio::time::sleep(delay).await;
                        let requeued = resubmit.upgrade().is_some_and(|sender| {
                            sender
                                .send(ScheduledTask {
                                    task,
                                    attempt: attempt.saturating_add(1),
                                })
                                .is_ok()
                        });
                        if !requeued {
                            debug!(queue = %name, "Computation queue closed, pending task dropped");
                        }
                    });
                }
            }
        });
    }
    debug!(queue = %name, "Computation queue dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::oneshot;

    struct CountdownTask {
        remaining: u32,
        runs: Arc<AtomicU32>,
        done: Option<oneshot::Sender<u32>>,
    }

    impl ComputationTask for CountdownTask {
        fn run(&mut self) -> BoxFuture<'_, TaskPoll> {
            async move {
                let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
                if self.remaining == 0 {
                    if let Some(done) = self.done.take() {
                        let _ = done.send(runs);
                    }
                    TaskPoll::Complete
                } else {
                    self.remaining -= 1;
                    TaskPoll::Pending
                }
            }
            .boxed()
        }
    }

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_pending_task_is_rescheduled_until_complete() {
        let queue = ServiceComputationQueue::start("test", 2, fast_backoff(), &Handle::current());
        let runs = Arc::new(AtomicU32::new(0));
        let (tx, rx) = oneshot::channel();
        assert!(queue.submit(Box::new(CountdownTask {
            remaining: 3,
            runs: runs.clone(),
            done: Some(tx),
        })));

        assert_eq!(rx.await.unwrap(), 4);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stats = queue.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.rescheduled, 3);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let queue = ServiceComputationQueue::start("bounded", 2, fast_backoff(), &Handle::current());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut receivers = Vec::new();

        for _ in 0..6 {
            let active = active.clone();
            let peak = peak.clone();
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            queue.submit_future(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
        }
        for rx in receivers {
            rx.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let queue = ServiceComputationQueue::start("closing", 1, fast_backoff(), &Handle::current());
        queue.shutdown();
        assert!(queue.is_shut_down());
        // the receiver is gone once the aborted dispatcher is dropped
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!queue.submit_future(async {}));
    }
}
