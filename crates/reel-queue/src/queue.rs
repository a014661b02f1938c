//! FIFO work queue with a concurrency bound.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{QueueError, QueueResult};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
}

/// Decrements the running counter when a task ends, however it ends.
struct RunningGuard(Arc<Counters>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Work queue driving tasks with at most `max_concurrent` running.
///
/// A dispatcher task takes a concurrency permit, then the oldest queued task,
/// and spawns it holding the permit. The permit is released when the task
/// completes or panics. Task results are never inspected.
pub struct WorkQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    max_concurrent: usize,
}

impl WorkQueue {
    /// Create a queue and start its dispatcher. Must be called inside a
    /// tokio runtime.
    pub fn new(max_concurrent: usize) -> QueueResult<Self> {
        if max_concurrent == 0 {
            return Err(QueueError::InvalidLimit(max_concurrent));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let dispatcher = tokio::spawn(dispatch(receiver, Arc::clone(&counters), max_concurrent));

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            counters,
            max_concurrent,
        })
    }

    /// Append a task to the back of the queue.
    pub fn enqueue<F>(&self, task: F) -> QueueResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.sender.lock().map_err(|_| QueueError::Closed)?;
        let sender = guard.as_ref().ok_or(QueueError::Closed)?;

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send(Box::pin(task)).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Number of tasks waiting for a permit.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Number of tasks currently running.
    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stop admitting tasks. Already queued tasks still run.
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|s| s.is_none()).unwrap_or(true)
    }

    /// Close the queue and wait until every admitted task has finished.
    pub async fn drain(&self) {
        self.close();
        let handle = self.dispatcher.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Queue dispatcher stopped abnormally: {}", e);
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.close();
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Task>,
    counters: Arc<Counters>,
    max_concurrent: usize,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));
    debug!(max_concurrent, "Queue dispatcher started");

    loop {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let Some(task) = receiver.recv().await else {
            break;
        };

        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.running.fetch_add(1, Ordering::SeqCst);
        let guard = RunningGuard(Arc::clone(&counters));

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                error!("Queued task panicked");
            }
        });
    }

    // Every running task holds a permit; getting all of them back means
    // the last one finished.
    if let Ok(max) = u32::try_from(max_concurrent) {
        let _ = permits.acquire_many(max).await;
    }
    info!("Queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        assert_eq!(WorkQueue::new(0).err(), Some(QueueError::InvalidLimit(0)));
    }

    #[tokio::test]
    async fn test_never_exceeds_limit_and_runs_each_once() {
        let queue = WorkQueue::new(3).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(Mutex::new(vec![0u32; 20]));

        for i in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let runs = Arc::clone(&runs);
            queue
                .enqueue(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    runs.lock().unwrap()[i] += 1;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.drain().await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(runs.lock().unwrap().iter().all(|&n| n == 1));
        assert_eq!(queue.running(), 0);
        assert_eq!(queue.queued(), 0);
    }

    #[tokio::test]
    async fn test_fifo_with_single_slot() {
        let queue = WorkQueue::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            queue
                .enqueue(async move {
                    tokio::task::yield_now().await;
                    order.lock().unwrap().push(i);
                })
                .unwrap();
        }
        queue.drain().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_later_tasks() {
        let queue = WorkQueue::new(1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        queue.enqueue(async { panic!("boom") }).unwrap();
        for _ in 0..3 {
            let done = Arc::clone(&done);
            queue
                .enqueue(async move {
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.drain().await;

        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(queue.running(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_close() {
        let queue = WorkQueue::new(2).unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(async {}), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_drain_waits_for_running_tasks() {
        let queue = WorkQueue::new(2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            queue
                .enqueue(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }
}
