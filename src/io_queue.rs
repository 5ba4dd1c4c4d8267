// Bounded-concurrency async I/O dispatcher (spec.md §4.1).
//
// Every disk operation in `storage::disk::StorageManager` is submitted here.
// The queue guarantees at most `MAX_IN_FLIGHT` tasks run concurrently, tasks
// are admitted in submission order, and one task's failure never poisons the
// queue for the others.

use crate::error::{DbError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};

/// Maximum number of tasks the queue will run concurrently.
pub const MAX_IN_FLIGHT: usize = 16;

#[derive(Clone)]
pub struct IoQueue {
    semaphore: Arc<Semaphore>,
    started_tx: watch::Sender<bool>,
    started_rx: watch::Receiver<bool>,
}

impl IoQueue {
    pub fn new() -> Self {
        let (started_tx, started_rx) = watch::channel(false);
        Self {
            semaphore: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
            started_tx,
            started_rx,
        }
    }

    /// Mark the queue ready. Tasks enqueued before this call remain pending
    /// until it runs.
    pub fn start(&self) {
        // Ignore the error: it only means every receiver has been dropped,
        // i.e. nothing is waiting to be unblocked.
        let _ = self.started_tx.send(true);
    }

    /// Register a task and wait for its result. The returned future resolves
    /// once the task has actually run; until `start()` is called, awaiting it
    /// blocks without consuming one of the 16 in-flight slots.
    pub async fn enqueue<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut started_rx = self.started_rx.clone();
        if !*started_rx.borrow() {
            // Ignore the error: a closed sender means `start` already ran
            // and was observed, or the queue was dropped; either way proceed.
            let _ = started_rx.changed().await;
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("IoQueue semaphore is never closed");

        let join = tokio::spawn(async move {
            let result = task().await;
            drop(permit);
            result
        });

        match join.await {
            Ok(result) => result,
            Err(join_err) => Err(DbError::Storage(format!(
                "io task panicked: {join_err}"
            ))),
        }
    }
}

impl Default for IoQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn pending_before_start_runs_after_start() {
        let queue = IoQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();

        let handle = tokio::spawn({
            let queue = queue.clone();
            async move {
                queue
                    .enqueue(move || async move {
                        ran2.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }
        });

        tokio::task::yield_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0, "task must not run before start()");

        queue.start();
        handle.await.unwrap().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_ceiling() {
        let queue = IoQueue::new();
        queue.start();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let queue = queue.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(move || async move {
                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, DbError>(())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= MAX_IN_FLIGHT);
    }

    #[tokio::test]
    async fn one_task_error_does_not_poison_the_queue() {
        let queue = IoQueue::new();
        queue.start();

        let failing = queue
            .enqueue(|| async { Err::<(), _>(DbError::Storage("boom".into())) })
            .await;
        assert!(failing.is_err());

        let ok = queue.enqueue(|| async { Ok::<_, DbError>(42) }).await;
        assert_eq!(ok.unwrap(), 42);
    }
}
