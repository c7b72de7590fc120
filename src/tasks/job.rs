//! Detached background work with an optional completion handle. Service
//! operations commit their durable status transition first and then spawn the
//! pipeline as a [`Job`]; production callers `detach()`, tests `join().await`
//! to observe the outcome deterministically.

use std::future::Future;

use tokio::sync::oneshot;

pub struct Job<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T: Send + 'static> Job<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            // The receiver may have been detached; a send failure is fine.
            let _ = sender.send(future.await);
        });

        Self { receiver }
    }

    /// Waits for the pipeline to finish. `None` means the task panicked
    /// before sending its outcome.
    pub async fn join(self) -> Option<T> {
        self.receiver.await.ok()
    }

    /// Lets the pipeline run unobserved. There is no durable queue behind
    /// this: a crash mid-pipeline strands the owning entity in its in-flight
    /// status until the user re-triggers the operation.
    pub fn detach(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_returns_the_pipeline_outcome() {
        let job = Job::spawn(async { 21 * 2 });
        assert_eq!(job.join().await, Some(42));
    }

    #[tokio::test]
    async fn detached_jobs_still_run_to_completion() {
        let (tx, rx) = oneshot::channel();
        Job::spawn(async move {
            let _ = tx.send("done");
        })
        .detach();

        assert_eq!(rx.await.unwrap(), "done");
    }
}
