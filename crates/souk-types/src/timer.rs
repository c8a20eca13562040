use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A future that runs once after a delay unless cancelled first.
///
/// Cancelling is O(1) and may be repeated. Dropping the handle does NOT
/// cancel: the fired future is allowed to clean up its own bookkeeping
/// (which usually drops this handle) without aborting itself.
#[derive(Debug)]
pub struct DelayedTask {
    handle: JoinHandle<()>,
}

impl DelayedTask {
    pub fn spawn<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let task = DelayedTask::spawn(Duration::from_secs(2), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_twice_is_harmless() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let task = DelayedTask::spawn(Duration::from_secs(3), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        task.cancel();
        task.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
