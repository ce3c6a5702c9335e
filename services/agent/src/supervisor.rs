//! Panic isolation for worker tasks.
//!
//! A panicking worker must not take the process down; it restarts with the
//! same backoff policy the connection uses.  A worker that returns normally
//! is treated as finished (shutdown path) and is not restarted.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::transport::BackoffPolicy;

pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    backoff: BackoffPolicy,
    mut shutdown: watch::Receiver<bool>,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let run = tokio::spawn(factory());
            match run.await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    let delay = backoff.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    error!(
                        task = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "worker panicked, restarting after backoff"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    warn!(task = name, error = %e, "worker cancelled");
                    break;
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn panicking_worker_is_restarted() {
        let runs = Arc::new(AtomicU32::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let policy = BackoffPolicy {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(10),
            ..Default::default()
        };

        let counter = runs.clone();
        let handle = spawn_supervised("test-worker", policy, shutdown_rx, move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    panic!("boom");
                }
                // Third run completes normally.
            }
        });

        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn clean_exit_is_not_restarted() {
        let runs = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = watch::channel(false);
        let counter = runs.clone();
        let handle = spawn_supervised(
            "clean-worker",
            BackoffPolicy::default(),
            rx,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
