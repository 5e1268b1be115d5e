//! Crash recovery for long-running loops.
//!
//! Each attempt runs in its own task, so both returned errors and panics are
//! observed. [`supervise_forever`] restarts without limit;
//! [`supervise_bounded`] gives up after repeated failures.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::failure_tracker::FailureTracker;
use crate::error::error_chain;
use crate::panic_hook::payload_text;
use crate::{Error, Result};

/// Limits for [`supervise_bounded`].
#[derive(Debug, Clone, Copy)]
pub struct BoundedPolicy {
    pub max_failures: usize,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

/// Heartbeat a supervised loop bumps after each unit of useful work.
///
/// An attempt that marked progress before failing resets the failure count
/// in [`supervise_bounded`].
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU64>);

impl Progress {
    pub fn mark(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

enum Attempt {
    Cancelled,
    Finished,
    Failed(String),
}

async fn run_attempt<Fut>(name: &str, cancel: &CancellationToken, fut: Fut) -> Attempt
where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    let joined = tokio::select! {
        _ = cancel.cancelled() => {
            handle.abort();
            return Attempt::Cancelled;
        }
        joined = &mut handle => joined,
    };

    match joined {
        Ok(Ok(())) if cancel.is_cancelled() => Attempt::Cancelled,
        Ok(Ok(())) => Attempt::Finished,
        Ok(Err(e)) => {
            let chain = error_chain(&e);
            error!(task = name, error = %chain, "Supervised task failed");
            Attempt::Failed(e.to_string())
        }
        Err(join_error) => {
            let reason = describe_join_error(join_error);
            error!(task = name, error = %reason, "Supervised task aborted");
            Attempt::Failed(reason)
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        let text = payload_text(payload.as_ref()).unwrap_or_else(|| "<non-string payload>".into());
        format!("panicked: {text}")
    } else {
        err.to_string()
    }
}

/// Sleep for `cooldown`; returns `false` if cancelled first.
async fn cool_down(cancel: &CancellationToken, cooldown: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(cooldown) => true,
    }
}

/// Run the loop built by `factory`, recreating it after `cooldown` whenever
/// it fails, panics or returns. Only cancellation ends supervision.
///
/// Returns the number of restarts performed.
pub async fn supervise_forever<F, Fut>(
    name: &str,
    cooldown: Duration,
    cancel: CancellationToken,
    mut factory: F,
) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut restarts = 0u64;
    loop {
        match run_attempt(name, &cancel, factory()).await {
            Attempt::Cancelled => break,
            Attempt::Finished => warn!(task = name, "Supervised task returned unexpectedly"),
            Attempt::Failed(_) => {}
        }

        if !cool_down(&cancel, cooldown).await {
            break;
        }
        restarts += 1;
        info!(task = name, restarts, "Restarting supervised task");
    }

    info!(task = name, restarts, "Supervision stopped");
    restarts
}

/// Like [`supervise_forever`], but once `policy.max_failures` consecutive
/// failures land inside `policy.failure_window`, `on_give_up` is awaited with
/// the last error message and supervision ends with an error.
///
/// `factory` receives a [`Progress`] handle. A failure after the attempt
/// marked progress starts a new streak. A clean return ends supervision
/// successfully.
pub async fn supervise_bounded<F, Fut, G, GFut>(
    name: &str,
    policy: BoundedPolicy,
    cancel: CancellationToken,
    mut factory: F,
    on_give_up: G,
) -> Result<()>
where
    F: FnMut(Progress) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
    G: FnOnce(String) -> GFut,
    GFut: Future<Output = ()>,
{
    let mut tracker = FailureTracker::new(policy.max_failures, policy.failure_window);
    let progress = Progress::default();
    loop {
        let before = progress.count();
        let reason = match run_attempt(name, &cancel, factory(progress.clone())).await {
            Attempt::Cancelled | Attempt::Finished => return Ok(()),
            Attempt::Failed(reason) => reason,
        };

        if progress.count() != before {
            tracker.clear();
        }
        let failures = tracker.record_failure(tokio::time::Instant::now());
        if tracker.is_exhausted() {
            error!(
                task = name,
                failures,
                error = %reason,
                "Supervised task keeps failing, giving up"
            );
            on_give_up(reason.clone()).await;
            return Err(Error::Other(format!(
                "{name} stopped after {failures} consecutive failures: {reason}"
            )));
        }

        warn!(
            task = name,
            failures,
            limit = tracker.limit(),
            "Supervised task failed, retrying"
        );
        if !cool_down(&cancel, policy.cooldown).await {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    fn failing_factory(
        calls: &Arc<AtomicU32>,
    ) -> impl FnMut() -> futures::future::BoxFuture<'static, Result<()>> + use<> {
        let calls = Arc::clone(calls);
        move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Other(format!("boom #{n}")))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_loop_keeps_restarting() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise_forever(
            "test",
            Duration::from_secs(5),
            cancel.clone(),
            failing_factory(&calls),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A fresh attempt starts within each cooldown window.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 12);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panics_are_restarted() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let handle = tokio::spawn(supervise_forever(
            "test",
            Duration::from_secs(5),
            cancel.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        panic!("loop exploded");
                    }
                    std::future::pending::<Result<()>>().await
                }
            },
        ));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_return_is_restarted() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let handle = tokio::spawn(supervise_forever(
            "test",
            Duration::from_secs(1),
            cancel.clone(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), Error>(()) }
            },
        ));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_gives_up_after_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);

        let result = supervise_bounded(
            "tweets",
            BoundedPolicy {
                max_failures: 3,
                failure_window: Duration::from_secs(600),
                cooldown: Duration::from_secs(5),
            },
            CancellationToken::new(),
            {
                let mut attempt = failing_factory(&calls);
                move |_: Progress| attempt()
            },
            move |reason| async move {
                sink.lock().push(reason);
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("3 consecutive failures"));
        assert_eq!(*notices.lock(), vec!["boom #2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_forgets_old_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let gave_up = Arc::new(AtomicU32::new(0));
        let flag = Arc::clone(&gave_up);

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            let mut attempt = failing_factory(&calls);
            let factory = move |_: Progress| attempt();
            async move {
                supervise_bounded(
                    "tweets",
                    BoundedPolicy {
                        max_failures: 3,
                        failure_window: Duration::from_secs(10),
                        cooldown: Duration::from_secs(30),
                    },
                    cancel,
                    factory,
                    move |_| async move {
                        flag.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .await
            }
        });

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(calls.load(Ordering::SeqCst) > 3);
        assert_eq!(gave_up.load(Ordering::SeqCst), 0);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_progress_resets_failure_streak() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let gave_up = Arc::new(AtomicU32::new(0));
        let flag = Arc::clone(&gave_up);

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            let calls = Arc::clone(&calls);
            async move {
                supervise_bounded(
                    "tweets",
                    BoundedPolicy {
                        max_failures: 3,
                        failure_window: Duration::from_secs(3600),
                        cooldown: Duration::from_secs(5),
                    },
                    cancel,
                    move |progress: Progress| {
                        let calls = Arc::clone(&calls);
                        async move {
                            let n = calls.fetch_add(1, Ordering::SeqCst);
                            // Every attempt does some work, then fails.
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            progress.mark();
                            Err::<(), _>(Error::Other(format!("boom #{n}")))
                        }
                    },
                    move |_| async move {
                        flag.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .await
            }
        });

        // Ten failures fall inside the window, none of them back to back.
        tokio::time::sleep(Duration::from_secs(700)).await;
        assert!(calls.load(Ordering::SeqCst) >= 10);
        assert_eq!(gave_up.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_counts_failures_after_last_progress() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);

        let result = supervise_bounded(
            "tweets",
            BoundedPolicy {
                max_failures: 3,
                failure_window: Duration::from_secs(3600),
                cooldown: Duration::from_secs(5),
            },
            CancellationToken::new(),
            move |progress: Progress| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    // Attempts 0..=3 make progress. The failure of attempt 3
                    // opens the streak that 4 and 5 complete.
                    if n < 4 {
                        progress.mark();
                    }
                    Err::<(), _>(Error::Other(format!("boom #{n}")))
                }
            },
            move |reason| async move {
                sink.lock().push(reason);
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(*notices.lock(), vec!["boom #5".to_string()]);
    }
}
