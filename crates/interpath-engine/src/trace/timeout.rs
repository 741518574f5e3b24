//! Cancellation and wall-clock limits for trace checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use super::*;

/// Cooperative cancellation flag shared between the caller and a trace
/// check. A child token is cancelled when its parent is.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Absolute deadline `limit` from now. `None` means unlimited.
pub(crate) fn deadline_from_limit(limit: Option<Duration>) -> Option<Instant> {
    limit.and_then(|limit| Instant::now().checked_add(limit))
}

/// Time left until `deadline`, `Duration::ZERO` once it has passed.
pub(crate) fn remaining_time(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

/// Run `task` on a worker thread and wait at most `limit` for it.
///
/// On expiry `token` is cancelled, the worker is left to wind down on its
/// own and its result is discarded.
pub(crate) fn run_with_time_limit<T, F>(
    limit: Duration,
    token: &CancellationToken,
    task: F,
) -> Result<T, RefinementError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("trace-check".into())
        .spawn(move || {
            // The receiver is gone once the caller has given up.
            let _ = tx.send(task());
        })
        .map_err(|e| RefinementError::Worker(e.to_string()))?;

    match rx.recv_timeout(limit) {
        Ok(value) => Ok(value),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            token.cancel();
            warn!(limit_ms = limit.as_millis() as u64, "trace check timed out");
            Err(RefinementError::Timeout { limit })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RefinementError::Worker(
            "trace check worker terminated without a result".into(),
        )),
    }
}
