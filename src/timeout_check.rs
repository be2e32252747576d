//! A liveness watchdog: one per (check, metric).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::time::{Timedelta, Timestamp};

struct State {
    last_timestamp: Mutex<Option<Timestamp>>,
    throttled: AtomicBool,
    bumped: Notify,
}

/// Fires a callback if a metric stays silent for longer than
/// `timeout + grace_period`.
///
/// After a missed deadline the watchdog throttles: it waits a full interval
/// before it can fire again, so a metric that never resumes does not
/// retrigger in a tight loop.
pub struct TimeoutCheck {
    state: Arc<State>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    timeout: Timedelta,
    grace_period: Timedelta,
}

impl TimeoutCheck {
    pub fn new(timeout: Timedelta, grace_period: Timedelta) -> Self {
        TimeoutCheck {
            state: Arc::new(State {
                last_timestamp: Mutex::new(None),
                throttled: AtomicBool::new(false),
                bumped: Notify::new(),
            }),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
            timeout,
            grace_period,
        }
    }

    /// Start the watchdog loop, invoking `on_timeout` whenever the deadline
    /// is missed. `on_timeout` must not block.
    pub fn start<F>(&self, metric: String, on_timeout: F)
    where
        F: Fn(Timedelta, Option<Timestamp>) + Send + Sync + 'static,
    {
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let timeout = self.timeout;
        let grace_period = self.grace_period;

        let handle = tokio::spawn(async move {
            loop {
                let last = *state.last_timestamp.lock();
                let throttled = state.throttled.load(Ordering::Acquire);

                let wait = if last.is_none() || throttled {
                    (timeout + grace_period).as_std()
                } else {
                    let deadline = last.unwrap() + timeout + grace_period;
                    let now = Timestamp::now();
                    if now >= deadline {
                        Timedelta::ZERO.as_std()
                    } else {
                        (deadline - now).as_std()
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(metric = %metric, "timeout check cancelled");
                        return;
                    }
                    _ = state.bumped.notified() => {
                        state.throttled.store(false, Ordering::Release);
                        continue;
                    }
                    _ = tokio::time::sleep(wait) => {
                        let last_timestamp = *state.last_timestamp.lock();
                        warn!(
                            metric = %metric,
                            timeout = %timeout,
                            last_timestamp = ?last_timestamp,
                            "metric timed out"
                        );
                        state.throttled.store(true, Ordering::Release);
                        on_timeout(timeout, last_timestamp);
                    }
                }
            }
        });
        *self.handle.lock() = Some(handle);
    }

    /// Record a new observed timestamp, clearing the throttle and waking the
    /// scheduler loop.
    pub fn bump(&self, timestamp: Timestamp) {
        *self.state.last_timestamp.lock() = Some(timestamp);
        self.state.throttled.store(false, Ordering::Release);
        self.state.bumped.notify_one();
    }

    /// Cancel the watchdog task. Idempotent: cancelling a never-started
    /// check is a no-op.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and await completion, up to `grace`. Returns `false` if the
    /// task did not stop in time.
    pub async fn stop(&self, grace: Timedelta) -> bool {
        self.cancel();
        let handle = self.handle.lock().take();
        match handle {
            None => true,
            Some(h) => tokio::time::timeout(grace.as_std(), h).await.is_ok(),
        }
    }
}
