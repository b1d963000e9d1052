//! Per-phase countdown.
//!
//! A [`CountdownTimer`] runs as one spawned task. It calls `on_tick` after
//! every decrement and `on_expire` exactly once when the count reaches zero,
//! then stops. Cancelling (explicitly or by dropping the timer) stops it
//! before the next tick.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Handle to a running countdown.
#[derive(Debug)]
pub struct CountdownTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CountdownTimer {
    /// Starts counting down from `duration_seconds`, one second per
    /// `tick_interval`.
    ///
    /// A zero-length countdown expires on its first tick.
    #[must_use]
    pub fn start<T, E>(
        duration_seconds: u64,
        tick_interval: Duration,
        mut on_tick: T,
        on_expire: E,
    ) -> Self
    where
        T: FnMut(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + tick_interval, tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut remaining = duration_seconds;

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        trace!(remaining, "countdown cancelled");
                        return;
                    }
                    _ = interval.tick() => {
                        remaining = remaining.saturating_sub(1);
                        on_tick(remaining);
                        if remaining == 0 {
                            break;
                        }
                    }
                }
            }

            token.cancel();
            on_expire();
        });

        Self { cancel, handle }
    }

    /// Stops the countdown. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the countdown has been cancelled or has expired.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the countdown task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
