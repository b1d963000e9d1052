//! Periodic liveness signal for external monitoring.
//!
//! Heartbeats are low priority: a failed touch is logged and the next
//! interval tries again. The loop ends by itself once the registry reports
//! the session is no longer in progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{ExamError, PortError, Result};
use crate::grading::retry::port_error;
use crate::observability::metrics;
use crate::ports::SessionRegistry;

/// Sends heartbeats for a session.
#[derive(Debug, Clone)]
pub struct LivenessReporter {
    registry: Arc<dyn SessionRegistry>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl LivenessReporter {
    /// Creates a reporter that beats every `interval`.
    #[must_use]
    pub fn new(registry: Arc<dyn SessionRegistry>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            registry,
            clock,
            interval,
        }
    }

    /// Sends one heartbeat. Returns `false`, having written nothing, when
    /// the session is not in progress.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `TransientIo` if the registry is
    /// unavailable.
    pub async fn heartbeat(&self, session_id: &str) -> Result<bool> {
        match self.registry.touch(session_id, self.clock.now()).await {
            Ok(recorded) => {
                if recorded {
                    metrics::record_heartbeat();
                }
                Ok(recorded)
            }
            Err(PortError::NotFound(_)) => Err(ExamError::session_not_found(session_id)),
            Err(e) => Err(port_error("touch", e)),
        }
    }

    /// Beats every interval until the session leaves `in_progress` or
    /// `cancel` fires.
    pub fn spawn(&self, session_id: String, cancel: CancellationToken) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(reporter.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(%session_id, "liveness reporter cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        match reporter.heartbeat(&session_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                debug!(%session_id, "session no longer in progress; liveness reporter stopping");
                                break;
                            }
                            Err(e) => warn!(%session_id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
        })
    }
}
