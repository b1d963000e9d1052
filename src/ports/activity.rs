//! Activity log sink port.
//!
//! Activity logging is best-effort: [`record_best_effort`] swallows sink
//! failures after logging them locally, so a broken log never changes what
//! happens to the session.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PortError;
use crate::session::model::ViolationEvent;

/// Something worth recording about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// The candidate joined or resumed
    Joined {
        /// Session id
        session_id: String,
        /// Whether an existing snapshot was restored
        resumed: bool,
        /// When
        at: DateTime<Utc>,
    },
    /// A phase became active
    PhaseEntered {
        /// Session id
        session_id: String,
        /// Phase index
        phase_index: usize,
        /// When
        at: DateTime<Utc>,
    },
    /// A violation was counted
    Violation(ViolationEvent),
    /// The session reached its terminal state
    Completed {
        /// Session id
        session_id: String,
        /// Forced by a violation
        disqualified: bool,
        /// When
        at: DateTime<Utc>,
    },
}

/// Append-only activity log.
#[async_trait]
pub trait ActivityLogSink: Send + Sync + std::fmt::Debug {
    /// Appends one event.
    async fn append(&self, event: &ActivityEvent) -> Result<(), PortError>;
}

/// Appends `event`, logging and discarding any failure.
pub async fn record_best_effort(sink: &dyn ActivityLogSink, event: &ActivityEvent) {
    if let Err(e) = sink.append(event).await {
        warn!(error = %e, ?event, "activity log append failed; continuing");
        crate::observability::metrics::record_activity_log_failure();
    }
}

/// Fire-and-forget variant of [`record_best_effort`].
pub fn spawn_record(sink: Arc<dyn ActivityLogSink>, event: ActivityEvent) {
    tokio::spawn(async move {
        record_best_effort(sink.as_ref(), &event).await;
    });
}

/// Sink that writes events as structured `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivityLog;

#[async_trait]
impl ActivityLogSink for TracingActivityLog {
    async fn append(&self, event: &ActivityEvent) -> Result<(), PortError> {
        let json = serde_json::to_string(event)?;
        info!(target: "examwarden::activity", event = %json, "activity");
        Ok(())
    }
}

/// Sink that keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    events: Mutex<Vec<ActivityEvent>>,
}

impl MemoryActivityLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far.
    #[must_use]
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Only the violation events.
    #[must_use]
    pub fn violations(&self) -> Vec<ViolationEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ActivityEvent::Violation(v) => Some(v),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ActivityLogSink for MemoryActivityLog {
    async fn append(&self, event: &ActivityEvent) -> Result<(), PortError> {
        self.events
            .lock()
            .map_err(|_| PortError::Transient("activity log lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}
