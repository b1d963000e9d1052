//! Violation policy state machine.
//!
//! ```text
//!            trigger (log)             acknowledge
//!   Armed ──────────────────▶ Pending ─────────────▶ Armed
//!     │                         │ trigger: collapsed, not counted
//!     │ trigger (disqualify, or log at escalate_after)
//!     ▼
//!   Disqualified (final)
//! ```
//!
//! The monitor decides; the runtime applies the decision to the store, the
//! registry and the activity log.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::assessment::ViolationPolicy;
use crate::session::model::ViolationKind;

/// Monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Waiting for the next trigger
    Armed,
    /// A warning is showing and has not been acknowledged
    ViolationPending,
    /// The session was terminated
    Disqualified,
}

/// One detected environment loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// What was detected
    pub kind: ViolationKind,
    /// Host-supplied detail
    pub detail: Option<String>,
    /// When it was detected
    pub at: DateTime<Utc>,
}

/// What should happen in response to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Counted; warn the candidate
    Warn {
        /// New violation count
        count: u32,
    },
    /// Counted; terminate the session
    Disqualify {
        /// New violation count
        count: u32,
    },
    /// A warning is already pending; not counted
    Collapsed,
    /// The session is already disqualified
    Ignored,
}

/// Applies one session's violation policy.
#[derive(Debug)]
pub struct IntegrityMonitor {
    policy: ViolationPolicy,
    escalate_after: Option<u32>,
    state: MonitorState,
}

impl IntegrityMonitor {
    /// Creates an armed monitor.
    #[must_use]
    pub const fn new(policy: ViolationPolicy, escalate_after: Option<u32>) -> Self {
        Self {
            policy,
            escalate_after,
            state: MonitorState::Armed,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> MonitorState {
        self.state
    }

    /// Policy being enforced.
    #[must_use]
    pub const fn policy(&self) -> ViolationPolicy {
        self.policy
    }

    /// Decides what `detection` means given the current count.
    pub fn observe(&mut self, detection: &Detection, current_count: u32) -> Verdict {
        if self.state == MonitorState::Disqualified {
            return Verdict::Ignored;
        }
        if self.state == MonitorState::ViolationPending {
            debug!(kind = %detection.kind, "violation collapsed into pending warning");
            return Verdict::Collapsed;
        }

        let count = current_count.saturating_add(1);
        let escalated = self.escalate_after.is_some_and(|limit| count >= limit);
        if self.policy == ViolationPolicy::Disqualify || escalated {
            self.state = MonitorState::Disqualified;
            Verdict::Disqualify { count }
        } else {
            self.state = MonitorState::ViolationPending;
            Verdict::Warn { count }
        }
    }

    /// Dismisses the pending warning. Returns whether one was pending.
    pub fn acknowledge(&mut self) -> bool {
        if self.state == MonitorState::ViolationPending {
            self.state = MonitorState::Armed;
            true
        } else {
            false
        }
    }
}
