//! Session data model.
//!
//! [`SessionSnapshot`] is the candidate-side state that the store persists
//! after every mutation. [`SessionRecord`] is the authoritative copy kept by
//! the session registry; it only becomes `completed` through an atomic
//! [`SubmissionCommit`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::assessment::ViolationPolicy;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The attempt is running
    #[default]
    InProgress,
    /// Terminal; archived, never mutated again
    Completed,
}

impl SessionStatus {
    /// Whether the session still accepts input.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::InProgress)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A candidate's answer to one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Item the answer belongs to
    pub item_id: String,
    /// Raw value as entered; empty when only marked
    #[serde(default)]
    pub value: String,
    /// Flagged by the candidate for later review
    #[serde(default)]
    pub marked_for_review: bool,
}

/// Local, persisted state of the current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identifier
    pub session_id: String,
    /// Candidate taking the attempt
    pub candidate_id: String,
    /// Assessment being taken
    pub assessment_id: String,
    /// Policy fixed at join time
    pub policy: ViolationPolicy,
    /// Local status
    pub status: SessionStatus,
    /// Index of the active phase; never decreases
    pub current_phase_index: usize,
    /// Seconds left in the active phase
    pub remaining_seconds: u64,
    /// Counted violations; never decreases
    pub violation_count: u32,
    /// Set when completion was forced by a violation
    #[serde(default)]
    pub disqualified: bool,
    /// When the session was completed locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Item under the candidate's cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_item: Option<String>,
    /// Answers keyed by item id, in first-touched order
    #[serde(default)]
    pub answers: IndexMap<String, Answer>,
    /// Free-form scratch notes keyed by item id
    #[serde(default)]
    pub scratch: IndexMap<String, String>,
}

impl SessionSnapshot {
    /// A fresh snapshot at the start of phase 0.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        candidate_id: impl Into<String>,
        assessment_id: impl Into<String>,
        policy: ViolationPolicy,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            candidate_id: candidate_id.into(),
            assessment_id: assessment_id.into(),
            policy,
            status: SessionStatus::InProgress,
            current_phase_index: 0,
            remaining_seconds: 0,
            violation_count: 0,
            disqualified: false,
            completed_at: None,
            active_item: None,
            answers: IndexMap::new(),
            scratch: IndexMap::new(),
        }
    }

    /// Item id to raw value, ignoring marks.
    #[must_use]
    pub fn answer_values(&self) -> BTreeMap<String, String> {
        self.answers
            .iter()
            .filter(|(_, a)| !a.value.is_empty())
            .map(|(id, a)| (id.clone(), a.value.clone()))
            .collect()
    }

    /// Whether the item is flagged for review.
    #[must_use]
    pub fn is_marked(&self, item_id: &str) -> bool {
        self.answers
            .get(item_id)
            .is_some_and(|a| a.marked_for_review)
    }
}

/// What kind of environment loss was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The test surface lost input focus
    FocusLost,
    /// Full-screen presentation was exited
    FullscreenExit,
    /// The surface was hidden or minimised
    SurfaceHidden,
    /// Any other "left the secure surface" report
    Other,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FocusLost => "focus_lost",
            Self::FullscreenExit => "fullscreen_exit",
            Self::SurfaceHidden => "surface_hidden",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Outcome applied for a counted violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    /// The candidate was warned
    Warned,
    /// The session was terminated
    Disqualified,
}

impl fmt::Display for ViolationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warned => write!(f, "warned"),
            Self::Disqualified => write!(f, "disqualified"),
        }
    }
}

/// Append-only record of one counted violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    /// Session the violation belongs to
    pub session_id: String,
    /// When it was detected
    pub timestamp: DateTime<Utc>,
    /// What was detected
    pub kind: ViolationKind,
    /// Free-form detail from the host environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// What the policy did about it
    pub resulting_action: ViolationAction,
    /// Count after this violation
    pub violation_count: u32,
    /// Phase active when it happened
    pub phase_index: usize,
}

/// One graded answer as committed to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradedAnswer {
    /// Item id
    pub item_id: String,
    /// Submitted value, trimmed; empty when unanswered
    pub value: String,
    /// Whether the value matched an accepted alternative
    pub correct: bool,
    /// Review flag at submission time
    pub marked_for_review: bool,
}

/// Aggregate result of grading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Items answered correctly
    pub correct: u32,
    /// Items in the assessment
    pub total: u32,
}

/// Everything a single submission writes, applied as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionCommit {
    /// Graded answers; replaces any previously stored set
    pub graded_answers: Vec<GradedAnswer>,
    /// Completion timestamp
    pub completed_at: DateTime<Utc>,
    /// Violation count at submission time
    pub violation_count: u32,
    /// Whether completion was forced by a violation
    pub disqualified: bool,
    /// Aggregate score
    pub score: Score,
}

/// Result of an atomic commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This call moved the session to `completed`
    Committed,
    /// Another call got there first; nothing was written
    AlreadyCompleted,
}

/// Registry-side record of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier
    pub session_id: String,
    /// Candidate taking the attempt
    pub candidate_id: String,
    /// Assessment being taken
    pub assessment_id: String,
    /// Violation policy
    pub policy: ViolationPolicy,
    /// Authoritative status
    pub status: SessionStatus,
    /// Last reported phase index
    pub current_phase_index: usize,
    /// Last reported remaining seconds
    pub remaining_seconds: u64,
    /// Highest violation count reported
    pub violation_count: u32,
    /// Whether completion was forced by a violation
    #[serde(default)]
    pub disqualified: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Completion time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Score, once graded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    /// Graded answers, once committed
    #[serde(default)]
    pub graded_answers: Vec<GradedAnswer>,
}

/// Progress fields the runtime may report while a session is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// New phase index
    pub current_phase_index: Option<usize>,
    /// New remaining seconds
    pub remaining_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut snap = SessionSnapshot::new("s-1", "c-1", "a-1", ViolationPolicy::Log);
        snap.answers.insert(
            "q1".to_string(),
            Answer {
                item_id: "q1".to_string(),
                value: "B".to_string(),
                marked_for_review: true,
            },
        );
        let json = serde_json::to_string(&snap).unwrap();
        let back: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert!(back.is_marked("q1"));
    }

    #[test]
    fn answer_values_skip_mark_only_entries() {
        let mut snap = SessionSnapshot::new("s-1", "c-1", "a-1", ViolationPolicy::Log);
        snap.answers.insert(
            "q2".to_string(),
            Answer {
                item_id: "q2".to_string(),
                value: String::new(),
                marked_for_review: true,
            },
        );
        assert!(snap.answer_values().is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(SessionStatus::Completed.to_string(), "completed");
    }
}
