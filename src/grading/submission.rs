//! Terminal grading and commit.
//!
//! [`SubmissionService::submit`] is safe to call from every path that can end
//! a session (phase exhaustion, disqualification, explicit submit). The
//! registry commit is guarded by `status = in_progress`, so the first call
//! wins and every later one is a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{ExamError, PortError, Result};
use crate::grading::retry::{RetryPolicy, port_error};
use crate::grading::scoring;
use crate::observability::metrics;
use crate::ports::{ItemRepository, SessionRegistry};
use crate::session::model::{Answer, CommitOutcome, Score, SubmissionCommit};

/// Answers and terminal facts captured when the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionInput {
    /// Answers as they stood at the moment of completion
    pub answers: Vec<Answer>,
    /// Local violation count
    pub violation_count: u32,
    /// Whether completion was forced by a violation
    pub disqualified: bool,
    /// Local completion time
    pub completed_at: DateTime<Utc>,
}

/// What a submit call achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// This call graded and completed the session
    Committed {
        /// Resulting score
        score: Score,
    },
    /// The session was already completed; nothing was written
    AlreadyCompleted,
}

impl SubmissionOutcome {
    /// Stable label for logs, metrics and events.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::AlreadyCompleted => "already_completed",
        }
    }
}

/// Grades answers and commits the terminal session state.
#[derive(Debug, Clone)]
pub struct SubmissionService {
    items: Arc<dyn ItemRepository>,
    registry: Arc<dyn SessionRegistry>,
    retry: RetryPolicy,
}

impl SubmissionService {
    /// Creates a service over the given collaborators.
    #[must_use]
    pub fn new(
        items: Arc<dyn ItemRepository>,
        registry: Arc<dyn SessionRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            items,
            registry,
            retry,
        }
    }

    /// Grades `input` and completes the session, at most once.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session; `TransientIo` when a collaborator
    /// stays unavailable through every retry.
    pub async fn submit(&self, session_id: &str, input: &SubmissionInput) -> Result<SubmissionOutcome> {
        let record = self
            .retry
            .run("get_session", || self.registry.get_session(session_id))
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => ExamError::session_not_found(session_id),
                other => port_error("get_session", other),
            })?;

        if !record.status.is_in_progress() {
            info!(session_id, "session already completed; submit is a no-op");
            metrics::record_submission(SubmissionOutcome::AlreadyCompleted.as_label());
            return Ok(SubmissionOutcome::AlreadyCompleted);
        }

        let items = self
            .retry
            .run("fetch_items", || self.items.fetch_items(&record.assessment_id))
            .await
            .map_err(|e| port_error("fetch_items", e))?;

        let (graded_answers, score) = scoring::grade(&items, &input.answers);
        let commit = SubmissionCommit {
            graded_answers,
            completed_at: input.completed_at,
            violation_count: input.violation_count,
            disqualified: input.disqualified,
            score,
        };

        let outcome = self
            .retry
            .run("commit_submission", || {
                self.registry.commit_submission(session_id, commit.clone())
            })
            .await
            .map_err(|e| port_error("commit_submission", e))?;

        let outcome = match outcome {
            CommitOutcome::Committed => SubmissionOutcome::Committed { score },
            CommitOutcome::AlreadyCompleted => SubmissionOutcome::AlreadyCompleted,
        };
        info!(
            session_id,
            outcome = outcome.as_label(),
            correct = score.correct,
            total = score.total,
            disqualified = input.disqualified,
            "submission settled"
        );
        metrics::record_submission(outcome.as_label());
        Ok(outcome)
    }

    /// Like [`submit`](Self::submit), but keeps going through transient
    /// outages until the commit lands. Permanent errors still return.
    ///
    /// # Errors
    ///
    /// Any non-transient error from [`submit`](Self::submit).
    pub async fn submit_until_committed(
        &self,
        session_id: &str,
        input: &SubmissionInput,
    ) -> Result<SubmissionOutcome> {
        let mut rounds: u32 = 0;
        loop {
            match self.submit(session_id, input).await {
                Err(ExamError::TransientIo { operation, message }) => {
                    rounds = rounds.saturating_add(1);
                    metrics::record_submission("retrying");
                    warn!(session_id, operation, %message, rounds, "submission still failing; retrying");
                    tokio::time::sleep(self.retry.max_backoff).await;
                }
                other => return other,
            }
        }
    }
}
