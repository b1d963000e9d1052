//! Session registry port and its key-value backed implementation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::assessment::ViolationPolicy;
use crate::clock::Clock;
use crate::error::PortError;
use crate::ports::kv::KvStore;
use crate::session::model::{
    CommitOutcome, SessionPatch, SessionRecord, SessionStatus, SubmissionCommit,
};

/// Authoritative store of session records.
#[async_trait]
pub trait SessionRegistry: Send + Sync + std::fmt::Debug {
    /// Registers a new in-progress session.
    async fn create_session(
        &self,
        candidate_id: &str,
        assessment_id: &str,
        policy: ViolationPolicy,
    ) -> Result<SessionRecord, PortError>;

    /// Fetches a session record.
    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, PortError>;

    /// Reports progress on an in-progress session. The phase index never
    /// moves backwards; patches against a completed session are rejected.
    async fn update_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<SessionRecord, PortError>;

    /// Raises the violation count to at least `sequence` and returns the
    /// stored count. Replaying the same sequence is harmless.
    async fn increment_violation(&self, session_id: &str, sequence: u32)
    -> Result<u32, PortError>;

    /// Records a heartbeat. Returns `false` without writing when the session
    /// is no longer in progress.
    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, PortError>;

    /// Atomically replaces the graded answers and completes the session,
    /// provided it is still in progress.
    async fn commit_submission(
        &self,
        session_id: &str,
        commit: SubmissionCommit,
    ) -> Result<CommitOutcome, PortError>;
}

/// Registry that stores each record as one JSON document in a [`KvStore`].
///
/// Every read-modify-write holds `write_lock`, and each record is a single
/// key, so a commit lands entirely or not at all.
#[derive(Debug)]
pub struct KvSessionRegistry {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl KvSessionRegistry {
    /// Creates a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    fn key(session_id: &str) -> String {
        format!("examwarden/registry/{session_id}")
    }

    fn load(&self, session_id: &str) -> Result<SessionRecord, PortError> {
        let raw = self
            .store
            .get(&Self::key(session_id))?
            .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, record: &SessionRecord) -> Result<(), PortError> {
        let raw = serde_json::to_string(record)?;
        self.store.set(&Self::key(&record.session_id), &raw)
    }

    fn modify<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionRecord) -> Result<(T, bool), PortError>,
    ) -> Result<T, PortError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| PortError::Transient("registry lock poisoned".to_string()))?;
        let mut record = self.load(session_id)?;
        let (out, dirty) = f(&mut record)?;
        if dirty {
            self.save(&record)?;
        }
        Ok(out)
    }
}

#[async_trait]
impl SessionRegistry for KvSessionRegistry {
    async fn create_session(
        &self,
        candidate_id: &str,
        assessment_id: &str,
        policy: ViolationPolicy,
    ) -> Result<SessionRecord, PortError> {
        let record = SessionRecord {
            session_id: uuid::Uuid::new_v4().to_string(),
            candidate_id: candidate_id.to_string(),
            assessment_id: assessment_id.to_string(),
            policy,
            status: SessionStatus::InProgress,
            current_phase_index: 0,
            remaining_seconds: 0,
            violation_count: 0,
            disqualified: false,
            created_at: self.clock.now(),
            completed_at: None,
            last_seen_at: None,
            score: None,
            graded_answers: Vec::new(),
        };
        self.save(&record)?;
        debug!(session_id = %record.session_id, candidate_id, "session registered");
        Ok(record)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, PortError> {
        self.load(session_id)
    }

    async fn update_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<SessionRecord, PortError> {
        self.modify(session_id, |record| {
            if !record.status.is_in_progress() {
                return Err(PortError::Rejected(format!(
                    "session {session_id} is completed"
                )));
            }
            if let Some(index) = patch.current_phase_index {
                record.current_phase_index = record.current_phase_index.max(index);
            }
            if let Some(remaining) = patch.remaining_seconds {
                record.remaining_seconds = remaining;
            }
            Ok((record.clone(), true))
        })
    }

    async fn increment_violation(
        &self,
        session_id: &str,
        sequence: u32,
    ) -> Result<u32, PortError> {
        self.modify(session_id, |record| {
            if sequence <= record.violation_count {
                return Ok((record.violation_count, false));
            }
            record.violation_count = sequence;
            Ok((sequence, true))
        })
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, PortError> {
        self.modify(session_id, |record| {
            if !record.status.is_in_progress() {
                return Ok((false, false));
            }
            record.last_seen_at = Some(at);
            Ok((true, true))
        })
    }

    async fn commit_submission(
        &self,
        session_id: &str,
        commit: SubmissionCommit,
    ) -> Result<CommitOutcome, PortError> {
        self.modify(session_id, |record| {
            if !record.status.is_in_progress() {
                return Ok((CommitOutcome::AlreadyCompleted, false));
            }
            record.status = SessionStatus::Completed;
            record.completed_at = Some(commit.completed_at);
            record.violation_count = record.violation_count.max(commit.violation_count);
            record.disqualified = commit.disqualified;
            record.score = Some(commit.score);
            record.graded_answers = commit.graded_answers;
            Ok((CommitOutcome::Committed, true))
        })
    }
}
