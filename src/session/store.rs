//! Write-through session state store.
//!
//! Holds the answer, mark and scratch state of the one attempt a runtime
//! owns. Every accepted mutation is written to the [`KvStore`] before the
//! call returns; a failed write is logged and left for the next mutation to
//! supersede.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::assessment::Assessment;
use crate::error::{ExamError, Result};
use crate::observability::metrics;
use crate::ports::KvStore;
use crate::session::model::{Answer, SessionSnapshot, SessionStatus};

/// Key under which a session's snapshot is persisted.
#[must_use]
pub fn snapshot_key(session_id: &str) -> String {
    format!("examwarden/session/{session_id}")
}

/// Identity of the attempt a store is opened for.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// Session id issued by the registry
    pub session_id: String,
    /// Candidate taking the attempt
    pub candidate_id: String,
}

/// Mutable state of the current attempt, persisted on every change.
#[derive(Debug)]
pub struct SessionStateStore {
    assessment: Arc<Assessment>,
    kv: Arc<dyn KvStore>,
    snapshot: SessionSnapshot,
    max_answer_len: usize,
    restored: bool,
}

impl SessionStateStore {
    /// Opens the store for `identity`.
    ///
    /// A persisted snapshot for the same session is restored verbatim.
    /// Otherwise, or when the stored document cannot be decoded, a fresh
    /// snapshot at phase 0 is created and written immediately.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::TransientIo` if the key-value store cannot be
    /// read.
    pub fn load_from_persistence(
        kv: Arc<dyn KvStore>,
        assessment: Arc<Assessment>,
        identity: SessionIdentity,
        max_answer_len: usize,
    ) -> Result<Self> {
        let key = snapshot_key(&identity.session_id);
        let raw = kv.get(&key).map_err(|e| ExamError::TransientIo {
            operation: "kv_get",
            message: e.to_string(),
        })?;

        let restored = raw.and_then(|raw| {
            match serde_json::from_str::<SessionSnapshot>(&raw) {
                Ok(snap) if snap.session_id == identity.session_id => Some(snap),
                Ok(snap) => {
                    warn!(
                        session_id = %identity.session_id,
                        stored = %snap.session_id,
                        "persisted snapshot belongs to another session; starting fresh"
                    );
                    None
                }
                Err(e) => {
                    warn!(
                        session_id = %identity.session_id,
                        error = %e,
                        "persisted snapshot is unreadable; starting fresh"
                    );
                    None
                }
            }
        });

        let was_restored = restored.is_some();
        let snapshot = restored.unwrap_or_else(|| {
            SessionSnapshot::new(
                identity.session_id,
                identity.candidate_id,
                assessment.id(),
                assessment.policy(),
            )
        });

        let store = Self {
            assessment,
            kv,
            snapshot,
            max_answer_len,
            restored: was_restored,
        };
        if was_restored {
            debug!(
                session_id = %store.snapshot.session_id,
                phase_index = store.snapshot.current_phase_index,
                answers = store.snapshot.answers.len(),
                "session snapshot restored"
            );
        } else {
            store.persist();
        }
        Ok(store)
    }

    /// Whether the snapshot came from persistence.
    #[must_use]
    pub const fn was_restored(&self) -> bool {
        self.restored
    }

    /// Session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.snapshot.session_id
    }

    /// Borrowed view of the current state.
    #[must_use]
    pub const fn state(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Owned copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.clone()
    }

    /// Whether the attempt has been completed locally.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.snapshot.status, SessionStatus::Completed)
    }

    /// Sets the value of an answer. Last write wins.
    ///
    /// # Errors
    ///
    /// `Conflict` after completion, `Validation`/`NotFound` for a bad item
    /// id, `Validation` for an over-long value.
    pub fn upsert_answer(&mut self, item_id: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        self.validate_item(item_id)?;
        self.validate_len("answer", value)?;

        self.answer_entry(item_id).value = value.to_string();
        self.persist();
        Ok(())
    }

    /// Sets several answers at once. Nothing is written unless every pair
    /// is valid.
    ///
    /// # Errors
    ///
    /// The first error [`upsert_answer`](Self::upsert_answer) would report
    /// for any pair.
    pub fn upsert_answers(&mut self, answers: &[(String, String)]) -> Result<()> {
        self.ensure_open()?;
        for (item_id, value) in answers {
            self.validate_item(item_id)?;
            self.validate_len("answer", value)?;
        }
        if answers.is_empty() {
            return Ok(());
        }

        for (item_id, value) in answers {
            self.answer_entry(item_id).value.clone_from(value);
        }
        self.persist();
        Ok(())
    }

    /// Flips the review mark of an item and returns the new mark.
    ///
    /// # Errors
    ///
    /// `Conflict` after completion, `Validation`/`NotFound` for a bad item
    /// id.
    pub fn toggle_mark(&mut self, item_id: &str) -> Result<bool> {
        self.ensure_open()?;
        self.validate_item(item_id)?;

        let entry = self.answer_entry(item_id);
        entry.marked_for_review = !entry.marked_for_review;
        let marked = entry.marked_for_review;
        self.persist();
        Ok(marked)
    }

    /// Replaces the scratch note for an item; an empty note removes it.
    ///
    /// # Errors
    ///
    /// Same as [`upsert_answer`](Self::upsert_answer).
    pub fn set_scratch(&mut self, item_id: &str, text: &str) -> Result<()> {
        self.ensure_open()?;
        self.validate_item(item_id)?;
        self.validate_len("scratch note", text)?;

        if text.is_empty() {
            self.snapshot.scratch.shift_remove(item_id);
        } else {
            self.snapshot
                .scratch
                .insert(item_id.to_string(), text.to_string());
        }
        self.persist();
        Ok(())
    }

    /// Moves the active-item cursor.
    ///
    /// # Errors
    ///
    /// `Conflict` after completion, `Validation`/`NotFound` for a bad item
    /// id.
    pub fn set_cursor(&mut self, item_id: Option<&str>) -> Result<()> {
        self.ensure_open()?;
        if let Some(id) = item_id {
            self.validate_item(id)?;
        }
        self.snapshot.active_item = item_id.map(ToString::to_string);
        self.persist();
        Ok(())
    }

    /// Records the countdown value. Ignored once completed.
    pub fn record_tick(&mut self, remaining_seconds: u64) {
        if self.is_completed() {
            return;
        }
        self.snapshot.remaining_seconds = remaining_seconds;
        self.persist();
    }

    /// Moves to a new phase and resets the cursor to its first item.
    ///
    /// # Errors
    ///
    /// `Conflict` after completion; `Validation` if `index` would move the
    /// session backwards.
    pub fn enter_phase(&mut self, index: usize, remaining_seconds: u64) -> Result<()> {
        self.ensure_open()?;
        if index < self.snapshot.current_phase_index {
            return Err(ExamError::validation(format!(
                "phase index {index} precedes current phase {}",
                self.snapshot.current_phase_index
            )));
        }
        self.snapshot.current_phase_index = index;
        self.snapshot.remaining_seconds = remaining_seconds;
        self.snapshot.active_item = self
            .assessment
            .phase(index)
            .and_then(|p| p.item_ids.first().cloned());
        self.persist();
        Ok(())
    }

    /// Raises the violation counter to `count`. The counter never drops.
    pub fn record_violation(&mut self, count: u32) {
        if count <= self.snapshot.violation_count {
            return;
        }
        self.snapshot.violation_count = count;
        self.persist();
    }

    /// Marks the attempt completed. Returns `false` if it already was.
    pub fn complete(&mut self, disqualified: bool, at: DateTime<Utc>) -> bool {
        if self.is_completed() {
            return false;
        }
        self.snapshot.status = SessionStatus::Completed;
        self.snapshot.disqualified = disqualified;
        self.snapshot.completed_at = Some(at);
        self.snapshot.remaining_seconds = 0;
        self.persist();
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_completed() {
            return Err(ExamError::conflict(&self.snapshot.session_id));
        }
        Ok(())
    }

    fn validate_item(&self, item_id: &str) -> Result<()> {
        if item_id.trim().is_empty() {
            return Err(ExamError::validation("item id must not be blank"));
        }
        if item_id.chars().any(char::is_control) {
            return Err(ExamError::validation(format!(
                "item id {item_id:?} contains control characters"
            )));
        }
        if !self.assessment.contains_item(item_id) {
            return Err(ExamError::item_not_found(item_id));
        }
        Ok(())
    }

    fn validate_len(&self, what: &str, value: &str) -> Result<()> {
        if value.len() > self.max_answer_len {
            return Err(ExamError::validation(format!(
                "{what} is {} bytes; the limit is {}",
                value.len(),
                self.max_answer_len
            )));
        }
        Ok(())
    }

    fn answer_entry(&mut self, item_id: &str) -> &mut Answer {
        self.snapshot
            .answers
            .entry(item_id.to_string())
            .or_insert_with(|| Answer {
                item_id: item_id.to_string(),
                ..Answer::default()
            })
    }

    fn persist(&self) {
        let key = snapshot_key(&self.snapshot.session_id);
        let result = serde_json::to_string(&self.snapshot)
            .map_err(crate::error::PortError::from)
            .and_then(|raw| self.kv.set(&key, &raw));
        if let Err(e) = result {
            warn!(
                session_id = %self.snapshot.session_id,
                error = %e,
                "snapshot persist failed; next write supersedes it"
            );
            metrics::record_persistence_failure();
        }
    }
}
