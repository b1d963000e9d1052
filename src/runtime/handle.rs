//! Caller-facing handle to a running session.

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::{ExamError, Result};
use crate::grading::SubmissionOutcome;
use crate::liveness::LivenessReporter;
use crate::observability::Event;
use crate::phase::AdvanceOutcome;
use crate::runtime::actor::SettledState;
use crate::runtime::command::{Reply, RuntimeCommand};
use crate::session::model::{SessionSnapshot, ViolationKind};

/// Cloneable handle to one session's runtime.
///
/// Every method is a message to the session actor and resolves once the
/// actor has processed it, so calls from one handle are applied in the
/// order they were made. Once the runtime has stopped, every call fails
/// with `ExamError::Conflict`.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    session_id: String,
    commands: mpsc::UnboundedSender<RuntimeCommand>,
    events: broadcast::Sender<Event>,
    settled: watch::Receiver<SettledState>,
    liveness: LivenessReporter,
}

impl RuntimeHandle {
    pub(crate) const fn new(
        session_id: String,
        commands: mpsc::UnboundedSender<RuntimeCommand>,
        events: broadcast::Sender<Event>,
        settled: watch::Receiver<SettledState>,
        liveness: LivenessReporter,
    ) -> Self {
        Self {
            session_id,
            commands,
            events,
            settled,
            liveness,
        }
    }

    /// Id of the session this handle drives.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribes to session events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Sets an answer in the running phase.
    ///
    /// # Errors
    ///
    /// `Conflict` once completed; `Validation` for a malformed id, an
    /// over-long value, or an item outside the running phase; `NotFound`
    /// for an unknown item.
    pub async fn upsert_answer(&self, item_id: &str, value: &str) -> Result<()> {
        self.request(|reply| RuntimeCommand::UpsertAnswer {
            item_id: item_id.to_string(),
            value: value.to_string(),
            reply,
        })
        .await
    }

    /// Flips an item's review mark; returns the new mark.
    ///
    /// # Errors
    ///
    /// As for [`upsert_answer`](Self::upsert_answer).
    pub async fn toggle_mark(&self, item_id: &str) -> Result<bool> {
        self.request(|reply| RuntimeCommand::ToggleMark {
            item_id: item_id.to_string(),
            reply,
        })
        .await
    }

    /// Replaces an item's scratch note.
    ///
    /// # Errors
    ///
    /// As for [`upsert_answer`](Self::upsert_answer).
    pub async fn set_scratch(&self, item_id: &str, text: &str) -> Result<()> {
        self.request(|reply| RuntimeCommand::SetScratch {
            item_id: item_id.to_string(),
            text: text.to_string(),
            reply,
        })
        .await
    }

    /// Moves the active-item cursor.
    ///
    /// # Errors
    ///
    /// As for [`upsert_answer`](Self::upsert_answer).
    pub async fn select_item(&self, item_id: Option<&str>) -> Result<()> {
        self.request(|reply| RuntimeCommand::SelectItem {
            item_id: item_id.map(ToString::to_string),
            reply,
        })
        .await
    }

    /// Ends phase `phase_index` early.
    ///
    /// A stale index (the phase already ended) yields
    /// `AdvanceOutcome::Ignored`.
    ///
    /// # Errors
    ///
    /// `Validation` for a candidate finish on a break phase; `Conflict`
    /// once completed.
    pub async fn finish(&self, phase_index: usize, operator_override: bool) -> Result<AdvanceOutcome> {
        self.request(|reply| RuntimeCommand::Finish {
            phase_index,
            operator_override,
            reply,
        })
        .await
    }

    /// Dismisses the pending violation warning.
    ///
    /// # Errors
    ///
    /// `Conflict` if the runtime has stopped.
    pub async fn acknowledge(&self) -> Result<bool> {
        self.request(|reply| RuntimeCommand::Acknowledge { reply }).await
    }

    /// Reports an environment loss; returns the violation count afterwards.
    ///
    /// # Errors
    ///
    /// `NotFound` for another session id; `PolicyViolation` after a
    /// disqualification; `Conflict` after an ordinary completion.
    pub async fn report_violation(
        &self,
        session_id: &str,
        kind: ViolationKind,
        detail: Option<String>,
    ) -> Result<u32> {
        self.request(|reply| RuntimeCommand::Violation {
            session_id: session_id.to_string(),
            kind,
            detail,
            reply,
        })
        .await
    }

    /// Applies `answers` and submits the session.
    ///
    /// Resolves with the commit outcome. On an already completed session
    /// the answers are discarded and the result is
    /// `SubmissionOutcome::AlreadyCompleted`.
    ///
    /// # Errors
    ///
    /// `NotFound` for another session id; answer errors as for
    /// [`upsert_answer`](Self::upsert_answer); `TransientIo` if the commit
    /// could not land yet. In that case the session is still completed
    /// locally and the commit keeps retrying in the background.
    pub async fn submit(&self, session_id: &str, answers: Vec<(String, String)>) -> Result<SubmissionOutcome> {
        self.request(|reply| RuntimeCommand::Submit {
            session_id: session_id.to_string(),
            answers,
            reply,
        })
        .await
    }

    /// Sends a liveness heartbeat. Returns `false` when the session is not
    /// in progress.
    ///
    /// # Errors
    ///
    /// `NotFound` for another session id; `TransientIo` if the registry is
    /// unreachable.
    pub async fn heartbeat(&self, session_id: &str) -> Result<bool> {
        if session_id != self.session_id {
            return Err(ExamError::session_not_found(session_id));
        }
        self.liveness.heartbeat(session_id).await
    }

    /// Copy of the current local state.
    ///
    /// # Errors
    ///
    /// `Conflict` if the runtime has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| RuntimeCommand::Snapshot { reply }).await
    }

    /// Waits until the terminal submission has settled.
    ///
    /// # Errors
    ///
    /// The permanent submission error, or `Conflict` if the runtime
    /// stopped before the submission settled.
    pub async fn settled(&self) -> Result<SubmissionOutcome> {
        let mut rx = self.settled.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(state) => {
                let state: SettledState = (*state).clone();
                state.unwrap_or_else(|| Err(self.stopped()))
            }
            Err(_) => Err(self.stopped()),
        }
    }

    /// Stops the runtime and waits for it to acknowledge.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(RuntimeCommand::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> RuntimeCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| self.stopped())?;
        response.await.map_err(|_| self.stopped())?
    }

    fn stopped(&self) -> ExamError {
        ExamError::conflict(&self.session_id)
    }
}
