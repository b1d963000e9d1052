//! The session actor.
//!
//! One task owns the store, the sequencer and the integrity monitor and
//! handles [`RuntimeCommand`]s one at a time. Nothing in here is shared, so
//! nothing in here is locked. Work that has to wait on a collaborator
//! (submission, registry progress, activity log) is spawned and reports back
//! through the same queue.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::assessment::Assessment;
use crate::clock::Clock;
use crate::error::{ExamError, Result};
use crate::grading::{RetryPolicy, SubmissionInput, SubmissionOutcome, SubmissionService};
use crate::integrity::{Detection, EnvironmentSignal, IntegrityMonitor, Verdict};
use crate::observability::{Event, metrics};
use crate::phase::{AdvanceOutcome, AdvanceTrigger, PhaseSequencer, TimerEvent, TimerSignal};
use crate::ports::activity::spawn_record;
use crate::ports::{ActivityEvent, ActivityLogSink, SessionRegistry};
use crate::runtime::command::{Reply, RuntimeCommand};
use crate::session::model::{SessionPatch, ViolationAction, ViolationEvent};
use crate::session::store::SessionStateStore;

/// Shared view of how the terminal submission ended.
pub(crate) type SettledState = Option<Result<SubmissionOutcome>>;

pub(crate) struct SessionActor {
    pub(crate) assessment: Arc<Assessment>,
    pub(crate) store: SessionStateStore,
    pub(crate) sequencer: PhaseSequencer,
    pub(crate) monitor: IntegrityMonitor,
    pub(crate) submission: SubmissionService,
    pub(crate) registry: Arc<dyn SessionRegistry>,
    pub(crate) activity: Arc<dyn ActivityLogSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) retry: RetryPolicy,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) settled: watch::Sender<SettledState>,
    pub(crate) commands: mpsc::WeakUnboundedSender<RuntimeCommand>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) submit_reply: Option<Reply<SubmissionOutcome>>,
}

impl SessionActor {
    /// Puts the session on the clock.
    ///
    /// Without a local snapshot the session starts at the registry's phase,
    /// which is 0 for a new join. A restored one continues where its
    /// snapshot left off, or at the registry's phase if that is further
    /// along. A session that is already completed locally is settled, or
    /// resubmitted if the registry never saw the commit.
    pub(crate) fn activate(&mut self, registry_completed: bool, registry_phase: usize) -> Result<()> {
        if self.store.is_completed() {
            if registry_completed {
                self.settle(Ok(SubmissionOutcome::AlreadyCompleted));
            } else {
                let state = self.store.state();
                let input = SubmissionInput {
                    answers: state.answers.values().cloned().collect(),
                    violation_count: state.violation_count,
                    disqualified: state.disqualified,
                    completed_at: state.completed_at.unwrap_or_else(|| self.clock.now()),
                };
                info!(
                    session_id = %self.store.session_id(),
                    "local completion was never committed; resubmitting"
                );
                self.spawn_submission(input, true);
            }
            return Ok(());
        }

        let duration_of = |index: usize| {
            self.assessment
                .phase(index)
                .map_or(0, |phase| phase.duration_seconds)
        };
        let snapshot = self.store.state();
        let (index, remaining, entering) = if !self.store.was_restored()
            || registry_phase > snapshot.current_phase_index
        {
            (registry_phase, duration_of(registry_phase), true)
        } else {
            (snapshot.current_phase_index, snapshot.remaining_seconds, false)
        };

        self.sequencer.activate(index, remaining)?;
        if entering {
            self.on_phase_entered(index, remaining);
        } else {
            self.announce_phase(index, remaining);
        }
        Ok(())
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RuntimeCommand>) {
        while let Some(command) = rx.recv().await {
            if let RuntimeCommand::Shutdown { reply } = command {
                self.stop("shutdown requested");
                let _ = reply.send(());
                return;
            }
            self.handle(command);
        }
        self.stop("all handles dropped");
    }

    fn handle(&mut self, command: RuntimeCommand) {
        match command {
            RuntimeCommand::UpsertAnswer {
                item_id,
                value,
                reply,
            } => {
                let result = self
                    .ensure_in_active_phase(&item_id)
                    .and_then(|()| self.store.upsert_answer(&item_id, &value));
                let _ = reply.send(result);
            }
            RuntimeCommand::ToggleMark { item_id, reply } => {
                let result = self
                    .ensure_in_active_phase(&item_id)
                    .and_then(|()| self.store.toggle_mark(&item_id));
                let _ = reply.send(result);
            }
            RuntimeCommand::SetScratch {
                item_id,
                text,
                reply,
            } => {
                let result = self
                    .ensure_in_active_phase(&item_id)
                    .and_then(|()| self.store.set_scratch(&item_id, &text));
                let _ = reply.send(result);
            }
            RuntimeCommand::SelectItem { item_id, reply } => {
                let result = match item_id.as_deref() {
                    Some(id) => self.ensure_in_active_phase(id),
                    None => Ok(()),
                }
                .and_then(|()| self.store.set_cursor(item_id.as_deref()));
                let _ = reply.send(result);
            }
            RuntimeCommand::Finish {
                phase_index,
                operator_override,
                reply,
            } => {
                let _ = reply.send(self.finish(phase_index, operator_override));
            }
            RuntimeCommand::Acknowledge { reply } => {
                let _ = reply.send(Ok(self.monitor.acknowledge()));
            }
            RuntimeCommand::Violation {
                session_id,
                kind,
                detail,
                reply,
            } => {
                let result = self.ensure_session(&session_id).and_then(|()| {
                    self.on_violation(Detection {
                        kind,
                        detail,
                        at: self.clock.now(),
                    })
                });
                let _ = reply.send(result);
            }
            RuntimeCommand::Environment(signal) => self.on_environment(&signal),
            RuntimeCommand::Submit {
                session_id,
                answers,
                reply,
            } => self.on_submit(&session_id, &answers, reply),
            RuntimeCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.store.snapshot()));
            }
            RuntimeCommand::Timer(signal) => self.on_timer(signal),
            RuntimeCommand::Settled { result, input } => self.on_settled(result, input),
            RuntimeCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn finish(&mut self, phase_index: usize, operator_override: bool) -> Result<AdvanceOutcome> {
        if self.store.is_completed() {
            return Err(ExamError::conflict(self.store.session_id()));
        }
        let trigger = if operator_override {
            AdvanceTrigger::OperatorOverride
        } else {
            AdvanceTrigger::Finished
        };
        let outcome = self.sequencer.advance(phase_index, trigger)?;
        self.apply_advance(outcome);
        Ok(outcome)
    }

    fn on_timer(&mut self, signal: TimerSignal) {
        if !self.sequencer.is_current(signal.generation) {
            trace!(generation = signal.generation, "stale timer signal dropped");
            return;
        }
        let Some(index) = self.sequencer.current_index() else {
            return;
        };
        match signal.event {
            TimerEvent::Tick { remaining } => {
                self.store.record_tick(remaining);
                metrics::set_remaining_seconds(remaining);
                self.emit(Event::Tick {
                    phase_index: index,
                    remaining_seconds: remaining,
                });
            }
            TimerEvent::Expired => match self.sequencer.advance(index, AdvanceTrigger::Expired) {
                Ok(outcome) => self.apply_advance(outcome),
                Err(e) => warn!(phase_index = index, error = %e, "expiry could not advance"),
            },
        }
    }

    fn apply_advance(&mut self, outcome: AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Entered {
                index,
                remaining_seconds,
            } => self.on_phase_entered(index, remaining_seconds),
            AdvanceOutcome::Submitting { from } => {
                debug!(from, "no scored phase remains");
                self.start_submission(false);
            }
            AdvanceOutcome::Ignored => {}
        }
    }

    fn on_phase_entered(&mut self, index: usize, remaining_seconds: u64) {
        if let Err(e) = self.store.enter_phase(index, remaining_seconds) {
            warn!(phase_index = index, error = %e, "store refused phase entry");
        }
        self.announce_phase(index, remaining_seconds);

        spawn_record(
            Arc::clone(&self.activity),
            ActivityEvent::PhaseEntered {
                session_id: self.store.session_id().to_string(),
                phase_index: index,
                at: self.clock.now(),
            },
        );

        let registry = Arc::clone(&self.registry);
        let retry = self.retry;
        let session_id = self.store.session_id().to_string();
        let patch = SessionPatch {
            current_phase_index: Some(index),
            remaining_seconds: Some(remaining_seconds),
        };
        tokio::spawn(async move {
            if let Err(e) = retry
                .run("update_session", || registry.update_session(&session_id, patch))
                .await
            {
                warn!(%session_id, phase_index = index, error = %e, "registry progress update failed");
            }
        });
    }

    fn announce_phase(&self, index: usize, remaining_seconds: u64) {
        metrics::set_remaining_seconds(remaining_seconds);
        if let Some(phase) = self.assessment.phase(index) {
            self.emit(Event::PhaseEntered {
                timestamp: self.clock.now(),
                phase_index: index,
                phase_id: phase.id.clone(),
                kind: phase.kind,
                remaining_seconds,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    fn on_environment(&mut self, signal: &EnvironmentSignal) {
        let Some(kind) = signal.violation_kind() else {
            trace!(?signal, "restoration signal");
            return;
        };
        let detection = Detection {
            kind,
            detail: signal.detail().map(ToString::to_string),
            at: self.clock.now(),
        };
        if let Err(e) = self.on_violation(detection) {
            debug!(error = %e, "environment signal after completion ignored");
        }
    }

    /// Violations are serialized with phase advances through the command
    /// queue, so a detection racing an expiry lands on the phase that follows
    /// it. Once the session is completed (including while the terminal
    /// submission is in flight) every report gets the same error.
    fn on_violation(&mut self, detection: Detection) -> Result<u32> {
        if self.store.is_completed() {
            let state = self.store.state();
            return Err(if state.disqualified {
                ExamError::PolicyViolation {
                    session_id: state.session_id.clone(),
                    violation_count: state.violation_count,
                }
            } else {
                ExamError::conflict(&state.session_id)
            });
        }

        let count = self.store.state().violation_count;
        match self.monitor.observe(&detection, count) {
            Verdict::Warn { count } => {
                self.record_violation(&detection, ViolationAction::Warned, count);
                Ok(count)
            }
            Verdict::Disqualify { count } => {
                self.record_violation(&detection, ViolationAction::Disqualified, count);
                self.start_submission(true);
                Ok(count)
            }
            Verdict::Collapsed | Verdict::Ignored => Ok(count),
        }
    }

    fn record_violation(&mut self, detection: &Detection, action: ViolationAction, count: u32) {
        self.store.record_violation(count);
        metrics::record_violation(action);

        let session_id = self.store.session_id().to_string();
        warn!(
            %session_id,
            kind = %detection.kind,
            violation_count = count,
            %action,
            "integrity violation"
        );

        spawn_record(
            Arc::clone(&self.activity),
            ActivityEvent::Violation(ViolationEvent {
                session_id: session_id.clone(),
                timestamp: detection.at,
                kind: detection.kind,
                detail: detection.detail.clone(),
                resulting_action: action,
                violation_count: count,
                phase_index: self.store.state().current_phase_index,
            }),
        );

        match action {
            ViolationAction::Warned => {
                let registry = Arc::clone(&self.registry);
                let retry = self.retry;
                tokio::spawn(async move {
                    if let Err(e) = retry
                        .run("increment_violation", || {
                            registry.increment_violation(&session_id, count)
                        })
                        .await
                    {
                        warn!(%session_id, violation_count = count, error = %e, "violation count not reported");
                    }
                });
                self.emit(Event::ViolationWarning {
                    timestamp: detection.at,
                    kind: detection.kind,
                    violation_count: count,
                });
            }
            ViolationAction::Disqualified => {
                self.emit(Event::Disqualified {
                    timestamp: detection.at,
                    kind: detection.kind,
                    violation_count: count,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    fn on_submit(
        &mut self,
        session_id: &str,
        answers: &[(String, String)],
        reply: Reply<SubmissionOutcome>,
    ) {
        if let Err(e) = self.ensure_session(session_id) {
            let _ = reply.send(Err(e));
            return;
        }
        if self.store.is_completed() {
            let _ = reply.send(Ok(SubmissionOutcome::AlreadyCompleted));
            return;
        }
        let applied = answers
            .iter()
            .try_for_each(|(item_id, _)| self.ensure_in_active_phase(item_id))
            .and_then(|()| self.store.upsert_answers(answers));
        if let Err(e) = applied {
            let _ = reply.send(Err(e));
            return;
        }
        self.submit_reply = Some(reply);
        self.start_submission(false);
    }

    fn start_submission(&mut self, disqualified: bool) {
        self.sequencer.begin_termination();

        let at = self.clock.now();
        let state = self.store.state();
        let input = SubmissionInput {
            answers: state.answers.values().cloned().collect(),
            violation_count: state.violation_count,
            disqualified,
            completed_at: at,
        };

        if self.store.complete(disqualified, at) {
            info!(
                session_id = %self.store.session_id(),
                disqualified,
                "session completed locally"
            );
            self.emit(Event::SessionCompleted {
                timestamp: at,
                disqualified,
            });
            spawn_record(
                Arc::clone(&self.activity),
                ActivityEvent::Completed {
                    session_id: self.store.session_id().to_string(),
                    disqualified,
                    at,
                },
            );
        }
        metrics::set_remaining_seconds(0);
        self.spawn_submission(input, false);
    }

    fn spawn_submission(&self, input: SubmissionInput, until_committed: bool) {
        let service = self.submission.clone();
        let commands = self.commands.clone();
        let session_id = self.store.session_id().to_string();
        tokio::spawn(async move {
            let result = if until_committed {
                service.submit_until_committed(&session_id, &input).await
            } else {
                service.submit(&session_id, &input).await
            };
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(RuntimeCommand::Settled { result, input });
            }
        });
    }

    fn on_settled(&mut self, result: Result<SubmissionOutcome>, input: SubmissionInput) {
        match result {
            Err(e @ ExamError::TransientIo { .. }) => {
                error!(
                    session_id = %self.store.session_id(),
                    error = %e,
                    "submission failed; retrying in the background"
                );
                self.emit(Event::SubmissionFailed {
                    timestamp: self.clock.now(),
                    error: e.to_string(),
                });
                if let Some(reply) = self.submit_reply.take() {
                    let _ = reply.send(Err(e));
                }
                self.spawn_submission(input, true);
            }
            other => self.settle(other),
        }
    }

    fn settle(&mut self, result: Result<SubmissionOutcome>) {
        self.sequencer.settle();
        match &result {
            Ok(outcome) => {
                let score = match outcome {
                    SubmissionOutcome::Committed { score } => Some(*score),
                    SubmissionOutcome::AlreadyCompleted => None,
                };
                self.emit(Event::SubmissionSettled {
                    timestamp: self.clock.now(),
                    outcome: outcome.as_label().to_string(),
                    score,
                });
            }
            Err(e) => {
                error!(session_id = %self.store.session_id(), error = %e, "submission failed permanently");
                self.emit(Event::SubmissionFailed {
                    timestamp: self.clock.now(),
                    error: e.to_string(),
                });
            }
        }
        if let Some(reply) = self.submit_reply.take() {
            let _ = reply.send(result.clone());
        }
        self.settled.send_replace(Some(result));
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_session(&self, session_id: &str) -> Result<()> {
        if session_id == self.store.session_id() {
            Ok(())
        } else {
            Err(ExamError::session_not_found(session_id))
        }
    }

    /// Completed sessions conflict; known items outside the running phase
    /// are rejected. Unknown ids fall through to the store's own checks.
    fn ensure_in_active_phase(&self, item_id: &str) -> Result<()> {
        if self.store.is_completed() {
            return Err(ExamError::conflict(self.store.session_id()));
        }
        match self.assessment.phase_of_item(item_id) {
            Some(phase) if Some(phase) != self.sequencer.current_index() => {
                Err(ExamError::validation(format!(
                    "item {item_id} is not part of the active phase"
                )))
            }
            _ => Ok(()),
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn stop(&mut self, reason: &str) {
        self.sequencer.halt();
        self.shutdown.cancel();
        info!(session_id = %self.store.session_id(), reason, "session runtime stopped");
        self.emit(Event::SessionStopped {
            timestamp: self.clock.now(),
            reason: reason.to_string(),
        });
    }
}
