//! Session runtime.
//!
//! [`ExamRuntime::join`] registers a new attempt and [`ExamRuntime::resume`]
//! picks an existing one back up; both return a [`RuntimeHandle`] to the
//! actor that owns the session from then on.
//!
//! ```text
//!   handle ─┐
//!   timer  ─┼─▶ one mpsc queue ─▶ SessionActor ─▶ store / sequencer / monitor
//!   signals ┘                          │
//!                                      └─▶ spawned: submission, registry, activity log
//! ```

mod actor;
mod command;
mod handle;

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assessment::Assessment;
use crate::clock::Clock;
use crate::config::RuntimeSettings;
use crate::error::{ExamError, PortError, Result};
use crate::grading::retry::port_error;
use crate::grading::{RetryPolicy, SubmissionService};
use crate::integrity::{EnvironmentSource, IntegrityMonitor};
use crate::liveness::LivenessReporter;
use crate::observability::Event;
use crate::phase::PhaseSequencer;
use crate::ports::activity::spawn_record;
use crate::ports::{ActivityEvent, ActivityLogSink, ItemRepository, KvStore, SessionRegistry};
use crate::session::model::SessionRecord;
use crate::session::store::{SessionIdentity, SessionStateStore};

use actor::SessionActor;
use command::{CommandSink, RuntimeCommand};

pub use handle::RuntimeHandle;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Collaborators a runtime is wired to.
#[derive(Debug, Clone)]
pub struct RuntimeDeps {
    /// Answer keys
    pub items: Arc<dyn ItemRepository>,
    /// Authoritative session records
    pub registry: Arc<dyn SessionRegistry>,
    /// Best-effort activity log
    pub activity: Arc<dyn ActivityLogSink>,
    /// Snapshot persistence
    pub kv: Arc<dyn KvStore>,
    /// Timestamp source
    pub clock: Arc<dyn Clock>,
    /// Host environment signals, if any
    pub environment: Option<Arc<dyn EnvironmentSource>>,
    events: broadcast::Sender<Event>,
}

impl RuntimeDeps {
    /// Bundles the collaborators. No environment source is attached.
    #[must_use]
    pub fn new(
        items: Arc<dyn ItemRepository>,
        registry: Arc<dyn SessionRegistry>,
        activity: Arc<dyn ActivityLogSink>,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            items,
            registry,
            activity,
            kv,
            clock,
            environment: None,
            events,
        }
    }

    /// Attaches a source of host environment signals.
    #[must_use]
    pub fn with_environment(mut self, source: Arc<dyn EnvironmentSource>) -> Self {
        self.environment = Some(source);
        self
    }

    /// Subscribes to the events of the runtime these deps will start.
    ///
    /// Subscribing before `join`/`resume` guarantees the start-up events are
    /// seen.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

/// Entry points for starting a session runtime.
#[derive(Debug)]
pub struct ExamRuntime;

impl ExamRuntime {
    /// Registers a new attempt for `candidate_id` and starts phase 0.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank candidate id; `TransientIo` if the registry
    /// is unreachable.
    pub async fn join(
        assessment: Arc<Assessment>,
        settings: &RuntimeSettings,
        deps: RuntimeDeps,
        candidate_id: &str,
    ) -> Result<RuntimeHandle> {
        if candidate_id.trim().is_empty() {
            return Err(ExamError::validation("candidate id must not be blank"));
        }
        let retry = RetryPolicy::from(settings);
        let record = retry
            .run("create_session", || {
                deps.registry
                    .create_session(candidate_id, assessment.id(), assessment.policy())
            })
            .await
            .map_err(|e| port_error("create_session", e))?;
        info!(session_id = %record.session_id, candidate_id, "session joined");
        Self::start(assessment, settings, deps, record)
    }

    /// Picks up an existing attempt, restoring its persisted snapshot.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session; `Validation` if the session
    /// belongs to another assessment; `TransientIo` if the registry or the
    /// snapshot store is unreachable.
    pub async fn resume(
        assessment: Arc<Assessment>,
        settings: &RuntimeSettings,
        deps: RuntimeDeps,
        session_id: &str,
    ) -> Result<RuntimeHandle> {
        let retry = RetryPolicy::from(settings);
        let record = retry
            .run("get_session", || deps.registry.get_session(session_id))
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => ExamError::session_not_found(session_id),
                other => port_error("get_session", other),
            })?;
        if record.assessment_id != assessment.id() {
            return Err(ExamError::validation(format!(
                "session {session_id} belongs to assessment {}, not {}",
                record.assessment_id,
                assessment.id()
            )));
        }
        info!(session_id, "session resuming");
        Self::start(assessment, settings, deps, record)
    }

    fn start(
        assessment: Arc<Assessment>,
        settings: &RuntimeSettings,
        deps: RuntimeDeps,
        record: SessionRecord,
    ) -> Result<RuntimeHandle> {
        let retry = RetryPolicy::from(settings);
        let mut store = SessionStateStore::load_from_persistence(
            Arc::clone(&deps.kv),
            Arc::clone(&assessment),
            SessionIdentity {
                session_id: record.session_id.clone(),
                candidate_id: record.candidate_id.clone(),
            },
            settings.max_answer_len,
        )?;

        let registry_completed = !record.status.is_in_progress();
        store.record_violation(record.violation_count);
        if registry_completed && !store.is_completed() {
            store.complete(
                record.disqualified,
                record.completed_at.unwrap_or_else(|| deps.clock.now()),
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = watch::channel(None);
        let shutdown = CancellationToken::new();
        let session_id = record.session_id.clone();
        let resumed = store.was_restored();

        let _ = deps.events.send(Event::SessionStarted {
            timestamp: deps.clock.now(),
            session_id: session_id.clone(),
            candidate_id: record.candidate_id.clone(),
            assessment_id: record.assessment_id.clone(),
            resumed,
        });
        spawn_record(
            Arc::clone(&deps.activity),
            ActivityEvent::Joined {
                session_id: session_id.clone(),
                resumed,
                at: deps.clock.now(),
            },
        );

        let liveness = LivenessReporter::new(
            Arc::clone(&deps.registry),
            Arc::clone(&deps.clock),
            settings.heartbeat_interval,
        );
        let mut actor = SessionActor {
            sequencer: PhaseSequencer::new(
                Arc::clone(&assessment),
                settings.tick_interval,
                Arc::new(CommandSink(tx.downgrade())),
            ),
            monitor: IntegrityMonitor::new(store.state().policy, assessment.escalate_after()),
            submission: SubmissionService::new(
                Arc::clone(&deps.items),
                Arc::clone(&deps.registry),
                retry,
            ),
            assessment,
            store,
            registry: Arc::clone(&deps.registry),
            activity: Arc::clone(&deps.activity),
            clock: Arc::clone(&deps.clock),
            retry,
            events: deps.events.clone(),
            settled: settled_tx,
            commands: tx.downgrade(),
            shutdown: shutdown.clone(),
            submit_reply: None,
        };
        actor.activate(registry_completed, record.current_phase_index)?;

        if !registry_completed {
            liveness.spawn(session_id.clone(), shutdown.child_token());
        }
        if let Some(source) = &deps.environment {
            forward_environment(source.as_ref(), tx.downgrade(), shutdown.child_token());
        }
        tokio::spawn(actor.run(rx));

        Ok(RuntimeHandle::new(
            session_id,
            tx,
            deps.events,
            settled_rx,
            liveness,
        ))
    }
}

/// Pumps host signals onto the actor queue until the runtime stops.
fn forward_environment(
    source: &dyn EnvironmentSource,
    commands: mpsc::WeakUnboundedSender<RuntimeCommand>,
    cancel: CancellationToken,
) {
    let mut signals = source.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = signals.recv() => match received {
                    Ok(signal) => {
                        let Some(tx) = commands.upgrade() else { break };
                        if tx.send(RuntimeCommand::Environment(signal)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "environment signals dropped; subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });
}
