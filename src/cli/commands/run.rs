//! `examwarden run`: drive one session from newline-delimited JSON on stdin.
//!
//! Each input line is one request, tagged by `op`:
//!
//! ```text
//! {"op":"answer","item":"q1","value":"B"}
//! {"op":"mark","item":"q1"}
//! {"op":"scratch","item":"q1","text":"recheck"}
//! {"op":"select","item":"q2"}
//! {"op":"finish","phase":0}
//! {"op":"signal","signal":{"kind":"focus_lost"}}
//! {"op":"violation","kind":"fullscreen_exit"}
//! {"op":"ack"}
//! {"op":"submit","answers":{"q4":"A"}}
//! {"op":"snapshot"} | {"op":"heartbeat"} | {"op":"quit"}
//! ```
//!
//! Session events and one `CommandResult` per request are written as JSONL
//! to stdout (or `--events`). The command returns once the submission has
//! settled, on `quit`, or on interrupt. Closing stdin does not stop the
//! clock; the session still runs to its end.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::args::RunArgs;
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigLoader;
use crate::error::{ExamError, ExamwardenError};
use crate::integrity::{ChannelEnvironmentSource, EnvironmentSignal};
use crate::observability::{Event, EventEmitter, init_metrics};
use crate::phase::AdvanceOutcome;
use crate::ports::{
    FileKvStore, KvSessionRegistry, KvStore, StaticItemRepository, TracingActivityLog,
};
use crate::runtime::{ExamRuntime, RuntimeDeps, RuntimeHandle};
use crate::session::model::ViolationKind;

/// Longest accepted input line in bytes.
const MAX_LINE_LEN: usize = 64 * 1024;

/// One line of driver input.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Answer {
        item: String,
        value: String,
    },
    Mark {
        item: String,
    },
    Scratch {
        item: String,
        #[serde(default)]
        text: String,
    },
    Select {
        #[serde(default)]
        item: Option<String>,
    },
    Finish {
        phase: usize,
        #[serde(default, rename = "override")]
        operator_override: bool,
    },
    Signal {
        signal: EnvironmentSignal,
    },
    Violation {
        kind: ViolationKind,
        #[serde(default)]
        detail: Option<String>,
    },
    Ack,
    Submit {
        #[serde(default)]
        answers: BTreeMap<String, String>,
    },
    Snapshot,
    Heartbeat,
    Quit,
}

impl Request {
    const fn op(&self) -> &'static str {
        match self {
            Self::Answer { .. } => "answer",
            Self::Mark { .. } => "mark",
            Self::Scratch { .. } => "scratch",
            Self::Select { .. } => "select",
            Self::Finish { .. } => "finish",
            Self::Signal { .. } => "signal",
            Self::Violation { .. } => "violation",
            Self::Ack => "ack",
            Self::Submit { .. } => "submit",
            Self::Snapshot => "snapshot",
            Self::Heartbeat => "heartbeat",
            Self::Quit => "quit",
        }
    }
}

/// Runs a session until it settles, the driver quits, or `cancel` fires.
///
/// # Errors
///
/// Returns a config error for an invalid assessment, an I/O error if the
/// store directory or events file cannot be opened, a session error if the
/// session cannot be joined or resumed or its submission failed for good,
/// and `PolicyViolation` if the candidate was disqualified.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), ExamwardenError> {
    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    info!(config = %args.config.display(), "loading assessment");
    let loaded = ConfigLoader::default().load(&args.config)?;
    for warning in &loaded.warnings {
        warn!(location = %warning.path, "{}", warning.message);
    }

    let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::open(&args.store_dir)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let environment = Arc::new(ChannelEnvironmentSource::default());
    let deps = RuntimeDeps::new(
        Arc::new(StaticItemRepository::new(Arc::clone(&loaded.assessment))),
        Arc::new(KvSessionRegistry::new(Arc::clone(&kv), Arc::clone(&clock))),
        Arc::new(TracingActivityLog),
        kv,
        clock,
    )
    .with_environment(environment.clone());

    let emitter = Arc::new(match &args.events {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stdout(),
    });
    let pump = tokio::spawn(pump_events(deps.subscribe(), Arc::clone(&emitter)));

    let handle = match (&args.session, &args.candidate) {
        (Some(session_id), _) => {
            ExamRuntime::resume(loaded.assessment, &loaded.settings, deps, session_id).await?
        }
        (None, Some(candidate_id)) => {
            ExamRuntime::join(loaded.assessment, &loaded.settings, deps, candidate_id).await?
        }
        (None, None) => {
            return Err(ExamError::validation("either --candidate or --session is required").into());
        }
    };
    info!(session_id = handle.session_id(), "session running");

    let settlement = drive(&handle, &environment, &emitter, &cancel).await;

    let last = handle.snapshot().await.ok();
    handle.shutdown().await;
    drop(handle);
    if pump.await.is_err() {
        warn!("event pump panicked");
    }

    if let Some(Err(e)) = settlement {
        return Err(e.into());
    }
    match last {
        Some(snapshot) if snapshot.disqualified => Err(ExamError::PolicyViolation {
            session_id: snapshot.session_id,
            violation_count: snapshot.violation_count,
        }
        .into()),
        _ => Ok(()),
    }
}

/// Reads requests until the session settles. Returns the settlement, or
/// `None` if the loop ended first.
async fn drive(
    handle: &RuntimeHandle,
    environment: &ChannelEnvironmentSource,
    emitter: &EventEmitter,
    cancel: &CancellationToken,
) -> Option<crate::error::Result<crate::grading::SubmissionOutcome>> {
    let mut lines = FramedRead::new(
        tokio::io::stdin(),
        LinesCodec::new_with_max_length(MAX_LINE_LEN),
    );
    let mut stdin_open = true;
    let settled = handle.settled();
    tokio::pin!(settled);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("interrupted; the session can be resumed");
                return None;
            }
            result = &mut settled => return Some(result),
            line = lines.next(), if stdin_open => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => {
                    if !handle_line(handle, environment, emitter, &line).await {
                        return None;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "unreadable input line");
                    emitter.emit(&failure("unknown", "invalid_request", &e.to_string()));
                }
                None => {
                    debug!("stdin closed; waiting for the session to end");
                    stdin_open = false;
                }
            },
        }
    }
}

/// Applies one request. Returns `false` when the driver asked to quit.
async fn handle_line(
    handle: &RuntimeHandle,
    environment: &ChannelEnvironmentSource,
    emitter: &EventEmitter,
    line: &str,
) -> bool {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            emitter.emit(&failure("unknown", "invalid_request", &e.to_string()));
            return true;
        }
    };
    let op = request.op();
    if matches!(request, Request::Quit) {
        emitter.emit(&Event::CommandResult {
            op: op.to_string(),
            ok: true,
            code: None,
            error: None,
            result: None,
        });
        return false;
    }

    let event = match apply(handle, environment, request).await {
        Ok(result) => Event::CommandResult {
            op: op.to_string(),
            ok: true,
            code: None,
            error: None,
            result,
        },
        Err(e) => {
            debug!(op, error = %e, "request rejected");
            failure(op, e.code(), &e.to_string())
        }
    };
    emitter.emit(&event);
    true
}

async fn apply(
    handle: &RuntimeHandle,
    environment: &ChannelEnvironmentSource,
    request: Request,
) -> crate::error::Result<Option<Value>> {
    let session_id = handle.session_id();
    let result = match request {
        Request::Answer { item, value } => {
            handle.upsert_answer(&item, &value).await?;
            None
        }
        Request::Mark { item } => Some(json!({ "marked": handle.toggle_mark(&item).await? })),
        Request::Scratch { item, text } => {
            handle.set_scratch(&item, &text).await?;
            None
        }
        Request::Select { item } => {
            handle.select_item(item.as_deref()).await?;
            None
        }
        Request::Finish {
            phase,
            operator_override,
        } => Some(match handle.finish(phase, operator_override).await? {
            AdvanceOutcome::Entered {
                index,
                remaining_seconds,
            } => json!({ "entered": index, "remaining_seconds": remaining_seconds }),
            AdvanceOutcome::Submitting { from } => json!({ "submitting_from": from }),
            AdvanceOutcome::Ignored => json!({ "ignored": true }),
        }),
        Request::Signal { signal } => {
            Some(json!({ "delivered": environment.publish(signal) > 0 }))
        }
        Request::Violation { kind, detail } => {
            let count = handle.report_violation(session_id, kind, detail).await?;
            Some(json!({ "violation_count": count }))
        }
        Request::Ack => Some(json!({ "dismissed": handle.acknowledge().await? })),
        Request::Submit { answers } => {
            let outcome = handle
                .submit(session_id, answers.into_iter().collect())
                .await?;
            Some(json!({ "outcome": outcome.as_label() }))
        }
        Request::Snapshot => serde_json::to_value(handle.snapshot().await?).ok(),
        Request::Heartbeat => Some(json!({ "alive": handle.heartbeat(session_id).await? })),
        Request::Quit => None,
    };
    Ok(result)
}

fn failure(op: &str, code: &str, message: &str) -> Event {
    Event::CommandResult {
        op: op.to_string(),
        ok: false,
        code: Some(code.to_string()),
        error: Some(message.to_string()),
        result: None,
    }
}

/// Copies runtime events to the emitter until the runtime stops.
async fn pump_events(
    mut events: tokio::sync::broadcast::Receiver<Event>,
    emitter: Arc<EventEmitter>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let stopped = matches!(event, Event::SessionStopped { .. });
                emitter.emit(&event);
                if stopped {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
