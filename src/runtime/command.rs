//! Messages processed by the session actor.

use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::grading::{SubmissionInput, SubmissionOutcome};
use crate::integrity::EnvironmentSignal;
use crate::phase::{AdvanceOutcome, TimerSignal, TimerSink};
use crate::session::model::{SessionSnapshot, ViolationKind};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Everything that can happen to a running session, in delivery order.
#[derive(Debug)]
pub(crate) enum RuntimeCommand {
    UpsertAnswer {
        item_id: String,
        value: String,
        reply: Reply<()>,
    },
    ToggleMark {
        item_id: String,
        reply: Reply<bool>,
    },
    SetScratch {
        item_id: String,
        text: String,
        reply: Reply<()>,
    },
    SelectItem {
        item_id: Option<String>,
        reply: Reply<()>,
    },
    Finish {
        phase_index: usize,
        operator_override: bool,
        reply: Reply<AdvanceOutcome>,
    },
    Acknowledge {
        reply: Reply<bool>,
    },
    Violation {
        session_id: String,
        kind: ViolationKind,
        detail: Option<String>,
        reply: Reply<u32>,
    },
    Environment(EnvironmentSignal),
    Submit {
        session_id: String,
        answers: Vec<(String, String)>,
        reply: Reply<SubmissionOutcome>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Timer(TimerSignal),
    Settled {
        result: Result<SubmissionOutcome>,
        input: SubmissionInput,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Routes countdown signals onto the actor's queue without keeping it open.
#[derive(Debug)]
pub(crate) struct CommandSink(pub(crate) mpsc::WeakUnboundedSender<RuntimeCommand>);

impl TimerSink for CommandSink {
    fn deliver(&self, signal: TimerSignal) {
        if let Some(tx) = self.0.upgrade() {
            let _ = tx.send(RuntimeCommand::Timer(signal));
        }
    }
}
