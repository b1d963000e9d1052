//! Structured session event stream.
//!
//! The runtime broadcasts [`Event`]s to whoever renders the test surface.
//! [`EventEmitter`] writes them as newline-delimited JSON with a
//! monotonically increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::assessment::PhaseKind;
use crate::session::model::{Score, ViolationKind};

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted while a session runs.
///
/// Serialized with a `"type"` tag so consumers can dispatch on the kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The runtime has started or resumed a session.
    SessionStarted {
        /// When the runtime started.
        timestamp: DateTime<Utc>,
        /// Session id.
        session_id: String,
        /// Candidate id.
        candidate_id: String,
        /// Assessment id.
        assessment_id: String,
        /// Whether a persisted snapshot was restored.
        resumed: bool,
    },

    /// A phase became active.
    PhaseEntered {
        /// When the phase started.
        timestamp: DateTime<Utc>,
        /// Zero-based index of the phase.
        phase_index: usize,
        /// Configured phase id.
        phase_id: String,
        /// Scored or break.
        kind: PhaseKind,
        /// Countdown start value.
        remaining_seconds: u64,
    },

    /// The countdown ticked.
    Tick {
        /// Active phase.
        phase_index: usize,
        /// Seconds left.
        remaining_seconds: u64,
    },

    /// A violation was counted under the log policy; the candidate must
    /// acknowledge the warning.
    ViolationWarning {
        /// When it was detected.
        timestamp: DateTime<Utc>,
        /// What was detected.
        kind: ViolationKind,
        /// Running count.
        violation_count: u32,
    },

    /// The session was terminated by a violation. Not dismissible.
    Disqualified {
        /// When it was detected.
        timestamp: DateTime<Utc>,
        /// What was detected.
        kind: ViolationKind,
        /// Final count.
        violation_count: u32,
    },

    /// The session is completed locally and input is frozen.
    SessionCompleted {
        /// Local completion time.
        timestamp: DateTime<Utc>,
        /// Forced by a violation.
        disqualified: bool,
    },

    /// The submission was committed (or found already committed).
    SubmissionSettled {
        /// When it settled.
        timestamp: DateTime<Utc>,
        /// `"committed"` or `"already_completed"`.
        outcome: String,
        /// Score, when this call graded the session.
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<Score>,
    },

    /// The submission could not be committed yet; it keeps retrying.
    SubmissionFailed {
        /// When the attempt gave up.
        timestamp: DateTime<Utc>,
        /// Last error.
        error: String,
    },

    /// Reply to one line of driver input.
    CommandResult {
        /// Operation that was requested
        op: String,
        /// Whether it succeeded
        ok: bool,
        /// Machine-readable error code
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Error message
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Operation result
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },

    /// The runtime stopped.
    SessionStopped {
        /// When it stopped.
        timestamp: DateTime<Utc>,
        /// Human-readable reason.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    sequence: u64,
    #[serde(flatten)]
    event: &'a Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are silently dropped: observability must
/// never disturb a running session.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

// Box<dyn Write> is not Debug.
impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that silently discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    ///
    /// Sequence numbers are taken under the writer lock, so they appear in
    /// output order even with concurrent emitters.
    pub fn emit(&self, event: &Event) {
        let Ok(mut w) = self.writer.lock() else {
            return;
        };
        let envelope = EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            event,
        };
        if let Ok(line) = serde_json::to_string(&envelope) {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    #[derive(Clone)]
    struct TestWriter(Arc<StdMutex<Vec<u8>>>);

    impl TestWriter {
        fn new() -> Self {
            Self(Arc::new(StdMutex::new(Vec::new())))
        }

        fn contents(&self) -> String {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        }
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn warning() -> Event {
        Event::ViolationWarning {
            timestamp: DateTime::parse_from_rfc3339("2026-03-14T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            kind: ViolationKind::FocusLost,
            violation_count: 2,
        }
    }

    #[test]
    fn emitter_writes_flat_jsonl() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(&warning());

        let parsed: serde_json::Value = serde_json::from_str(tw.contents().trim()).unwrap();
        assert_eq!(parsed["type"], "ViolationWarning");
        assert_eq!(parsed["kind"], "focus_lost");
        assert_eq!(parsed["violation_count"], 2);
        assert_eq!(parsed["sequence"], 0);
        assert!(parsed.get("event").is_none());
    }

    #[test]
    fn emitter_increments_sequence() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(&warning());
        emitter.emit(&Event::Tick {
            phase_index: 0,
            remaining_seconds: 4,
        });
        assert_eq!(emitter.event_count(), 2);

        let lines: Vec<serde_json::Value> = tw
            .contents()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["sequence"], 0);
        assert_eq!(lines[1]["sequence"], 1);
        assert_eq!(lines[1]["remaining_seconds"], 4);
    }

    #[test]
    fn settled_without_score_omits_field() {
        let json = serde_json::to_value(Event::SubmissionSettled {
            timestamp: Utc::now(),
            outcome: "already_completed".to_string(),
            score: None,
        })
        .unwrap();
        assert!(json.get("score").is_none());
    }
}
