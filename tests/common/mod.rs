//! Shared integration-test harness: in-process session wiring over in-memory
//! collaborators, plus helpers for driving the `examwarden` binary.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

use examwarden::assessment::Assessment;
use examwarden::clock::{Clock, ManualClock};
use examwarden::config::{ConfigLoader, RuntimeSettings};
use examwarden::integrity::ChannelEnvironmentSource;
use examwarden::observability::Event;
use examwarden::ports::{
    KvSessionRegistry, KvStore, MemoryActivityLog, MemoryKvStore, SessionRegistry,
    StaticItemRepository,
};
use examwarden::runtime::{ExamRuntime, RuntimeDeps, RuntimeHandle};
use serde_json::Value;
use tokio::sync::broadcast;

/// Returns the path to a test fixture.
#[must_use]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Collaborators that outlive any one runtime, so a session can be stopped
/// and resumed against the same state.
pub struct Harness {
    pub assessment: Arc<Assessment>,
    pub settings: RuntimeSettings,
    pub kv: Arc<MemoryKvStore>,
    pub registry: Arc<KvSessionRegistry>,
    pub activity: Arc<MemoryActivityLog>,
    pub clock: Arc<ManualClock>,
    pub environment: Arc<ChannelEnvironmentSource>,
}

impl Harness {
    /// Loads a fixture and wires fresh in-memory collaborators.
    #[allow(clippy::missing_panics_doc)]
    pub fn new(fixture: &str) -> Self {
        let loaded = ConfigLoader::default()
            .load(&fixture_path(fixture))
            .expect("fixture should load");
        let kv = Arc::new(MemoryKvStore::new());
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(KvSessionRegistry::new(
            Arc::clone(&kv) as Arc<dyn KvStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        Self {
            assessment: loaded.assessment,
            settings: loaded.settings,
            kv,
            registry,
            activity: Arc::new(MemoryActivityLog::new()),
            clock,
            environment: Arc::new(ChannelEnvironmentSource::default()),
        }
    }

    /// Dependencies for one runtime over the shared collaborators.
    #[must_use]
    pub fn deps(&self) -> RuntimeDeps {
        RuntimeDeps::new(
            Arc::new(StaticItemRepository::new(Arc::clone(&self.assessment))),
            Arc::clone(&self.registry) as Arc<dyn SessionRegistry>,
            Arc::clone(&self.activity) as _,
            Arc::clone(&self.kv) as Arc<dyn KvStore>,
            Arc::clone(&self.clock) as Arc<dyn Clock>,
        )
        .with_environment(Arc::clone(&self.environment) as _)
    }

    /// Joins a new session, returning the handle and an event receiver that
    /// saw the start-up events.
    #[allow(clippy::missing_panics_doc)]
    pub async fn join(&self, candidate_id: &str) -> (RuntimeHandle, broadcast::Receiver<Event>) {
        let deps = self.deps();
        let events = deps.subscribe();
        let handle = ExamRuntime::join(
            Arc::clone(&self.assessment),
            &self.settings,
            deps,
            candidate_id,
        )
        .await
        .expect("join should succeed");
        (handle, events)
    }

    /// Resumes an existing session.
    #[allow(clippy::missing_panics_doc)]
    pub async fn resume(&self, session_id: &str) -> (RuntimeHandle, broadcast::Receiver<Event>) {
        let deps = self.deps();
        let events = deps.subscribe();
        let handle = ExamRuntime::resume(
            Arc::clone(&self.assessment),
            &self.settings,
            deps,
            session_id,
        )
        .await
        .expect("resume should succeed");
        (handle, events)
    }
}

/// Receives events until `pred` matches, returning everything seen
/// including the match.
#[allow(clippy::missing_panics_doc)]
pub async fn events_until(
    rx: &mut broadcast::Receiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = rx.recv().await.expect("event stream closed early");
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Drains whatever is already buffered.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

/// Indices of every `PhaseEntered` event, in order.
#[must_use]
pub fn entered_phases(events: &[Event]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::PhaseEntered { phase_index, .. } => Some(*phase_index),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Binary helpers
// ============================================================================

/// Runs the binary with `args` and no stdin.
#[allow(clippy::missing_panics_doc)]
pub fn run_command(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_examwarden"))
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("failed to run examwarden")
}

/// Runs `examwarden run` against `config`, feeding `input` lines on stdin.
#[allow(clippy::missing_panics_doc)]
pub fn run_session(config: &Path, store_dir: &Path, extra: &[&str], input: &[Value]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_examwarden"))
        .arg("--quiet")
        .arg("run")
        .arg("--config")
        .arg(config)
        .arg("--store-dir")
        .arg(store_dir)
        .args(extra)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn examwarden");

    {
        let mut stdin = child.stdin.take().expect("stdin not captured");
        for line in input {
            writeln!(stdin, "{line}").expect("failed to write request");
        }
    }

    child.wait_with_output().expect("failed to wait for examwarden")
}

/// Parses JSONL output into values, skipping blank lines.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn parse_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l).unwrap_or_else(|e| panic!("invalid JSON line: {e}\n{l}"))
        })
        .collect()
}

/// Events of the given `type`.
#[must_use]
pub fn of_type<'a>(events: &'a [Value], ty: &str) -> Vec<&'a Value> {
    events
        .iter()
        .filter(|e| e.get("type").and_then(Value::as_str) == Some(ty))
        .collect()
}
