//! Phase sequencing.
//!
//! [`PhaseSequencer`] owns the current phase index and the single running
//! [`CountdownTimer`]. Every activation bumps a generation counter that is
//! stamped on the timer's signals, so a tick or expiry from a phase that has
//! already been left is recognisable and can be dropped.
//!
//! `advance(from, ..)` is a compare-and-set on the index: of two calls from
//! the same phase, only the first has an effect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::assessment::Assessment;
use crate::error::{ExamError, Result};
use crate::observability::metrics;
use crate::phase::timer::CountdownTimer;

/// Where the sequencer is in the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Before activation
    Idle,
    /// Phase `i` is running
    InPhase(usize),
    /// Leaving phase `i` for terminal submission
    Transitioning(usize),
    /// Submission settled; nothing else happens
    Terminal,
}

impl SequencerState {
    /// Whether the sequencer has finished for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal)
    }
}

/// Why a phase is being left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceTrigger {
    /// The countdown reached zero
    Expired,
    /// The candidate pressed "finish"
    Finished,
    /// An operator forced the phase to end
    OperatorOverride,
}

impl AdvanceTrigger {
    const fn as_label(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Finished => "finished",
            Self::OperatorOverride => "operator_override",
        }
    }
}

/// Result of an [`advance`](PhaseSequencer::advance) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A new phase is running
    Entered {
        /// Index of the new phase
        index: usize,
        /// Its countdown start value
        remaining_seconds: u64,
    },
    /// No scored phase follows; terminal submission should start
    Submitting {
        /// The phase that was left
        from: usize,
    },
    /// The sequencer was not in the named phase; nothing happened
    Ignored,
}

/// Signal produced by the running countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSignal {
    /// Activation the countdown belongs to
    pub generation: u64,
    /// What happened
    pub event: TimerEvent,
}

/// Countdown event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// One second elapsed
    Tick {
        /// Seconds left
        remaining: u64,
    },
    /// Zero reached
    Expired,
}

/// Destination for countdown signals.
pub trait TimerSink: Send + Sync + std::fmt::Debug + 'static {
    /// Hands over one signal. Must not block.
    fn deliver(&self, signal: TimerSignal);
}

impl TimerSink for UnboundedSender<TimerSignal> {
    fn deliver(&self, signal: TimerSignal) {
        let _ = self.send(signal);
    }
}

/// Drives the ordered phase list of one attempt.
#[derive(Debug)]
pub struct PhaseSequencer {
    assessment: Arc<Assessment>,
    tick_interval: Duration,
    signals: Arc<dyn TimerSink>,
    state: SequencerState,
    generation: u64,
    timer: Option<CountdownTimer>,
}

impl PhaseSequencer {
    /// Creates an idle sequencer. Timer signals go to `signals`.
    #[must_use]
    pub fn new(
        assessment: Arc<Assessment>,
        tick_interval: Duration,
        signals: Arc<dyn TimerSink>,
    ) -> Self {
        Self {
            assessment,
            tick_interval,
            signals,
            state: SequencerState::Idle,
            generation: 0,
            timer: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SequencerState {
        self.state
    }

    /// Index of the running phase, if any.
    #[must_use]
    pub const fn current_index(&self) -> Option<usize> {
        match self.state {
            SequencerState::InPhase(i) => Some(i),
            _ => None,
        }
    }

    /// Whether a terminal submission is in flight.
    #[must_use]
    pub const fn is_transitioning(&self) -> bool {
        matches!(self.state, SequencerState::Transitioning(_))
    }

    /// Current activation generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a timer signal stamped with `generation` is still relevant.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && matches!(self.state, SequencerState::InPhase(_))
    }

    /// Starts phase `index` with `remaining_seconds` on the clock.
    ///
    /// Used for the first phase of a new attempt and for resuming a restored
    /// one mid-phase.
    ///
    /// # Errors
    ///
    /// `Validation` if the index does not name a phase or the sequencer has
    /// already been activated.
    pub fn activate(&mut self, index: usize, remaining_seconds: u64) -> Result<()> {
        if self.state != SequencerState::Idle {
            return Err(ExamError::validation("sequencer is already active"));
        }
        if self.assessment.phase(index).is_none() {
            return Err(ExamError::validation(format!(
                "phase index {index} is out of range"
            )));
        }
        self.state = SequencerState::InPhase(index);
        self.arm(remaining_seconds);
        info!(phase_index = index, remaining_seconds, "phase activated");
        Ok(())
    }

    /// Leaves phase `from`.
    ///
    /// # Errors
    ///
    /// `Validation` when a candidate tries to finish a break phase.
    pub fn advance(&mut self, from: usize, trigger: AdvanceTrigger) -> Result<AdvanceOutcome> {
        if self.state != SequencerState::InPhase(from) {
            debug!(from, ?trigger, state = ?self.state, "stale advance ignored");
            return Ok(AdvanceOutcome::Ignored);
        }
        let Some(phase) = self.assessment.phase(from) else {
            return Ok(AdvanceOutcome::Ignored);
        };
        if trigger == AdvanceTrigger::Finished && !phase.is_scored() {
            return Err(ExamError::validation(format!(
                "break phase {} cannot be finished early",
                phase.id
            )));
        }

        self.disarm();
        metrics::record_phase_transition(trigger.as_label());

        if self.assessment.is_final_phase(from) {
            self.state = SequencerState::Transitioning(from);
            info!(from, ?trigger, "final phase left; submitting");
            return Ok(AdvanceOutcome::Submitting { from });
        }

        let index = from + 1;
        let remaining_seconds = self
            .assessment
            .phase(index)
            .map_or(0, |p| p.duration_seconds);
        self.state = SequencerState::InPhase(index);
        self.arm(remaining_seconds);
        info!(from, to = index, ?trigger, "phase advanced");
        Ok(AdvanceOutcome::Entered {
            index,
            remaining_seconds,
        })
    }

    /// Stops the running phase for a submission that did not come from the
    /// countdown (explicit submit or disqualification).
    ///
    /// Returns the index of the phase that was running, or `None` if no
    /// phase was.
    pub fn begin_termination(&mut self) -> Option<usize> {
        let SequencerState::InPhase(index) = self.state else {
            return None;
        };
        self.disarm();
        self.state = SequencerState::Transitioning(index);
        Some(index)
    }

    /// Marks the terminal submission as settled.
    pub fn settle(&mut self) {
        self.disarm();
        self.state = SequencerState::Terminal;
    }

    /// Cancels the running countdown without leaving the phase.
    pub fn halt(&mut self) {
        self.disarm();
    }

    fn arm(&mut self, remaining_seconds: u64) {
        self.disarm();
        let generation = self.generation;
        let tick_tx = Arc::clone(&self.signals);
        let expire_tx = Arc::clone(&self.signals);
        self.timer = Some(CountdownTimer::start(
            remaining_seconds,
            self.tick_interval,
            move |remaining| {
                tick_tx.deliver(TimerSignal {
                    generation,
                    event: TimerEvent::Tick { remaining },
                });
            },
            move || {
                expire_tx.deliver(TimerSignal {
                    generation,
                    event: TimerEvent::Expired,
                });
            },
        ));
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.generation += 1;
    }
}
