//! Phase countdown and sequencing.

pub mod sequencer;
pub mod timer;

pub use sequencer::{
    AdvanceOutcome, AdvanceTrigger, PhaseSequencer, SequencerState, TimerEvent, TimerSignal,
    TimerSink,
};
pub use timer::CountdownTimer;
