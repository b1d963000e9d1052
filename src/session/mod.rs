//! Session data model and the write-through state store.

pub mod model;
pub mod store;

pub use model::{
    Answer, CommitOutcome, GradedAnswer, Score, SessionPatch, SessionRecord, SessionSnapshot,
    SessionStatus, SubmissionCommit, ViolationAction, ViolationEvent, ViolationKind,
};
pub use store::{SessionIdentity, SessionStateStore, snapshot_key};
