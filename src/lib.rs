//! `Examwarden` - proctored, timed multi-phase assessment sessions
//!
//! A session runs an assessment's phases on a countdown, persists the
//! candidate's answers after every change, watches the host environment for
//! integrity violations, and grades and commits the attempt exactly once.
//! [`runtime::ExamRuntime`] is the entry point.

pub mod assessment;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod grading;
pub mod integrity;
pub mod liveness;
pub mod observability;
pub mod phase;
pub mod ports;
pub mod runtime;
pub mod session;
