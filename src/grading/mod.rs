//! Grading against answer keys and the terminal submission path.

pub mod retry;
pub mod scoring;
pub mod submission;

pub use retry::RetryPolicy;
pub use scoring::{grade, is_correct};
pub use submission::{SubmissionInput, SubmissionOutcome, SubmissionService};
