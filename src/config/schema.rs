//! Configuration schema for assessment files.
//!
//! These are the raw, serde-facing shapes of the YAML file. They are turned
//! into the frozen [`Assessment`](crate::assessment::Assessment) and
//! [`RuntimeSettings`] only after validation succeeds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assessment::{ItemKind, PhaseKind, ViolationPolicy};

/// Root of an assessment file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssessmentFile {
    /// Phase and item layout
    pub assessment: AssessmentConfig,

    /// Runtime tuning; every field is optional
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// The `assessment:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssessmentConfig {
    /// Assessment identifier
    pub id: String,

    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Violation policy for sessions of this assessment
    #[serde(default)]
    pub policy: ViolationPolicy,

    /// Under `log`, disqualify once this many violations were counted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_after: Option<u32>,

    /// Ordered phases
    pub phases: Vec<PhaseConfig>,

    /// Item bank for this assessment
    #[serde(default)]
    pub items: Vec<ItemConfig>,
}

/// One entry of `assessment.phases`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Unique phase identifier
    pub id: String,

    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Scored or break
    #[serde(default = "default_phase_kind")]
    pub kind: PhaseKind,

    /// Countdown length, e.g. `"32m"` or `"90s"`
    pub duration: String,

    /// Item ids presented in this phase
    #[serde(default)]
    pub items: Vec<String>,
}

const fn default_phase_kind() -> PhaseKind {
    PhaseKind::Scored
}

/// One entry of `assessment.items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemConfig {
    /// Unique item identifier
    pub id: String,

    /// Presentation style
    #[serde(default = "default_item_kind")]
    pub kind: ItemKind,

    /// Accepted answers separated by `|`
    pub correct_answer: String,
}

const fn default_item_kind() -> ItemKind {
    ItemKind::MultipleChoice
}

/// The optional `runtime:` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Countdown tick interval (default `1s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_interval: Option<String>,

    /// Liveness heartbeat interval (default `30s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<String>,

    /// Longest accepted answer value in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_answer_len: Option<usize>,

    /// Collaborator retry tuning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

/// The `runtime.retry` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts per collaborator call, including the first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Delay before the first retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_backoff: Option<String>,

    /// Upper bound for the exponential backoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<String>,
}

/// Resolved runtime tuning with defaults and environment overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Countdown tick interval
    pub tick_interval: Duration,
    /// Liveness heartbeat interval
    pub heartbeat_interval: Duration,
    /// Longest accepted answer value in bytes
    pub max_answer_len: usize,
    /// Attempts per collaborator call
    pub retry_max_attempts: u32,
    /// Delay before the first retry
    pub retry_initial_backoff: Duration,
    /// Backoff ceiling
    pub retry_max_backoff: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            max_answer_len: 4096,
            retry_max_attempts: 3,
            retry_initial_backoff: Duration::from_millis(200),
            retry_max_backoff: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
assessment:
  id: practice-1
  policy: disqualify
  phases:
    - id: rw1
      duration: 32m
      items: [q1]
    - id: break
      kind: break
      duration: 10m
  items:
    - id: q1
      correct_answer: B
runtime:
  tick_interval: 1s
";

    #[test]
    fn parses_sample_file() {
        let file: AssessmentFile = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(file.assessment.id, "practice-1");
        assert_eq!(file.assessment.policy, ViolationPolicy::Disqualify);
        assert_eq!(file.assessment.phases.len(), 2);
        assert_eq!(file.assessment.phases[0].kind, PhaseKind::Scored);
        assert_eq!(file.assessment.phases[1].kind, PhaseKind::Break);
        assert_eq!(file.assessment.items[0].kind, ItemKind::MultipleChoice);
        assert_eq!(file.runtime.tick_interval.as_deref(), Some("1s"));
    }

    #[test]
    fn policy_defaults_to_log() {
        let yaml = "assessment:\n  id: a\n  phases: []\n";
        let file: AssessmentFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.assessment.policy, ViolationPolicy::Log);
        assert!(file.runtime.retry.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "assessment:\n  id: a\n  phases: []\n  colour: red\n";
        assert!(serde_yaml::from_str::<AssessmentFile>(yaml).is_err());
    }
}
