//! Assessment file validation.
//!
//! Validation runs on the deserialized [`AssessmentFile`] and collects every
//! problem it finds instead of stopping at the first one, so an author gets
//! the full list in a single `examwarden validate` run.

use std::collections::{HashMap, HashSet};

use crate::assessment::{PhaseKind, ViolationPolicy};
use crate::config::loader::{ConfigLimits, parse_duration};
use crate::config::schema::{AssessmentConfig, AssessmentFile, ItemConfig, RuntimeConfig};
use crate::error::{Severity, ValidationIssue};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Assessment file validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a file and returns every error and warning found.
    pub fn validate(&mut self, file: &AssessmentFile, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_metadata(&file.assessment);
        let item_ids = self.validate_items(&file.assessment.items);
        self.validate_phases(&file.assessment, &item_ids);
        self.validate_runtime(&file.runtime);
        self.validate_limits(&file.assessment, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    fn validate_metadata(&mut self, assessment: &AssessmentConfig) {
        if assessment.id.trim().is_empty() {
            self.add_error("assessment.id", "Assessment id is required and cannot be empty");
        }

        match (assessment.policy, assessment.escalate_after) {
            (_, Some(0)) => {
                self.add_error("assessment.escalate_after", "escalate_after must be at least 1");
            }
            (ViolationPolicy::Disqualify, Some(_)) => self.add_warning(
                "assessment.escalate_after",
                "escalate_after has no effect under the disqualify policy",
            ),
            _ => {}
        }
    }

    /// Returns the set of well-formed item ids for cross-referencing.
    fn validate_items(&mut self, items: &[ItemConfig]) -> HashSet<String> {
        let mut seen = HashSet::new();

        for (i, item) in items.iter().enumerate() {
            let path = format!("assessment.items[{i}]");

            if item.id.trim().is_empty() {
                self.add_error(&format!("{path}.id"), "Item id cannot be empty");
                continue;
            }
            if !seen.insert(item.id.clone()) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("Duplicate item id '{}'", item.id),
                );
            }

            let has_alternative = item
                .correct_answer
                .split('|')
                .any(|alt| !alt.trim().is_empty());
            if !has_alternative {
                self.add_error(
                    &format!("{path}.correct_answer"),
                    &format!("Item '{}' has no accepted answer", item.id),
                );
            }
        }

        seen
    }

    fn validate_phases(&mut self, assessment: &AssessmentConfig, item_ids: &HashSet<String>) {
        let phases = &assessment.phases;

        if phases.is_empty() {
            self.add_error("assessment.phases", "At least one phase is required");
            return;
        }
        if !phases.iter().any(|p| p.kind == PhaseKind::Scored) {
            self.add_error("assessment.phases", "At least one scored phase is required");
        }

        let mut phase_ids = HashSet::new();
        let mut placed: HashMap<&str, usize> = HashMap::new();

        for (i, phase) in phases.iter().enumerate() {
            let path = format!("assessment.phases[{i}]");

            if phase.id.trim().is_empty() {
                self.add_error(&format!("{path}.id"), "Phase id cannot be empty");
            } else if !phase_ids.insert(phase.id.as_str()) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("Duplicate phase id '{}'", phase.id),
                );
            }

            match parse_duration(&phase.duration) {
                Ok(d) if d.as_secs() == 0 => {
                    self.add_error(
                        &format!("{path}.duration"),
                        "Phase duration must be at least one second",
                    );
                }
                Ok(d) if d.subsec_nanos() != 0 => self.add_warning(
                    &format!("{path}.duration"),
                    "Sub-second part of the duration is ignored",
                ),
                Ok(_) => {}
                Err(e) => self.add_error(&format!("{path}.duration"), &e.to_string()),
            }

            match phase.kind {
                PhaseKind::Break if !phase.items.is_empty() => {
                    self.add_error(&format!("{path}.items"), "Break phases cannot contain items");
                }
                PhaseKind::Scored if phase.items.is_empty() => {
                    self.add_warning(&format!("{path}.items"), "Scored phase has no items");
                }
                _ => {}
            }

            for (j, item_id) in phase.items.iter().enumerate() {
                let item_path = format!("{path}.items[{j}]");
                if !item_ids.contains(item_id) {
                    let hint = suggest(item_id, item_ids)
                        .map(|s| format!(" (did you mean '{s}'?)"))
                        .unwrap_or_default();
                    self.add_error(&item_path, &format!("Unknown item '{item_id}'{hint}"));
                } else if let Some(previous) = placed.insert(item_id.as_str(), i) {
                    self.add_error(
                        &item_path,
                        &format!("Item '{item_id}' already appears in phase {previous}"),
                    );
                }
            }
        }

        for item in &assessment.items {
            if !placed.contains_key(item.id.as_str()) {
                self.add_warning(
                    "assessment.items",
                    &format!("Item '{}' is not used by any phase", item.id),
                );
            }
        }
    }

    fn validate_runtime(&mut self, runtime: &RuntimeConfig) {
        let durations = [
            ("runtime.tick_interval", runtime.tick_interval.as_deref()),
            ("runtime.heartbeat_interval", runtime.heartbeat_interval.as_deref()),
            (
                "runtime.retry.initial_backoff",
                runtime.retry.as_ref().and_then(|r| r.initial_backoff.as_deref()),
            ),
            (
                "runtime.retry.max_backoff",
                runtime.retry.as_ref().and_then(|r| r.max_backoff.as_deref()),
            ),
        ];

        for (path, value) in durations {
            let Some(value) = value else { continue };
            match parse_duration(value) {
                Ok(d) if d.is_zero() => self.add_error(path, "Interval must be positive"),
                Ok(_) => {}
                Err(e) => self.add_error(path, &e.to_string()),
            }
        }

        if runtime.max_answer_len == Some(0) {
            self.add_error("runtime.max_answer_len", "max_answer_len must be positive");
        }
        if runtime.retry.as_ref().and_then(|r| r.max_attempts) == Some(0) {
            self.add_error("runtime.retry.max_attempts", "max_attempts must be at least 1");
        }
    }

    fn validate_limits(&mut self, assessment: &AssessmentConfig, limits: &ConfigLimits) {
        if assessment.phases.len() > limits.max_phases {
            self.add_error(
                "assessment.phases",
                &format!(
                    "Too many phases: {} (limit {})",
                    assessment.phases.len(),
                    limits.max_phases
                ),
            );
        }
        if assessment.items.len() > limits.max_items {
            self.add_error(
                "assessment.items",
                &format!(
                    "Too many items: {} (limit {})",
                    assessment.items.len(),
                    limits.max_items
                ),
            );
        }
    }

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

/// Closest known id within edit distance 2.
fn suggest<'a>(input: &str, known: &'a HashSet<String>) -> Option<&'a str> {
    known
        .iter()
        .map(|id| (id.as_str(), strsim::damerau_levenshtein(input, id)))
        .filter(|(_, dist)| *dist <= 2)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(id, _)| id)
}
