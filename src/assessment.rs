//! Immutable assessment definition.
//!
//! An [`Assessment`] is built once from a validated configuration file and
//! shared behind an `Arc` by every component of a running session. Nothing in
//! this module changes after construction.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a phase holds graded items or is a timed break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Contains items that are graded on submission
    Scored,
    /// No items; auto-advances when the countdown expires
    Break,
}

/// Presentation style of an item. Grading treats both kinds the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Candidate picks one of the offered choices
    MultipleChoice,
    /// Candidate types a value
    FreeResponse,
}

/// How the integrity monitor reacts to a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    /// Count the violation and warn the candidate
    #[default]
    Log,
    /// End the session on the first violation
    Disqualify,
}

impl fmt::Display for ViolationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => write!(f, "log"),
            Self::Disqualify => write!(f, "disqualify"),
        }
    }
}

/// One timed segment of the assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Unique phase identifier
    pub id: String,
    /// Optional display title
    pub title: Option<String>,
    /// Scored or break
    pub kind: PhaseKind,
    /// Countdown length in whole seconds
    pub duration_seconds: u64,
    /// Items presented in this phase, in order
    pub item_ids: Vec<String>,
}

impl Phase {
    /// Whether this phase carries graded items.
    #[must_use]
    pub fn is_scored(&self) -> bool {
        self.kind == PhaseKind::Scored
    }
}

/// A single question with its answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique item identifier
    pub id: String,
    /// Presentation style
    pub kind: ItemKind,
    /// Stored answer key; alternatives separated by `|`
    pub correct_answer: String,
}

impl Item {
    /// Splits the stored key into its accepted alternatives.
    ///
    /// Each alternative is trimmed; empty alternatives (e.g. from a trailing
    /// `|`) are dropped.
    #[must_use]
    pub fn accepted_alternatives(&self) -> Vec<&str> {
        self.correct_answer
            .split('|')
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .collect()
    }
}

/// The frozen phase and item layout of one assessment.
#[derive(Debug, Clone)]
pub struct Assessment {
    id: String,
    title: Option<String>,
    policy: ViolationPolicy,
    escalate_after: Option<u32>,
    phases: Vec<Phase>,
    items: Vec<Item>,
    item_phase: HashMap<String, usize>,
}

impl Assessment {
    /// Builds an assessment from already-validated parts.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: Option<String>,
        policy: ViolationPolicy,
        escalate_after: Option<u32>,
        phases: Vec<Phase>,
        items: Vec<Item>,
    ) -> Self {
        let item_phase = phases
            .iter()
            .enumerate()
            .flat_map(|(index, phase)| phase.item_ids.iter().map(move |id| (id.clone(), index)))
            .collect();

        Self {
            id: id.into(),
            title,
            policy,
            escalate_after,
            phases,
            items,
            item_phase,
        }
    }

    /// Assessment identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display title, if configured.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Violation policy applied to new sessions.
    #[must_use]
    pub const fn policy(&self) -> ViolationPolicy {
        self.policy
    }

    /// Warning count at which a log-policy session is disqualified.
    #[must_use]
    pub const fn escalate_after(&self) -> Option<u32> {
        self.escalate_after
    }

    /// All phases in order.
    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Phase at `index`, if any.
    #[must_use]
    pub fn phase(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }

    /// All items in definition order.
    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Index of the phase that presents `item_id`.
    #[must_use]
    pub fn phase_of_item(&self, item_id: &str) -> Option<usize> {
        self.item_phase.get(item_id).copied()
    }

    /// Whether the item is part of this assessment.
    #[must_use]
    pub fn contains_item(&self, item_id: &str) -> bool {
        self.item_phase.contains_key(item_id)
    }

    /// Index of the last scored phase. Anything after it is never entered.
    #[must_use]
    pub fn last_scored_index(&self) -> Option<usize> {
        self.phases.iter().rposition(Phase::is_scored)
    }

    /// Whether advancing out of `index` ends the attempt.
    #[must_use]
    pub fn is_final_phase(&self, index: usize) -> bool {
        self.last_scored_index().is_none_or(|last| index >= last)
    }
}
