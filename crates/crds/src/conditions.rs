//! Status conditions
//!
//! `Condition` mirrors meta/v1 `Condition`. A list of conditions is a map keyed
//! by `type`: at most one entry per type, updated in place.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition status following Kubernetes conventions
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => f.write_str("True"),
            ConditionStatus::False => f.write_str("False"),
            ConditionStatus::Unknown => f.write_str("Unknown"),
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A typed observation of one aspect of a resource's state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within a conditions list
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// `metadata.generation` the condition was set from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the status changed
    pub last_transition_time: DateTime<Utc>,

    /// Programmatic identifier for the last transition (CamelCase)
    pub reason: String,

    /// Human-readable detail about the transition
    #[serde(default)]
    pub message: String,
}

impl Condition {
    /// Create a condition with the current time as transition time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            observed_generation: None,
            last_transition_time: Utc::now(),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }

    /// Set the transition time and return self for chaining
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.last_transition_time = time;
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Upsert `condition` into `conditions` keyed by `type`
///
/// An existing entry of the same type is replaced in place, so the position of
/// every entry is preserved; otherwise the condition is appended. When the
/// status is unchanged the existing `lastTransitionTime` is kept. Returns
/// whether the list changed.
pub fn merge_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            let mut incoming = condition;
            if existing.status == incoming.status {
                incoming.last_transition_time = existing.last_transition_time;
            }
            if *existing == incoming {
                return false;
            }
            *existing = incoming;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Look up a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether the condition of the given type exists and is `True`
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(Condition::is_true)
}

/// Remove the condition of the given type, returning whether one was removed
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != before
}
