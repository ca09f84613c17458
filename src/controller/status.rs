//! Status management utilities.
//!
//! Conditions are kept as a list keyed by condition type. Writing a
//! condition upserts by type, so the history never grows past one entry
//! per type, and ordering is derived on read rather than stored.

use std::cmp::Reverse;

use crate::crd::{Condition, ConditionType, REASON_WAITING_POD};

/// Condition history with upsert-by-type semantics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConditionHistory {
    conditions: Vec<Condition>,
}

impl ConditionHistory {
    /// Start from the conditions persisted in a resource status
    pub fn from_conditions(conditions: Vec<Condition>) -> Self {
        let mut history = Self::default();
        for condition in conditions {
            history.upsert(condition);
        }
        history
    }

    /// Add or update a condition.
    ///
    /// An identical observation only refreshes `last_update_time`. A changed
    /// observation replaces the entry; `last_transition_time` moves only when
    /// the status flips.
    pub fn upsert(&mut self, condition: Condition) -> &mut Self {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            Some(existing) if existing.same_observation(&condition) => {
                existing.last_update_time = condition.last_update_time;
            }
            Some(existing) => {
                let transition = if existing.status == condition.status {
                    existing.last_transition_time.clone()
                } else {
                    condition.last_transition_time.clone()
                };
                *existing = Condition {
                    last_transition_time: transition,
                    ..condition
                };
            }
            None => self.conditions.push(condition),
        }
        self
    }

    /// Conditions, most recently updated first.
    pub fn sorted_by_recency(&self) -> Vec<&Condition> {
        let mut sorted: Vec<&Condition> = self.conditions.iter().collect();
        sorted.sort_by_key(|c| Reverse(c.updated_at()));
        sorted
    }

    /// The most recently updated condition
    pub fn latest(&self) -> Option<&Condition> {
        self.sorted_by_recency().into_iter().next()
    }

    /// Whether the newest condition says the resource is waiting for pods
    pub fn is_last_waiting_pod_ready(&self) -> bool {
        self.latest()
            .is_some_and(|c| c.reason == REASON_WAITING_POD)
    }

    pub fn set_creating(&mut self, message: &str) -> &mut Self {
        self.upsert(Condition::new(
            &ConditionType::Creating.to_string(),
            true,
            "Creating",
            message,
        ))
    }

    pub fn set_waiting_pod(&mut self, message: &str) -> &mut Self {
        self.upsert(Condition::new(
            &ConditionType::Scaling.to_string(),
            true,
            REASON_WAITING_POD,
            message,
        ))
    }

    pub fn set_healthy(&mut self, message: &str) -> &mut Self {
        self.upsert(Condition::new(
            &ConditionType::Healthy.to_string(),
            true,
            "Ready",
            message,
        ))
    }

    pub fn set_failed(&mut self, message: &str) -> &mut Self {
        self.upsert(Condition::new(
            &ConditionType::Failed.to_string(),
            true,
            "Error",
            message,
        ))
    }

    pub fn set_updating(&mut self, message: &str) -> &mut Self {
        self.upsert(Condition::new(
            &ConditionType::Updating.to_string(),
            true,
            "Updating",
            message,
        ))
    }

    pub fn as_slice(&self) -> &[Condition] {
        &self.conditions
    }

    /// The persisted form, most recent first
    pub fn into_sorted_vec(self) -> Vec<Condition> {
        let mut conditions = self.conditions;
        conditions.sort_by_key(|c| Reverse(c.updated_at()));
        conditions
    }
}
