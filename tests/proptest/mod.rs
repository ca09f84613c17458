// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for redis-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::{BTreeMap, HashMap};

use jiff::Timestamp;
use proptest::prelude::*;

use redis_operator::client::normalize_memory_value;
use redis_operator::controller::failover_checker::config_drift;
use redis_operator::controller::failover_healer::quorum;
use redis_operator::controller::failover_state_machine::{
    HealEvent, HealStage, HealStateMachine, TransitionResult,
};
use redis_operator::controller::status::ConditionHistory;
use redis_operator::crd::{Condition, FailoverPhase};
use redis_operator::resources::pdb::min_available;

/// Strategy for generating random stages.
fn any_stage() -> impl Strategy<Value = HealStage> {
    prop_oneof![
        Just(HealStage::Validating),
        Just(HealStage::WaitingPods),
        Just(HealStage::WaitingSentinels),
        Just(HealStage::Electing),
        Just(HealStage::Repointing),
        Just(HealStage::ConfigSyncing),
        Just(HealStage::ArbiterSyncing),
        Just(HealStage::Ready),
        Just(HealStage::Failed),
    ]
}

/// Strategy for generating random events.
fn any_event() -> impl Strategy<Value = HealEvent> {
    prop_oneof![
        Just(HealEvent::Passed),
        Just(HealEvent::StillWaiting),
        Just(HealEvent::Errored),
    ]
}

fn any_phase() -> impl Strategy<Value = FailoverPhase> {
    prop_oneof![
        Just(FailoverPhase::Creating),
        Just(FailoverPhase::Pending),
        Just(FailoverPhase::Fail),
        Just(FailoverPhase::Ready),
        Just(FailoverPhase::WaitingPodReady),
    ]
}

/// Condition types the operator writes
fn condition_type() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("Creating"),
        Just("Scaling"),
        Just("Healthy"),
        Just("Failed"),
        Just("Updating"),
    ]
}

proptest! {
    /// Property: quorum is a strict majority of the sentinels.
    #[test]
    fn test_quorum_is_strict_majority(sentinels in 1..=101i32) {
        let q = i32::try_from(quorum(sentinels)).unwrap();
        prop_assert!(2 * q > sentinels);
        prop_assert!(2 * (q - 1) <= sentinels);
    }

    /// Property: binary units multiply by powers of 1024, decimal by 1000.
    #[test]
    fn test_memory_units(n in 0..1_000_000i64) {
        prop_assert_eq!(normalize_memory_value(&n.to_string()).unwrap(), n.to_string());
        prop_assert_eq!(normalize_memory_value(&format!("{n}kb")).unwrap(), (n * 1024).to_string());
        prop_assert_eq!(normalize_memory_value(&format!("{n}MB")).unwrap(), (n * 1024 * 1024).to_string());
        prop_assert_eq!(normalize_memory_value(&format!("{n}k")).unwrap(), (n * 1000).to_string());
    }

    /// Property: a live config holding exactly the normalized declared
    /// values never drifts.
    #[test]
    fn test_normalized_config_has_no_drift(
        mb in 1..4096i64,
        policy in "(allkeys|volatile)-(lru|lfu|random)",
    ) {
        let declared: BTreeMap<String, String> = [
            ("maxmemory".to_string(), format!("{mb}mb")),
            ("maxmemory-policy".to_string(), policy.clone()),
        ]
        .into_iter()
        .collect();
        let live: HashMap<String, String> = [
            ("maxmemory".to_string(), (mb * 1024 * 1024).to_string()),
            ("maxmemory-policy".to_string(), policy),
        ]
        .into_iter()
        .collect();

        prop_assert!(config_drift(&declared, &live).is_empty());
    }

    /// Property: transition checks are deterministic.
    #[test]
    fn test_transitions_deterministic(stage in any_stage(), event in any_event()) {
        let sm = HealStateMachine::new();
        prop_assert_eq!(sm.transition(stage, event), sm.transition(stage, event));
    }

    /// Property: Ready and Failed end the pass; no event leaves them.
    #[test]
    fn test_terminal_stages(event in any_event()) {
        let sm = HealStateMachine::new();
        prop_assert!(!sm.can_transition(HealStage::Ready, event));
        prop_assert!(!sm.can_transition(HealStage::Failed, event));
    }

    /// Property: waiting stages never fail; they only wait or move on.
    #[test]
    fn test_waiting_stages_never_fail(stage in any_stage()) {
        let sm = HealStateMachine::new();
        if stage.is_waiting() {
            prop_assert!(!sm.can_transition(stage, HealEvent::Errored));
            prop_assert!(sm.can_transition(stage, HealEvent::StillWaiting));
        }
    }

    /// Property: random event sequences stay inside the table and stop at
    /// a terminal stage.
    #[test]
    fn test_random_walk_stops_at_terminal(events in prop::collection::vec(any_event(), 0..32)) {
        let sm = HealStateMachine::new();
        let mut stage = HealStage::Validating;
        for event in events {
            if stage.is_terminal() {
                break;
            }
            if let TransitionResult::Success { to, .. } = sm.transition(stage, event) {
                stage = to;
            }
        }
        prop_assert!(sm.valid_events(stage).is_empty() == stage.is_terminal());
    }

    /// Property: the history holds at most one condition per type.
    #[test]
    fn test_condition_history_one_per_type(
        updates in prop::collection::vec((condition_type(), any::<bool>(), 0..1000i64), 0..40)
    ) {
        let mut history = ConditionHistory::default();
        for (kind, status, second) in &updates {
            let at = Timestamp::from_second(1_700_000_000 + second).unwrap();
            history.upsert(Condition::new_at(kind, *status, "Reason", "message", at));
        }

        let mut types: Vec<&str> = history.as_slice().iter().map(|c| c.r#type.as_str()).collect();
        let total = types.len();
        types.sort_unstable();
        types.dedup();
        prop_assert_eq!(types.len(), total);
    }

    /// Property: a PDB never requires more pods than exist, and keeps two
    /// up once there are three or more.
    #[test]
    fn test_min_available(replicas in 1..=50i32) {
        let min = min_available(replicas);
        prop_assert!(min >= 1);
        prop_assert!(min <= replicas);
        if replicas >= 3 {
            prop_assert_eq!(min, 2);
        }
    }

    /// Property: phases serialize to their display name.
    #[test]
    fn test_phase_roundtrip(phase in any_phase()) {
        let serialized = serde_json::to_string(&phase).unwrap();
        prop_assert_eq!(&serialized, &format!("\"{phase}\""));
        let deserialized: FailoverPhase = serde_json::from_str(&serialized).unwrap();
        prop_assert_eq!(phase, deserialized);
    }
}
