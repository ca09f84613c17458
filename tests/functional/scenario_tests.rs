//! Failure and drift scenarios for the RedisFailover check/heal pass.
//!
//! Each test damages a converged topology in one specific way and checks
//! which corrective commands the pass issues, or that it refuses to act.

use std::time::Duration;

use redis_operator::client::{ArbiterView, AuthConfig, RoleInfo};
use redis_operator::controller::error::Error;
use redis_operator::controller::failover_healer::HealAction;
use redis_operator::controller::failover_orchestrator::{HealOutcome, HealTuning, check_and_heal};
use redis_operator::controller::failover_state_machine::HealStage;
use redis_operator::crd::FailoverPhase;

use crate::mock_state::{MockTopology, failover_spec, redis_ip, sentinel_ip, spec_with_config};
use crate::topology_tests::fast_tuning;

// ============================================================================
// Master election
// ============================================================================

#[tokio::test]
async fn test_split_brain_is_not_healed() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_role(&redis_ip(1), RoleInfo::master());
    let spec = failover_spec(3, 3);

    let err = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SplitBrain { masters: 2 }));
    assert!(err.is_retryable());
    assert!(topology.commands().is_empty(), "split-brain must not be touched");
    assert_eq!(topology.masters(), vec![redis_ip(0), redis_ip(1)]);
}

#[tokio::test]
async fn test_existing_master_is_kept() {
    let topology = MockTopology::healthy(3, 3);
    // redis-1 is the oldest but redis-0 already holds the master role
    topology.set_start_minute(&redis_ip(1), 0);
    topology.set_start_minute(&redis_ip(0), 30);
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert!(matches!(outcome, HealOutcome::Ready { ref master, .. } if *master == redis_ip(0)));
    assert!(!outcome.report().healed());
}

#[tokio::test]
async fn test_stray_replica_is_repointed() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_role(&redis_ip(2), RoleInfo::replica_of("10.0.0.99"));
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert!(topology.role(&redis_ip(2)).follows(&redis_ip(0)));
    assert!(outcome.report().actions.contains(&HealAction::Repoint {
        node: redis_ip(2),
        master: redis_ip(0),
    }));
    // Sentinels were already consistent with the real master
    assert!(
        !outcome
            .report()
            .actions
            .iter()
            .any(|a| matches!(a, HealAction::ReconfigureMonitor { .. }))
    );
}

// ============================================================================
// Waiting for pods
// ============================================================================

#[tokio::test]
async fn test_no_running_redis_pods_waits() {
    let topology = MockTopology::booting(3, 3);
    topology.stop_all_redis_pods();
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    let HealOutcome::Waiting { reason, report } = outcome else {
        panic!("expected Waiting");
    };
    assert_eq!(reason, "no running redis pods");
    assert_eq!(report.stages.last(), Some(&HealStage::WaitingPods));
    assert!(topology.commands().is_empty());
}

#[tokio::test]
async fn test_redis_count_mismatch_waits() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_redis_counts(3, 2);
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert_eq!(outcome.stage(), HealStage::WaitingPods);
    assert_eq!(outcome.stage().phase(), FailoverPhase::WaitingPodReady);
    let HealOutcome::Waiting { reason, .. } = outcome else {
        panic!("expected Waiting");
    };
    assert_eq!(reason, "waiting all of redis pods become ready: 2/3");
    assert!(topology.commands().is_empty());
}

#[tokio::test]
async fn test_unreadable_workload_counts_wait() {
    let topology = MockTopology::healthy(3, 3);
    topology.make_counts_unreadable();
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert_eq!(outcome.stage().phase(), FailoverPhase::WaitingPodReady);
    let HealOutcome::Waiting { reason, report } = outcome else {
        panic!("expected Waiting");
    };
    assert!(
        reason.contains("apiserver unavailable"),
        "unexpected reason: {reason}"
    );
    assert!(!report.stages.contains(&HealStage::Failed));
    assert!(topology.commands().is_empty());
}

#[tokio::test]
async fn test_sentinel_scale_in_progress_waits() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_sentinel_counts(5, 3);
    let spec = failover_spec(3, 5);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    let HealOutcome::Waiting { reason, report } = outcome else {
        panic!("expected Waiting");
    };
    assert!(reason.contains("sentinel"), "unexpected reason: {reason}");
    assert_eq!(report.stages.last(), Some(&HealStage::WaitingSentinels));
}

// ============================================================================
// Redis configuration
// ============================================================================

#[tokio::test]
async fn test_memory_units_do_not_count_as_drift() {
    let topology = MockTopology::healthy(3, 3);
    for ordinal in 0..3 {
        topology.set_live_config(&redis_ip(ordinal), "maxmemory", "104857600");
    }
    let spec = spec_with_config(3, 3, &[("maxmemory", "100mb")]);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert!(!outcome.report().healed());
    assert!(topology.commands().is_empty());
}

#[tokio::test]
async fn test_mixed_case_config_keys_converge() {
    let topology = MockTopology::healthy(3, 3);
    let spec = spec_with_config(3, 3, &[("MaxMemory", "100mb")]);

    let first = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();
    assert!(matches!(first, HealOutcome::Ready { .. }));
    assert!(first.report().healed());

    let commands = topology.commands().len();
    let second = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();
    assert!(matches!(second, HealOutcome::Ready { .. }));
    assert!(!second.report().healed());
    assert_eq!(topology.commands().len(), commands);
}

#[tokio::test]
async fn test_config_drift_is_pushed() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_live_config(&redis_ip(1), "maxmemory-policy", "noeviction");
    let spec = spec_with_config(
        3,
        3,
        &[("maxmemory", "100mb"), ("maxmemory-policy", "allkeys-lru")],
    );

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    let pushed: Vec<&HealAction> = outcome
        .report()
        .actions
        .iter()
        .filter(|a| matches!(a, HealAction::PushConfig { .. }))
        .collect();
    assert_eq!(pushed.len(), 3);
    assert_eq!(
        pushed[1],
        &HealAction::PushConfig {
            node: redis_ip(1),
            keys: 2
        }
    );

    topology.clear_commands();
    let second = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();
    assert!(!second.report().healed());
}

#[tokio::test]
async fn test_password_is_pushed_with_overrides() {
    let topology = MockTopology::healthy(1, 1);
    let spec = spec_with_config(1, 1, &[("hz", "20")]);
    let auth = AuthConfig::with_password("s3cret");

    let outcome = check_and_heal(&spec, &topology, &topology, &auth, &fast_tuning())
        .await
        .unwrap();

    assert_eq!(
        outcome.report().actions,
        vec![HealAction::PushConfig {
            node: redis_ip(0),
            keys: 3
        }]
    );
    let commands = topology.commands();
    assert!(commands.iter().any(|c| c.ends_with("CONFIG SET masterauth")));
    assert!(commands.iter().any(|c| c.ends_with("CONFIG SET requirepass")));
}

// ============================================================================
// Sentinels
// ============================================================================

#[tokio::test]
async fn test_stale_monitor_is_reconfigured() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_view(
        &sentinel_ip(1),
        ArbiterView {
            monitored_master: Some("10.0.0.5".to_string()),
            known_replicas: 2,
            known_sentinels: 3,
        },
    );
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert_eq!(
        outcome.report().actions,
        vec![
            HealAction::ReconfigureMonitor {
                arbiter: sentinel_ip(1),
                master: redis_ip(0),
                quorum: 2,
            },
            // Fresh registration forgets replicas and peers
            HealAction::ResetView {
                arbiter: sentinel_ip(1)
            },
        ]
    );
    let view = topology.view(&sentinel_ip(1));
    assert_eq!(view.monitored_master, Some(redis_ip(0)));
    assert_eq!(view.known_replicas, 2);
    assert_eq!(view.known_sentinels, 3);
}

#[tokio::test]
async fn test_quorum_for_five_sentinels() {
    let topology = MockTopology::healthy(3, 5);
    topology.set_view(
        &sentinel_ip(4),
        ArbiterView {
            monitored_master: None,
            known_replicas: 0,
            known_sentinels: 1,
        },
    );
    let spec = failover_spec(3, 5);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert!(outcome.report().actions.contains(&HealAction::ReconfigureMonitor {
        arbiter: sentinel_ip(4),
        master: redis_ip(0),
        quorum: 3,
    }));
    let monitor = format!(
        "{} SENTINEL MONITOR mymaster {} 6379 3",
        sentinel_ip(4),
        redis_ip(0)
    );
    assert!(topology.commands().contains(&monitor));
}

#[tokio::test]
async fn test_missing_peers_trigger_reset_only() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_view(
        &sentinel_ip(0),
        ArbiterView {
            monitored_master: Some(redis_ip(0)),
            known_replicas: 2,
            known_sentinels: 1,
        },
    );
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert_eq!(
        outcome.report().actions,
        vec![HealAction::ResetView {
            arbiter: sentinel_ip(0)
        }]
    );
}

#[tokio::test]
async fn test_sentinel_custom_config_is_pushed() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_sentinel_config(&sentinel_ip(0), "down-after-milliseconds", "5000");
    let mut spec = failover_spec(3, 3);
    spec.sentinel
        .custom_config
        .insert("down-after-milliseconds".to_string(), "3000".to_string());

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    let pushed = outcome
        .report()
        .actions
        .iter()
        .filter(|a| matches!(a, HealAction::PushArbiterConfig { .. }))
        .count();
    assert_eq!(pushed, 3);
    assert!(topology.commands().contains(&format!(
        "{} SENTINEL SET mymaster down-after-milliseconds 3000",
        sentinel_ip(0)
    )));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_replica_view_times_out() {
    let topology = MockTopology::healthy(3, 3);
    topology.set_view(
        &sentinel_ip(2),
        ArbiterView {
            monitored_master: Some(redis_ip(0)),
            known_replicas: 0,
            known_sentinels: 3,
        },
    );
    topology.stick_sentinel(&sentinel_ip(2));
    let spec = failover_spec(3, 3);

    let err = check_and_heal(
        &spec,
        &topology,
        &topology,
        &AuthConfig::none(),
        &HealTuning::default(),
    )
    .await
    .unwrap_err();

    match err {
        Error::Timeout { duration, .. } => assert_eq!(duration, Duration::from_secs(30)),
        other => panic!("expected Timeout, got {other:?}"),
    }
}

// ============================================================================
// Credentials
// ============================================================================

#[tokio::test]
async fn test_credentials_reach_every_node() {
    let topology = MockTopology::booting(3, 3);
    topology.require_password("s3cret");
    let spec = failover_spec(3, 3);
    let auth = AuthConfig::with_password("s3cret");

    let outcome = check_and_heal(&spec, &topology, &topology, &auth, &fast_tuning())
        .await
        .unwrap();

    assert!(matches!(outcome, HealOutcome::Ready { .. }));
    assert!(
        topology.refused().is_empty(),
        "refused: {:?}",
        topology.refused()
    );
    let commands = topology.commands();
    assert!(commands.iter().any(|c| c.ends_with("SENTINEL RESET *")));
    assert!(commands.iter().any(|c| c.contains("SENTINEL MONITOR")));
}

#[tokio::test]
async fn test_wrong_credentials_fail_the_pass() {
    let topology = MockTopology::healthy(3, 3);
    topology.require_password("s3cret");
    let spec = failover_spec(3, 3);

    let err = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap_err();

    assert!(
        err.to_string().contains("WRONGPASS"),
        "unexpected error: {err}"
    );
    assert_eq!(topology.refused(), vec![redis_ip(0)]);
}

// ============================================================================
// Unreachable nodes
// ============================================================================

#[tokio::test]
async fn test_unreachable_node_fails_the_pass() {
    let topology = MockTopology::healthy(3, 3);
    topology.make_unreachable(&redis_ip(1));
    let spec = failover_spec(3, 3);

    let err = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::Unreachable { ref node, .. } if *node == redis_ip(1)),
        "unexpected error: {err:?}"
    );
    assert!(err.is_retryable());
    assert!(topology.commands().is_empty());
}
