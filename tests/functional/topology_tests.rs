//! Convergence from boot for several RedisFailover sizes.
//!
//! Each test starts from freshly booted pods (every node replicating from
//! the boot address), runs one pass and checks the resulting topology, then
//! runs a second pass that must find nothing to do.

use std::time::Duration;

use redis_operator::client::AuthConfig;
use redis_operator::controller::cluster_view::ClusterView;
use redis_operator::controller::failover_healer::{HealAction, quorum};
use redis_operator::controller::failover_inspector::TopologySnapshot;
use redis_operator::controller::failover_orchestrator::{HealOutcome, HealTuning, check_and_heal};
use redis_operator::controller::failover_state_machine::HealStage;

use crate::mock_state::{MockTopology, failover_spec, redis_ip, sentinel_ip};

pub fn fast_tuning() -> HealTuning {
    HealTuning {
        reset_poll_interval: Duration::from_millis(1),
        reset_poll_timeout: Duration::from_millis(50),
    }
}

const FULL_PATH: [HealStage; 8] = [
    HealStage::Validating,
    HealStage::WaitingPods,
    HealStage::WaitingSentinels,
    HealStage::Electing,
    HealStage::Repointing,
    HealStage::ConfigSyncing,
    HealStage::ArbiterSyncing,
    HealStage::Ready,
];

/// Boot `redis` data nodes and `sentinels` sentinels and converge them.
async fn converge_from_boot(redis: usize, sentinels: usize) {
    let topology = MockTopology::booting(redis, sentinels);
    let spec = failover_spec(redis as i32, sentinels as i32);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    let HealOutcome::Ready { master, report } = outcome else {
        panic!("expected Ready after converging {redis}/{sentinels}");
    };
    assert_eq!(master, redis_ip(0), "the oldest pod is elected");
    assert_eq!(report.stages, FULL_PATH);
    assert_eq!(topology.masters(), vec![redis_ip(0)]);
    for ordinal in 1..redis {
        assert!(topology.role(&redis_ip(ordinal)).follows(&master));
    }
    for ordinal in 0..sentinels {
        let view = topology.view(&sentinel_ip(ordinal));
        assert_eq!(view.monitored_master.as_deref(), Some(master.as_str()));
        assert_eq!(view.known_replicas, redis as i32 - 1);
        assert_eq!(view.known_sentinels, sentinels as i32);
    }

    let expected_quorum = quorum(sentinels as i32);
    let monitors: Vec<u32> = report
        .actions
        .iter()
        .filter_map(|a| match a {
            HealAction::ReconfigureMonitor { quorum, .. } => Some(*quorum),
            _ => None,
        })
        .collect();
    assert_eq!(monitors, vec![expected_quorum; sentinels]);

    topology.clear_commands();
    let second = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();
    assert!(!second.report().healed(), "second pass should be a no-op");
    assert!(topology.commands().is_empty());
}

#[tokio::test]
async fn test_minimal_topology_single_node() {
    let topology = MockTopology::booting(1, 1);
    let spec = failover_spec(1, 1);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    let HealOutcome::Ready { master, report } = outcome else {
        panic!("expected Ready");
    };
    assert_eq!(master, redis_ip(0));
    // A lone node is promoted without consulting start times
    assert_eq!(
        report.actions.first(),
        Some(&HealAction::Promote {
            node: redis_ip(0)
        })
    );
    assert_eq!(topology.view(&sentinel_ip(0)).known_replicas, 0);
}

#[tokio::test]
async fn test_standard_topology_3_redis_3_sentinels() {
    converge_from_boot(3, 3).await;
}

#[tokio::test]
async fn test_two_redis_three_sentinels() {
    converge_from_boot(2, 3).await;
}

#[tokio::test]
async fn test_high_availability_5_redis_5_sentinels() {
    converge_from_boot(5, 5).await;
}

#[tokio::test]
async fn test_fresh_topology_elects_oldest() {
    let topology = MockTopology::booting(3, 3);
    // redis-2 started first
    topology.set_start_minute(&redis_ip(0), 20);
    topology.set_start_minute(&redis_ip(1), 10);
    topology.set_start_minute(&redis_ip(2), 1);
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    let HealOutcome::Ready { master, report } = outcome else {
        panic!("expected Ready");
    };
    assert_eq!(master, redis_ip(2));
    assert_eq!(
        report.actions[..3],
        [
            HealAction::Promote {
                node: redis_ip(2)
            },
            HealAction::Repoint {
                node: redis_ip(1),
                master: redis_ip(2)
            },
            HealAction::Repoint {
                node: redis_ip(0),
                master: redis_ip(2)
            },
        ]
    );
    assert_eq!(topology.masters(), vec![redis_ip(2)]);
}

#[tokio::test]
async fn test_healthy_topology_takes_no_action() {
    let topology = MockTopology::healthy(3, 3);
    let spec = failover_spec(3, 3);

    let outcome = check_and_heal(&spec, &topology, &topology, &AuthConfig::none(), &fast_tuning())
        .await
        .unwrap();

    assert!(matches!(outcome, HealOutcome::Ready { ref master, .. } if *master == redis_ip(0)));
    assert_eq!(outcome.report().stages, FULL_PATH);
    assert_eq!(outcome.stage(), HealStage::Ready);
    assert!(outcome.report().actions.is_empty());
    assert!(topology.commands().is_empty());
}

#[tokio::test]
async fn test_snapshot_holds_every_sentinel_view() {
    let topology = MockTopology::booting(3, 3);
    let auth = AuthConfig::none();
    let pods = topology.redis_pods().await.unwrap();

    let snapshot = TopologySnapshot::observe(&topology, &topology, pods, &auth)
        .await
        .unwrap();
    assert!(snapshot.masters().is_empty());
    let ips: Vec<&str> = snapshot
        .arbiter_views
        .iter()
        .map(|(ip, _)| ip.as_str())
        .collect();
    assert_eq!(ips, vec![sentinel_ip(0), sentinel_ip(1), sentinel_ip(2)]);
    let view = snapshot.arbiter_view(&sentinel_ip(1)).unwrap();
    assert_eq!(view.monitored_master.as_deref(), Some("127.0.0.1"));

    check_and_heal(&failover_spec(3, 3), &topology, &topology, &auth, &fast_tuning())
        .await
        .unwrap();
    let pods = topology.redis_pods().await.unwrap();
    let snapshot = TopologySnapshot::observe(&topology, &topology, pods, &auth)
        .await
        .unwrap();
    let master = snapshot.masters()[0].to_string();
    assert_eq!(snapshot.masters().len(), 1);
    for (_, view) in &snapshot.arbiter_views {
        assert_eq!(view.monitored_master.as_deref(), Some(master.as_str()));
    }
}
