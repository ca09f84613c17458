//! Repeating a corrective action on a topology it already fixed changes
//! nothing and does not fail.

use std::collections::BTreeMap;

use redis_operator::client::AuthConfig;
use redis_operator::controller::cluster_view::ClusterView;
use redis_operator::controller::failover_healer::{
    elect_oldest_as_master, promote_to_master, push_arbiter_config, push_custom_config,
    reconfigure_arbiter_monitor, repoint_all_to_master, reset_arbiter_view,
};

use crate::mock_state::{MockTopology, redis_ip, sentinel_ip};

#[tokio::test]
async fn test_promote_twice() {
    let topology = MockTopology::healthy(3, 3);
    let auth = AuthConfig::none();
    let before = topology.snapshot();

    promote_to_master(&topology, &redis_ip(0), &auth).await.unwrap();
    promote_to_master(&topology, &redis_ip(0), &auth).await.unwrap();

    assert_eq!(topology.snapshot(), before);
    assert_eq!(topology.masters(), vec![redis_ip(0)]);
}

#[tokio::test]
async fn test_elect_and_repoint_twice() {
    let topology = MockTopology::booting(3, 3);
    let auth = AuthConfig::none();
    let pods = topology.redis_pods().await.unwrap();

    let (master, _) = elect_oldest_as_master(&topology, &pods, &auth).await.unwrap();
    let converged = topology.snapshot();

    let (again, _) = elect_oldest_as_master(&topology, &pods, &auth).await.unwrap();
    assert_eq!(again, master);
    repoint_all_to_master(&topology, &master, &pods, &auth)
        .await
        .unwrap();
    assert_eq!(topology.snapshot(), converged);
}

#[tokio::test]
async fn test_monitor_and_reset_twice() {
    let topology = MockTopology::healthy(3, 3);
    let auth = AuthConfig::none();
    let healthy = topology.view(&sentinel_ip(0));

    for _ in 0..2 {
        reconfigure_arbiter_monitor(&topology, &sentinel_ip(0), &redis_ip(0), 3, &auth)
            .await
            .unwrap();
        reset_arbiter_view(&topology, &sentinel_ip(0), &auth)
            .await
            .unwrap();
        assert_eq!(topology.view(&sentinel_ip(0)), healthy);
    }
}

#[tokio::test]
async fn test_push_config_twice() {
    let topology = MockTopology::healthy(3, 3);
    let auth = AuthConfig::with_password("s3cret");
    let overrides: BTreeMap<String, String> = [
        ("maxmemory".to_string(), "100mb".to_string()),
        ("hz".to_string(), "20".to_string()),
    ]
    .into_iter()
    .collect();

    push_custom_config(&topology, &redis_ip(1), &overrides, &auth)
        .await
        .unwrap();
    let pushed = topology.snapshot();
    push_custom_config(&topology, &redis_ip(1), &overrides, &auth)
        .await
        .unwrap();

    assert_eq!(topology.snapshot(), pushed);
}

#[tokio::test]
async fn test_empty_pushes_are_noops() {
    let topology = MockTopology::healthy(1, 1);

    let data = push_custom_config(&topology, &redis_ip(0), &BTreeMap::new(), &AuthConfig::none())
        .await
        .unwrap();
    let arbiter = push_arbiter_config(&topology, &sentinel_ip(0), &[], &AuthConfig::none())
        .await
        .unwrap();

    assert!(data.is_none());
    assert!(arbiter.is_none());
    assert!(topology.commands().is_empty());
}
