// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for redis-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/fixtures.rs"]
mod fixtures;

mod crd_tests {
    use redis_operator::crd::{
        FailoverPhase, MasterStatus, ProxyPhase, RedisFailoverSpec, RedisShakeSpec, ShakePhase,
    };

    #[test]
    fn test_phase_display() {
        assert_eq!(FailoverPhase::Creating.to_string(), "Creating");
        assert_eq!(FailoverPhase::Pending.to_string(), "Pending");
        assert_eq!(FailoverPhase::Fail.to_string(), "Fail");
        assert_eq!(FailoverPhase::Ready.to_string(), "Ready");
        assert_eq!(FailoverPhase::WaitingPodReady.to_string(), "WaitingPodReady");
        assert_eq!(ProxyPhase::Ready.to_string(), "Ready");
        assert_eq!(ShakePhase::Running.to_string(), "Running");
    }

    #[test]
    fn test_phase_defaults() {
        assert_eq!(FailoverPhase::default(), FailoverPhase::Pending);
        assert_eq!(MasterStatus::default(), MasterStatus::Down);
    }

    #[test]
    fn test_failover_spec_from_manifest() {
        let spec: RedisFailoverSpec = serde_json::from_value(serde_json::json!({
            "redis": {
                "replicas": 3,
                "customConfig": { "maxmemory": "100mb" }
            },
            "sentinel": {
                "replicas": 5,
                "customConfig": { "down-after-milliseconds": "3000" }
            },
            "auth": { "secretPath": "cache-auth" },
            "labelWhitelist": ["^team$"]
        }))
        .unwrap();

        assert_eq!(spec.redis.replicas, 3);
        assert_eq!(spec.sentinel.replicas, 5);
        assert_eq!(spec.redis.custom_config["maxmemory"], "100mb");
        assert_eq!(
            spec.sentinel.custom_config["down-after-milliseconds"],
            "3000"
        );
        assert_eq!(spec.auth.secret_path, "cache-auth");
        assert_eq!(spec.label_whitelist, vec!["^team$".to_string()]);
    }

    #[test]
    fn test_shake_spec_lowercase_enums() {
        let spec: RedisShakeSpec = serde_json::from_value(serde_json::json!({
            "modelType": "sync",
            "source": { "type": "sentinel", "clusterName": "cache" },
            "target": { "type": "cluster", "address": ["10.0.0.1:6379"] },
            "keyExists": "rewrite"
        }))
        .unwrap();

        assert_eq!(spec.model_type.to_string(), "sync");
        assert_eq!(spec.source.unwrap().r#type.to_string(), "sentinel");
        assert_eq!(spec.key_exists.to_string(), "rewrite");
    }
}

mod validation_tests {
    use redis_operator::controller::error::Error;
    use redis_operator::controller::validation::{
        DEFAULT_REDIS_IMAGE, default_proxy_resources, default_sentinel_resources,
        validate_failover, validate_proxy, validate_shake,
    };

    use crate::fixtures::{RedisFailoverBuilder, RedisProxyBuilder, RedisShakeBuilder};

    #[test]
    fn test_failover_defaults_filled() {
        let rf = RedisFailoverBuilder::new("cache").build();
        let spec = validate_failover("cache", &rf.spec).unwrap();

        assert_eq!(spec.redis.replicas, 3);
        assert_eq!(spec.sentinel.replicas, 3);
        assert_eq!(spec.redis.image, DEFAULT_REDIS_IMAGE);
        assert_eq!(spec.sentinel.image, DEFAULT_REDIS_IMAGE);
        assert_eq!(spec.sentinel.resources, default_sentinel_resources());
        // The stored spec is left untouched
        assert_eq!(rf.spec.redis.replicas, 0);
    }

    #[test]
    fn test_failover_below_minimum_rejected() {
        let rf = RedisFailoverBuilder::new("cache").redis_replicas(2).build();
        assert!(matches!(
            validate_failover("cache", &rf.spec),
            Err(Error::Validation(_))
        ));

        let rf = RedisFailoverBuilder::new("cache")
            .sentinel_replicas(1)
            .build();
        assert!(validate_failover("cache", &rf.spec).is_err());
    }

    #[test]
    fn test_failover_name_too_long() {
        let name = "a".repeat(49);
        let rf = RedisFailoverBuilder::new(name.clone()).build();
        let err = validate_failover(&name, &rf.spec).unwrap_err();
        assert!(err.to_string().contains("name length"));
    }

    #[test]
    fn test_failover_invalid_label_whitelist() {
        let rf = RedisFailoverBuilder::new("cache")
            .label_whitelist("team[")
            .build();
        assert!(validate_failover("cache", &rf.spec).is_err());
    }

    #[test]
    fn test_proxy_defaults_and_instance_required() {
        let rp = RedisProxyBuilder::new("front", "cache").build();
        let spec = validate_proxy("front", &rp.spec).unwrap();
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.proxy_info.work_threads, 4);
        assert_eq!(spec.proxy_info.client_timeout, 120);
        assert_eq!(spec.resources, default_proxy_resources());

        let rp = RedisProxyBuilder::new("front", "").build();
        assert!(matches!(
            validate_proxy("front", &rp.spec),
            Err(Error::MissingField(_))
        ));
    }

    #[test]
    fn test_shake_requires_source() {
        let rs = RedisShakeBuilder::new("migrate").without_source().build();
        assert!(matches!(
            validate_shake("migrate", &rs.spec),
            Err(Error::MissingField(_))
        ));

        let rs = RedisShakeBuilder::new("migrate").build();
        let spec = validate_shake("migrate", &rs.spec).unwrap();
        assert_eq!(spec.parallel, 32);
        assert_eq!(spec.qbs, 200_000);
        assert_eq!(spec.replicas, 1);
    }
}

mod status_tests {
    use jiff::Timestamp;
    use redis_operator::controller::cluster_view::WorkloadCounts;
    use redis_operator::controller::failover_reconciler::StatusBuilder;
    use redis_operator::controller::status::ConditionHistory;
    use redis_operator::crd::{
        Condition, FailoverPhase, MasterStatus, REASON_WAITING_POD, RedisFailoverStatus,
        RedisStatusMaster,
    };

    use crate::fixtures::test_failover;

    fn at(seconds: i64) -> Timestamp {
        Timestamp::from_second(1_700_000_000 + seconds).unwrap()
    }

    #[test]
    fn test_upsert_keeps_one_entry_per_type() {
        let mut history = ConditionHistory::default();
        history.upsert(Condition::new_at("Healthy", true, "Ready", "ok", at(0)));
        history.upsert(Condition::new_at("Healthy", true, "Ready", "ok", at(10)));
        history.upsert(Condition::new_at("Failed", true, "Error", "boom", at(20)));

        assert_eq!(history.as_slice().len(), 2);
        assert_eq!(history.latest().unwrap().r#type, "Failed");
    }

    #[test]
    fn test_identical_observation_refreshes_update_time_only() {
        let mut history = ConditionHistory::default();
        history.upsert(Condition::new_at("Healthy", true, "Ready", "ok", at(0)));
        history.upsert(Condition::new_at("Healthy", true, "Ready", "ok", at(60)));

        let condition = &history.as_slice()[0];
        assert_eq!(condition.last_update_time, at(60).to_string());
        assert_eq!(condition.last_transition_time, at(0).to_string());
    }

    #[test]
    fn test_status_flip_moves_transition_time() {
        let mut history = ConditionHistory::default();
        history.upsert(Condition::new_at("Healthy", true, "Ready", "ok", at(0)));
        history.upsert(Condition::new_at("Healthy", false, "Down", "gone", at(30)));

        let condition = &history.as_slice()[0];
        assert_eq!(condition.status, "False");
        assert_eq!(condition.last_transition_time, at(30).to_string());
    }

    #[test]
    fn test_waiting_pod_is_last() {
        let mut history = ConditionHistory::default();
        history.upsert(Condition::new_at("Healthy", true, "Ready", "ok", at(0)));
        assert!(!history.is_last_waiting_pod_ready());
        history.upsert(Condition::new_at(
            "Scaling",
            true,
            REASON_WAITING_POD,
            "2/3 redis pods ready",
            at(5),
        ));
        assert!(history.is_last_waiting_pod_ready());
    }

    #[test]
    fn test_status_builder_keeps_previous_master_on_failure() {
        let rf = test_failover("cache", "default");
        let previous = RedisFailoverStatus {
            master: RedisStatusMaster {
                name: "mymaster".to_string(),
                status: MasterStatus::Ok,
                address: "10.0.0.1".to_string(),
            },
            ..Default::default()
        };

        let status = StatusBuilder::new(&rf, &previous, ConditionHistory::default())
            .phase(FailoverPhase::Fail, "split brain".to_string())
            .condition(|h| h.set_failed("split brain"))
            .build();

        assert_eq!(status.phase, FailoverPhase::Fail);
        assert_eq!(status.master.address, "10.0.0.1");
        assert_eq!(status.master.status, MasterStatus::Down);
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.conditions[0].r#type, "Failed");
    }

    #[test]
    fn test_status_builder_instance_counts() {
        let rf = test_failover("cache", "default");
        let builder = StatusBuilder::new(
            &rf,
            &RedisFailoverStatus::default(),
            ConditionHistory::default(),
        );
        let redis = WorkloadCounts {
            desired: 3,
            ready: 3,
        };
        let sentinel = WorkloadCounts {
            desired: 3,
            ready: 2,
        };
        let status = builder
            .phase(FailoverPhase::Ready, "Cluster is healthy".to_string())
            .master(MasterStatus::Ok, "10.0.0.2".to_string())
            .instance(&rf, redis, sentinel, "10.96.0.10".to_string())
            .build();

        assert_eq!(status.master.name, "mymaster");
        assert_eq!(status.instance.redis.size, 3);
        assert_eq!(status.instance.redis.ready, 3);
        assert_eq!(status.instance.sentinel.ready, 2);
        assert_eq!(status.instance.sentinel.service, "rfs-cache");
        assert_eq!(status.instance.sentinel.cluster_ip, "10.96.0.10");
        assert_eq!(status.instance.sentinel.port, "26379");
    }
}

mod resource_tests {
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use redis_operator::controller::ensure::failover_pdb;
    use redis_operator::crd::{EndpointType, ModelType};
    use redis_operator::resources::common::{REDIS_COMPONENT, SENTINEL_COMPONENT};
    use redis_operator::resources::configmaps::render_redis_config;
    use redis_operator::resources::pdb::min_available;
    use redis_operator::resources::proxy::{proxy_name, render_proxy_config};
    use redis_operator::resources::sentinel::sentinel_command;
    use redis_operator::resources::services::{
        generate_redis_service, generate_sentinel_headless_service, generate_sentinel_service,
    };
    use redis_operator::resources::shake::{render_shake_config, shake_command};
    use redis_operator::resources::statefulset::{generate_statefulset, redis_command};

    use crate::fixtures::{
        RedisFailoverBuilder, RedisProxyBuilder, RedisShakeBuilder, test_failover,
    };

    #[test]
    fn test_statefulset_shape() {
        let rf = test_failover("cache", "prod");
        let sts = generate_statefulset(&rf);
        let spec = sts.spec.unwrap();

        assert_eq!(sts.metadata.name.as_deref(), Some("rfr-cache"));
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.service_name.as_deref(), Some("rfr-cache"));
        let owner = &sts.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "RedisFailover");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_redis_starts_as_replica_of_nothing() {
        let rf = test_failover("cache", "prod");
        let command = redis_command(&rf);
        assert_eq!(&command[2..], ["--slaveof", "127.0.0.1", "6379"]);
        assert!(sentinel_command(&rf).contains(&"--sentinel".to_string()));
    }

    #[test]
    fn test_redis_config_password_placeholder() {
        let plain = render_redis_config(&test_failover("cache", "prod"));
        assert!(plain.contains("protected-mode no"));
        assert!(!plain.contains("requirepass"));

        let rf = RedisFailoverBuilder::new("cache")
            .auth_secret("cache-auth")
            .build();
        let secured = render_redis_config(&rf);
        assert!(secured.contains("requirepass"));
        assert!(secured.contains("masterauth"));
        // Secrets are never written into the ConfigMap
        assert!(!secured.contains("cache-auth"));
    }

    #[test]
    fn test_services() {
        let rf = test_failover("cache", "prod");

        let redis = generate_redis_service(&rf);
        assert_eq!(
            redis.spec.unwrap().cluster_ip.as_deref(),
            Some("None")
        );

        let sentinel = generate_sentinel_service(&rf);
        assert_eq!(sentinel.metadata.name.as_deref(), Some("rfs-cache"));
        let port = &sentinel.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("sentinel"));
        assert_eq!(port.port, 26379);

        let headless = generate_sentinel_headless_service(&rf);
        assert_eq!(headless.metadata.name.as_deref(), Some("rfs-cache-hl"));
    }

    #[test]
    fn test_min_available() {
        assert_eq!(min_available(1), 1);
        assert_eq!(min_available(2), 1);
        assert_eq!(min_available(3), 2);
        assert_eq!(min_available(5), 2);
    }

    #[test]
    fn test_failover_pdbs() {
        let rf = test_failover("cache", "prod");
        let redis = failover_pdb(&rf, REDIS_COMPONENT);
        let sentinel = failover_pdb(&rf, SENTINEL_COMPONENT);

        assert_eq!(redis.metadata.name.as_deref(), Some("rfr-cache"));
        assert_eq!(sentinel.metadata.name.as_deref(), Some("rfs-cache"));
        assert_eq!(
            redis.spec.unwrap().min_available,
            Some(IntOrString::Int(2))
        );
    }

    #[test]
    fn test_proxy_config_cluster_and_sentinel() {
        let cluster = RedisProxyBuilder::new("front", "cache").build();
        let conf = render_proxy_config(&cluster);
        assert!(conf.contains("ClusterServerPool"));
        assert!(conf.contains("+ cache-0:6379"));
        assert!(conf.contains("+ cache-2:6379"));
        assert_eq!(proxy_name(&cluster), "front-proxy");

        let sentinel = RedisProxyBuilder::new("front", "cache")
            .sentinel()
            .auth_secret("cache-auth")
            .build();
        let conf = render_proxy_config(&sentinel);
        assert!(conf.contains("SentinelServerPool"));
        assert!(conf.contains("+ rfs-cache:26379"));
        assert!(conf.contains("Group mymaster"));
        assert!(conf.contains("Mode admin"));
    }

    #[test]
    fn test_shake_config_addresses() {
        let rs = RedisShakeBuilder::new("migrate")
            .source_cluster(EndpointType::Sentinel, "cache")
            .build();
        let conf = render_shake_config(&rs);
        assert!(conf.contains("source.address = mymaster@rfs-cache:26379"));
        assert!(conf.contains("target.address = 10.2.0.1:6379"));
        assert!(conf.contains("target.db = -1"));
        assert!(conf.contains("source.password_raw = {source_passwd}"));

        let rs = RedisShakeBuilder::new("migrate")
            .source_cluster(EndpointType::Cluster, "shard")
            .model(ModelType::Rump)
            .build();
        let conf = render_shake_config(&rs);
        assert!(conf.contains(
            "source.address = master@shard-0:6379;shard-1:6379;shard-2:6379"
        ));
        assert_eq!(shake_command(&rs).last().map(String::as_str), Some("rump"));
    }
}

mod client_tests {
    use redis_operator::client::{AuthConfig, RoleInfo, normalize_memory_value};
    use redis_operator::controller::failover_healer::quorum;

    #[test]
    fn test_memory_units() {
        assert_eq!(normalize_memory_value("100mb").unwrap(), "104857600");
        assert_eq!(normalize_memory_value("1gb").unwrap(), "1073741824");
        assert_eq!(normalize_memory_value("1024").unwrap(), "1024");
        assert!(normalize_memory_value("lots").is_err());
    }

    #[test]
    fn test_quorum_is_majority() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 3);
    }

    #[test]
    fn test_role_follows() {
        assert!(RoleInfo::replica_of("10.0.0.1").follows("10.0.0.1"));
        assert!(!RoleInfo::replica_of("127.0.0.1").follows("10.0.0.1"));
        assert!(!RoleInfo::master().follows("10.0.0.1"));
    }

    #[test]
    fn test_auth_config() {
        assert!(!AuthConfig::none().is_set());
        let auth = AuthConfig::with_password("s3cret");
        assert!(auth.is_set());
        assert_eq!(auth.password(), Some("s3cret"));
    }
}

mod error_tests {
    use std::time::Duration;

    use redis_operator::controller::error::{Error, WAITING_REQUEUE};

    #[test]
    fn test_requeue_policy() {
        assert_eq!(
            Error::CountMismatch("2/3".to_string()).requeue_after(),
            WAITING_REQUEUE
        );
        assert_eq!(
            Error::Transient("x".to_string()).requeue_after(),
            Duration::from_secs(30)
        );
        assert_eq!(
            Error::Validation("x".to_string()).requeue_after(),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_split_brain_message() {
        let err = Error::SplitBrain { masters: 2 };
        assert!(err.to_string().contains("fix manually"));
        assert!(err.is_retryable());
    }
}
