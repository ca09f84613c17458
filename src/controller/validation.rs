//! Validation and defaulting for the three resource kinds.
//!
//! Each function checks a spec and returns a copy with defaults filled in.
//! The stored resource is never rewritten; reconcilers work on the
//! defaulted copy for one pass.

use std::collections::BTreeMap;

use regex::Regex;

use crate::controller::error::{Error, Result};
use crate::crd::{
    DEFAULT_EXPORTER_IMAGE, DEFAULT_PULL_POLICY, DEFAULT_SENTINEL_EXPORTER_IMAGE,
    RedisFailoverSpec, RedisProxySpec, RedisShakeSpec, ResourceRequirementsSpec,
};

/// Longest accepted resource name; generated object names add prefixes.
pub const MAX_NAME_LENGTH: usize = 48;

/// Default and minimum Redis pods.
pub const DEFAULT_REDIS_REPLICAS: i32 = 3;

/// Default and minimum Sentinel pods.
pub const DEFAULT_SENTINEL_REPLICAS: i32 = 3;

pub const DEFAULT_REDIS_IMAGE: &str = "redis:5.0.4-alpine";
pub const DEFAULT_BACKUP_IMAGE: &str = "redis-backup:v3.7.0";
pub const DEFAULT_PROXY_IMAGE: &str = "redis-proxy:v3.7.0";
pub const DEFAULT_SHAKE_IMAGE: &str = "redis-shake:v3.7.0";

pub const DEFAULT_PROXY_WORK_THREADS: i32 = 4;
pub const DEFAULT_PROXY_CLIENT_TIMEOUT: i32 = 120;

pub const DEFAULT_SHAKE_PARALLEL: i32 = 32;
pub const DEFAULT_SHAKE_QBS: i64 = 200_000;
pub const DEFAULT_BIG_KEY_THRESHOLD: i64 = 524_288_000;

pub fn default_sentinel_resources() -> ResourceRequirementsSpec {
    ResourceRequirementsSpec::new("20m", "16Mi", "100m", "60Mi")
}

pub fn default_proxy_resources() -> ResourceRequirementsSpec {
    ResourceRequirementsSpec::new("500m", "500Mi", "1", "1Gi")
}

fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "name length can't be higher than {MAX_NAME_LENGTH}"
        )));
    }
    Ok(())
}

/// Lower-case config names, as nodes report them.
fn lowercase_keys(config: &mut BTreeMap<String, String>, kind: &str) -> Result<()> {
    let mut lowered = BTreeMap::new();
    for (key, value) in std::mem::take(config) {
        let key = key.to_ascii_lowercase();
        if lowered.contains_key(&key) {
            return Err(Error::Validation(format!(
                "{kind} customConfig sets '{key}' more than once"
            )));
        }
        lowered.insert(key, value);
    }
    *config = lowered;
    Ok(())
}

fn default_string(value: &mut String, default: &str) {
    if value.is_empty() {
        *value = default.to_string();
    }
}

/// Validate a RedisFailover and fill in defaults.
pub fn validate_failover(name: &str, spec: &RedisFailoverSpec) -> Result<RedisFailoverSpec> {
    validate_name(name)?;

    let mut spec = spec.clone();

    if spec.redis.replicas == 0 {
        spec.redis.replicas = DEFAULT_REDIS_REPLICAS;
    } else if spec.redis.replicas < DEFAULT_REDIS_REPLICAS {
        return Err(Error::Validation(
            "number of redis in spec is less than the minimum".to_string(),
        ));
    }

    if spec.sentinel.replicas == 0 {
        spec.sentinel.replicas = DEFAULT_SENTINEL_REPLICAS;
    } else if spec.sentinel.replicas < DEFAULT_SENTINEL_REPLICAS {
        return Err(Error::Validation(
            "number of sentinel in spec is less than the minimum".to_string(),
        ));
    }

    default_string(&mut spec.redis.image, DEFAULT_REDIS_IMAGE);
    default_string(&mut spec.sentinel.image, DEFAULT_REDIS_IMAGE);
    default_string(&mut spec.redis.image_pull_policy, DEFAULT_PULL_POLICY);
    default_string(&mut spec.sentinel.image_pull_policy, DEFAULT_PULL_POLICY);
    default_string(&mut spec.redis.exporter.image, DEFAULT_EXPORTER_IMAGE);
    default_string(&mut spec.sentinel.exporter.image, DEFAULT_SENTINEL_EXPORTER_IMAGE);
    default_string(&mut spec.redis.backup.image, DEFAULT_BACKUP_IMAGE);
    default_string(&mut spec.redis.restore.image, DEFAULT_BACKUP_IMAGE);

    if spec.sentinel.resources.is_empty() {
        spec.sentinel.resources = default_sentinel_resources();
    }

    lowercase_keys(&mut spec.redis.custom_config, "redis")?;
    lowercase_keys(&mut spec.sentinel.custom_config, "sentinel")?;

    for pattern in &spec.label_whitelist {
        Regex::new(pattern).map_err(|e| {
            Error::Validation(format!("invalid labelWhitelist entry '{pattern}': {e}"))
        })?;
    }

    for schedule in &spec.redis.backup.schedule {
        if schedule.name.is_empty() || schedule.schedule.is_empty() {
            return Err(Error::Validation(
                "backup schedule needs a name and a cron expression".to_string(),
            ));
        }
    }

    Ok(spec)
}

/// Validate a RedisProxy and fill in defaults.
pub fn validate_proxy(name: &str, spec: &RedisProxySpec) -> Result<RedisProxySpec> {
    validate_name(name)?;

    let mut spec = spec.clone();

    if spec.proxy_info.instance_name.is_empty() {
        return Err(Error::MissingField("proxyInfo.instanceName".to_string()));
    }
    if spec.replicas <= 0 {
        spec.replicas = 1;
    }
    if spec.resources.is_empty() {
        spec.resources = default_proxy_resources();
    }
    default_string(&mut spec.image, DEFAULT_PROXY_IMAGE);
    default_string(&mut spec.image_pull_policy, DEFAULT_PULL_POLICY);
    if spec.proxy_info.work_threads < 1 {
        spec.proxy_info.work_threads = DEFAULT_PROXY_WORK_THREADS;
    }
    if spec.proxy_info.client_timeout == 0 {
        spec.proxy_info.client_timeout = DEFAULT_PROXY_CLIENT_TIMEOUT;
    }

    Ok(spec)
}

/// Validate a RedisShake and fill in defaults.
pub fn validate_shake(name: &str, spec: &RedisShakeSpec) -> Result<RedisShakeSpec> {
    validate_name(name)?;

    let source = spec
        .source
        .as_ref()
        .ok_or_else(|| Error::MissingField("source".to_string()))?;
    let target = spec
        .target
        .as_ref()
        .ok_or_else(|| Error::MissingField("target".to_string()))?;

    if source.address.is_empty() && source.cluster_name.is_empty() {
        return Err(Error::Validation(
            "source needs an address or a clusterName".to_string(),
        ));
    }
    if target.address.is_empty() && target.cluster_name.is_empty() {
        return Err(Error::Validation(
            "target needs an address or a clusterName".to_string(),
        ));
    }

    let mut spec = spec.clone();
    if spec.parallel <= 0 {
        spec.parallel = DEFAULT_SHAKE_PARALLEL;
    }
    if spec.qbs <= 0 {
        spec.qbs = DEFAULT_SHAKE_QBS;
    }
    if spec.big_key_threshold <= 0 {
        spec.big_key_threshold = DEFAULT_BIG_KEY_THRESHOLD;
    }
    if spec.replicas <= 0 {
        spec.replicas = 1;
    }
    default_string(&mut spec.image, DEFAULT_SHAKE_IMAGE);
    default_string(&mut spec.image_pull_policy, DEFAULT_PULL_POLICY);

    Ok(spec)
}
