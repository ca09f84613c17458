//! ConfigMap generation for RedisFailover.
//!
//! Four ConfigMaps back the pods:
//! - `rfs-<name>`: the initial `sentinel.conf`
//! - `rfs-r-<name>`: the sentinel readiness script
//! - `rfr-<name>`: `redis.conf` plus the init script that renders it
//! - `rfr-s-<name>`: the Redis preStop script
//!
//! Secrets never land in a ConfigMap. `redis.conf` carries placeholders the
//! init container replaces from the pod environment.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use crate::crd::{MASTER_GROUP, RedisFailover};
use crate::resources::common::{
    REDIS_COMPONENT, SENTINEL_COMPONENT, failover_component_labels, owned_metadata, redis_name,
    redis_shutdown_configmap_name, sentinel_name, sentinel_readiness_configmap_name,
};

pub const SENTINEL_CONFIG_FILE: &str = "sentinel.conf";
pub const REDIS_CONFIG_FILE: &str = "redis.conf";
pub const REDIS_INIT_SCRIPT: &str = "init.sh";
pub const READINESS_SCRIPT: &str = "readiness.sh";
pub const SHUTDOWN_SCRIPT: &str = "shutdown.sh";

const PASSWORD_PLACEHOLDER: &str = "{REDIS_PASSWORD}";
const POD_IP_PLACEHOLDER: &str = "{POD_IP}";

const REDIS_BASE_CONFIG: &str = "\
loglevel notice
save 600 1
stop-writes-on-bgsave-error yes
rdbcompression yes
rdbchecksum yes
slave-read-only yes
slave-priority 1
repl-diskless-sync no
slowlog-max-len 128
slowlog-log-slower-than 10000
maxclients 11000
hz 50
timeout 60
tcp-keepalive 300
tcp-backlog 511
";

const SENTINEL_READINESS: &str = r#"#!/usr/bin/env sh
set -eou pipefail
redis-cli -h $(hostname) -p 26379 ping
slaves=$(redis-cli -h $(hostname) -p 26379 info sentinel|grep master0| grep -Eo 'slaves=[0-9]+' | awk -F= '{print $2}')
status=$(redis-cli -h $(hostname) -p 26379 info sentinel|grep master0| grep -Eo 'status=\w+' | awk -F= '{print $2}')
if [ "$status" != "ok" ]; then
    exit 1
fi
if [ $slaves -le 1 ]; then
    exit 1
fi
"#;

/// Initial sentinel configuration.
///
/// Sentinels start out monitoring localhost; the operator points them at
/// the elected master on its first pass.
pub fn render_sentinel_config() -> String {
    format!(
        "sentinel monitor {MASTER_GROUP} 127.0.0.1 6379 2\n\
         sentinel down-after-milliseconds {MASTER_GROUP} 5000\n\
         sentinel failover-timeout {MASTER_GROUP} 60000\n\
         sentinel parallel-syncs {MASTER_GROUP} 1\n"
    )
}

/// `redis.conf` for the data nodes
pub fn render_redis_config(resource: &RedisFailover) -> String {
    let mut config = REDIS_BASE_CONFIG.to_string();
    config.push_str(&format!("replica-announce-ip {POD_IP_PLACEHOLDER}\n"));

    if resource.spec.auth.secret_path.is_empty() {
        config.push_str("protected-mode no\n");
    } else {
        config.push_str(&format!("requirepass {PASSWORD_PLACEHOLDER}\n"));
        config.push_str(&format!("masterauth {PASSWORD_PLACEHOLDER}\n"));
        config.push_str("protected-mode yes\n");
    }

    for rename in &resource.spec.redis.custom_command_renames {
        let to = if rename.to.is_empty() {
            "\"\""
        } else {
            rename.to.as_str()
        };
        config.push_str(&format!("rename-command {} {}\n", rename.from, to));
    }
    config
}

/// Copies `redis.conf` into the data volume and fills in the placeholders
pub fn render_redis_init_script() -> String {
    format!(
        "echo \"start init\"\n\
         cp /redis/{REDIS_CONFIG_FILE} /redis-writable/{REDIS_CONFIG_FILE}\n\
         sed -i \"s/{PASSWORD_PLACEHOLDER}/${{REDIS_PASSWORD}}/g\" /redis-writable/{REDIS_CONFIG_FILE}\n\
         sed -i \"s/{POD_IP_PLACEHOLDER}/${{POD_IP}}/g\" /redis-writable/{REDIS_CONFIG_FILE}\n"
    )
}

/// preStop script: save, and hand mastership over if this pod holds it.
///
/// Kubernetes injects `<SERVICE>_SERVICE_HOST` and
/// `<SERVICE>_SERVICE_PORT_<PORT>` for the sentinel service.
pub fn render_shutdown_script(resource: &RedisFailover) -> String {
    let service_env = sentinel_name(resource).to_uppercase().replace('-', "_");
    let host = format!("{service_env}_SERVICE_HOST");
    let port = format!("{service_env}_SERVICE_PORT_SENTINEL");
    let auth = if resource.spec.auth.secret_path.is_empty() {
        ""
    } else {
        " -a ${REDIS_PASSWORD}"
    };

    format!(
        r#"#!/usr/bin/env sh
master=""
response_code=""
while [ "$master" = "" ]; do
    echo "Asking sentinel who is master..."
    master=$(redis-cli -h ${{{host}}} -p ${{{port}}} --csv SENTINEL get-master-addr-by-name {MASTER_GROUP} | tr ',' ' ' | tr -d '\"' | cut -d' ' -f1)
    sleep 1
done
echo "Master is $master, doing redis save..."
redis-cli{auth} SAVE
if [ "$master" = "$(hostname -i)" ]; then
    while [ ! "$response_code" = "OK" ]; do
        response_code=$(redis-cli -h ${{{host}}} -p ${{{port}}} SENTINEL failover {MASTER_GROUP})
        echo "after failover with code $response_code"
        sleep 1
    done
fi
"#
    )
}

fn configmap(
    resource: &RedisFailover,
    name: String,
    component: &str,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: owned_metadata(
            resource,
            name,
            failover_component_labels(resource, component),
        ),
        data: Some(data),
        ..Default::default()
    }
}

pub fn generate_sentinel_configmap(resource: &RedisFailover) -> ConfigMap {
    configmap(
        resource,
        sentinel_name(resource),
        SENTINEL_COMPONENT,
        BTreeMap::from([(SENTINEL_CONFIG_FILE.to_string(), render_sentinel_config())]),
    )
}

pub fn generate_sentinel_readiness_configmap(resource: &RedisFailover) -> ConfigMap {
    configmap(
        resource,
        sentinel_readiness_configmap_name(resource),
        SENTINEL_COMPONENT,
        BTreeMap::from([(READINESS_SCRIPT.to_string(), SENTINEL_READINESS.to_string())]),
    )
}

pub fn generate_redis_configmap(resource: &RedisFailover) -> ConfigMap {
    configmap(
        resource,
        redis_name(resource),
        REDIS_COMPONENT,
        BTreeMap::from([
            (REDIS_CONFIG_FILE.to_string(), render_redis_config(resource)),
            (REDIS_INIT_SCRIPT.to_string(), render_redis_init_script()),
        ]),
    )
}

pub fn generate_redis_shutdown_configmap(resource: &RedisFailover) -> ConfigMap {
    tracing::trace!(name = %resource.name_any(), "Rendering shutdown script");
    configmap(
        resource,
        redis_shutdown_configmap_name(resource),
        REDIS_COMPONENT,
        BTreeMap::from([(SHUTDOWN_SCRIPT.to_string(), render_shutdown_script(resource))]),
    )
}
