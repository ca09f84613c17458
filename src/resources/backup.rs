//! Backup CronJob generation.
//!
//! One CronJob `rfr-<name>-<schedule>` per declared backup schedule. The
//! backup image does the work; the operator only hands it the parameters.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, SecurityContext};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{BackupSchedule, RedisFailover};
use crate::resources::common::{
    REDIS_COMPONENT, backup_cronjob_name, convert_pull_secrets, failover_component_labels,
    field_env, owned_metadata, plain_env,
};

/// CronJobs for every backup schedule of `resource`
pub fn generate_backup_cronjobs(resource: &RedisFailover) -> Vec<CronJob> {
    resource
        .spec
        .redis
        .backup
        .schedule
        .iter()
        .map(|schedule| generate_backup_cronjob(resource, schedule))
        .collect()
}

pub fn generate_backup_cronjob(resource: &RedisFailover, schedule: &BackupSchedule) -> CronJob {
    let labels = failover_component_labels(resource, REDIS_COMPONENT);
    let keep = schedule.keep.max(1);

    CronJob {
        metadata: owned_metadata(
            resource,
            backup_cronjob_name(resource, &schedule.name),
            labels.clone(),
        ),
        spec: Some(CronJobSpec {
            schedule: schedule.schedule.clone(),
            successful_jobs_history_limit: Some(keep),
            failed_jobs_history_limit: Some(keep),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: Some(0),
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            restart_policy: Some("Never".to_string()),
                            containers: vec![backup_container(resource, schedule)],
                            image_pull_secrets: convert_pull_secrets(&resource.spec.redis.pod),
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn backup_container(resource: &RedisFailover, schedule: &BackupSchedule) -> Container {
    let image = resource.spec.redis.backup.image.clone();
    Container {
        name: "backup-schedule".to_string(),
        image: Some(image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            "/schedule.sh".to_string(),
        ]),
        env: Some(backup_env(resource, schedule, image)),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn backup_env(resource: &RedisFailover, schedule: &BackupSchedule, image: String) -> Vec<EnvVar> {
    let mut env = vec![
        field_env("BACKUP_JOB_NAME", "metadata.name"),
        field_env("BACKUP_JOB_UID", "metadata.uid"),
        plain_env("BACKUP_IMAGE", image),
        plain_env("REDIS_FAILOVER_NAME", resource.name_any()),
        plain_env(
            "STORAGE_CLASS_NAME",
            schedule.storage.storage_class_name.clone().unwrap_or_default(),
        ),
        plain_env("STORAGE_SIZE", schedule.storage.size.clone()),
        plain_env("SCHEDULE_NAME", schedule.name.clone()),
    ];
    if schedule.keep_after_deletion {
        env.push(plain_env("KEEP_AFTER_DELETION", "true"));
    }
    env
}
