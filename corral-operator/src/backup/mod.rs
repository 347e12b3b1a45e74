//! Feature-gated backup, restore and clean orchestration.
//!
//! Both backup targets (bucket and S3) compose the same machinery: a
//! credential secret, a readiness gate on the registered database, one
//! Job or CronJob per enabled feature, and a completion-await-then-delete
//! cleanup for the one-shot variants. The variant modules only differ in
//! how credentials reach the job and in the storage destination.
//!
//! Database and user lists are resolved from the registered database once
//! per planned job. A listing failure degrades to an empty list instead of
//! failing the pass; a pass that backs up nothing is still a pass that ran.

pub mod bucket;
pub mod s3;


use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::batch::v1beta1::{CronJob, CronJobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, Secret, SecretVolumeSource, Volume, VolumeMount,
};
use kube::api::ObjectMeta;

use corral_core::error::PlanningError;

use crate::adapt::SecretSlot;
use crate::k8s::KubeClient;
use crate::reconcile::{BoxedEnsurer, Ensurer, Observed, Querier};
use crate::resources::{set_canonical_labels, EnsureCronJob, EnsureJob, EnsureSecret};

/// How long one-shot bucket jobs may run before the cleanup gives up.
pub const BUCKET_JOB_TIMEOUT: Duration = Duration::from_secs(45 * 60);
/// How long one-shot S3 jobs may run before the cleanup gives up.
pub const S3_JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// How long the clean cleanup waits for the clean job.
pub const CLEAN_CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

const BACKUP_IMAGE: &str = "cockroachdb/cockroach:v21.2.5";
const CERTS_DIR: &str = "/cockroach/cockroach-certs";

/// One orchestration branch selected by a feature tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feature {
    /// Scheduled backup via CronJob.
    Backup,
    /// One-shot backup Job, awaited and deleted.
    InstantBackup,
    /// One-shot restore Job, awaited and deleted.
    Restore,
    /// One-shot clean Job dropping restored data, awaited and deleted.
    Clean,
    /// Reconcile the database cluster itself.
    Database,
}

impl Feature {
    /// Parse one feature tag. Unknown tags are a hard validation error;
    /// a typo in a feature list must not silently drop a branch.
    pub fn parse(tag: &str) -> Result<Self, PlanningError> {
        match tag {
            "backup" => Ok(Feature::Backup),
            "instantbackup" => Ok(Feature::InstantBackup),
            "restore" => Ok(Feature::Restore),
            "clean" => Ok(Feature::Clean),
            "database" => Ok(Feature::Database),
            other => Err(PlanningError::UnknownFeature(other.to_string())),
        }
    }

    pub fn parse_list(tags: &[String]) -> Result<Vec<Self>, PlanningError> {
        tags.iter().map(|tag| Feature::parse(tag)).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Backup => "backup",
            Feature::InstantBackup => "instantbackup",
            Feature::Restore => "restore",
            Feature::Clean => "clean",
            Feature::Database => "database",
        }
    }
}

/// Job, CronJob and credential secret name for a backup. Interop-critical:
/// running clusters carry objects under exactly these names.
pub fn backup_name(name: &str) -> String {
    format!("backup-{}", name)
}

pub fn restore_job_name(name: &str) -> String {
    format!("{}-restore", backup_name(name))
}

pub fn clean_job_name(name: &str) -> String {
    format!("{}-clean", backup_name(name))
}

/// Stages the credential secret for a backup target.
///
/// The slots hold caller-resolved secret material; reading them at planning
/// time means a late resolution (an `existing` reference looked up just
/// before the pass) is still picked up.
pub struct CredentialSecretQuerier {
    pub namespace: String,
    pub secret_name: String,
    /// Secret field name paired with the slot providing its value.
    pub fields: Vec<(String, SecretSlot)>,
}

#[async_trait]
impl Querier for CredentialSecretQuerier {
    async fn plan(&self, _kube: &dyn KubeClient, _observed: &mut Observed) -> Result<BoxedEnsurer> {
        let mut data = BTreeMap::new();
        for (field, slot) in &self.fields {
            let value = slot.lock().unwrap().value.clone();
            data.insert(field.clone(), value);
        }
        let mut secret = Secret::default();
        secret.metadata = ObjectMeta {
            name: Some(self.secret_name.clone()),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        };
        set_canonical_labels(secret.metadata.labels.get_or_insert_with(Default::default));
        secret.string_data = Some(data);
        Ok(Box::new(EnsureSecret(secret)))
    }
}

/// Awaits a one-shot job and deletes it once complete.
///
/// Sequenced directly after the job's own apply, so by the time this runs
/// the job exists unless the apply was skipped; an absent job is nothing
/// to await.
pub struct AwaitJobCompletion {
    pub namespace: String,
    pub job_name: String,
    pub max_wait: Duration,
}

#[async_trait]
impl Ensurer for AwaitJobCompletion {
    #[tracing::instrument(level = "debug", skip(self, kube), fields(job = %self.job_name))]
    async fn apply(&self, kube: &dyn KubeClient) -> Result<()> {
        if kube.get_job(&self.namespace, &self.job_name).await?.is_none() {
            return Ok(());
        }
        kube.wait_until_job_completed(&self.namespace, &self.job_name, self.max_wait)
            .await
            .context("awaiting job completion")?;
        kube.delete_job(&self.namespace, &self.job_name).await
    }
}

/// Which object a planned backup branch builds.
#[derive(Clone, Copy, Debug)]
pub(crate) enum BranchKind {
    ScheduledBackup,
    InstantBackup,
    Restore,
    Clean,
}

/// Variant-independent parts of one planned Job/CronJob branch.
///
/// The variant modules fill in the credential plumbing (`env`, `volumes`,
/// `mounts`) and the storage `destination`; everything else is shared.
#[derive(Clone)]
pub(crate) struct BackupBranch {
    pub kind: BranchKind,
    pub namespace: String,
    /// Raw backup name; object names are derived via the naming helpers.
    pub name: String,
    pub schedule: String,
    /// Storage destination prefix, e.g. `gs://bucket` or `s3://bucket`.
    pub destination: String,
    /// Backup timestamp to restore from; empty restores the latest.
    pub timestamp: String,
    /// Name of the secret holding the root client certificate.
    pub certs_secret: String,
    pub env: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
}

#[async_trait]
impl Querier for BackupBranch {
    #[tracing::instrument(level = "debug", skip(self, kube, observed), fields(backup = %self.name, kind = ?self.kind))]
    async fn plan(&self, kube: &dyn KubeClient, observed: &mut Observed) -> Result<BoxedEnsurer> {
        let database = observed.database()?;
        let host = database.url();
        let port = database.port();
        let databases = databases_or_empty(kube, &*database).await;

        match self.kind {
            BranchKind::ScheduledBackup => {
                let command = backup_command(&host, port, &self.destination, &self.name, &databases);
                let cron = self.build_cron_job(backup_name(&self.name), &command);
                Ok(Box::new(EnsureCronJob(cron)))
            }
            BranchKind::InstantBackup => {
                let command = backup_command(&host, port, &self.destination, &self.name, &databases);
                let job = self.build_job(backup_name(&self.name), &command);
                Ok(Box::new(EnsureJob(job)))
            }
            BranchKind::Restore => {
                let command = restore_command(&host, port, &self.destination, &self.name, &self.timestamp, &databases);
                let job = self.build_job(restore_job_name(&self.name), &command);
                Ok(Box::new(EnsureJob(job)))
            }
            BranchKind::Clean => {
                let users = users_or_empty(kube, &*database).await;
                let command = clean_command(&host, port, &databases, &users);
                let job = self.build_job(clean_job_name(&self.name), &command);
                Ok(Box::new(EnsureJob(job)))
            }
        }
    }
}

impl BackupBranch {
    fn pod_template(&self, command: &str) -> PodTemplateSpec {
        let mut volumes = vec![Volume {
            name: "client-certs".into(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(self.certs_secret.clone()),
                default_mode: Some(0o400),
                ..Default::default()
            }),
            ..Default::default()
        }];
        volumes.extend(self.volumes.iter().cloned());

        let mut mounts = vec![VolumeMount {
            name: "client-certs".into(),
            mount_path: CERTS_DIR.into(),
            ..Default::default()
        }];
        mounts.extend(self.mounts.iter().cloned());

        let container = Container {
            name: "backup".into(),
            image: Some(BACKUP_IMAGE.into()),
            command: Some(vec!["/bin/bash".into(), "-c".into(), command.to_string()]),
            env: Some(self.env.clone()),
            volume_mounts: Some(mounts),
            ..Default::default()
        };
        let mut labels = BTreeMap::new();
        set_canonical_labels(&mut labels);
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                restart_policy: Some("Never".into()),
                volumes: Some(volumes),
                ..Default::default()
            }),
        }
    }

    fn object_meta(&self, name: String) -> ObjectMeta {
        let mut labels = BTreeMap::new();
        set_canonical_labels(&mut labels);
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        }
    }

    fn build_job(&self, name: String, command: &str) -> Job {
        Job {
            metadata: self.object_meta(name),
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                completions: Some(1),
                template: self.pod_template(command),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build_cron_job(&self, name: String, command: &str) -> CronJob {
        CronJob {
            metadata: self.object_meta(name.clone()),
            spec: Some(CronJobSpec {
                schedule: self.schedule.clone(),
                concurrency_policy: Some("Forbid".into()),
                successful_jobs_history_limit: Some(1),
                failed_jobs_history_limit: Some(1),
                job_template: JobTemplateSpec {
                    metadata: None,
                    spec: self.build_job(name, command).spec,
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

async fn databases_or_empty(kube: &dyn KubeClient, database: &dyn crate::database::DatabaseCurrent) -> Vec<String> {
    match database.list_databases(kube).await {
        Ok(databases) => databases,
        Err(err) => {
            tracing::warn!(error = ?err, "listing databases failed, continuing with an empty list");
            Vec::new()
        }
    }
}

async fn users_or_empty(kube: &dyn KubeClient, database: &dyn crate::database::DatabaseCurrent) -> Vec<String> {
    match database.list_users(kube).await {
        Ok(users) => users,
        Err(err) => {
            tracing::warn!(error = ?err, "listing users failed, continuing with an empty list");
            Vec::new()
        }
    }
}

fn sql(host: &str, port: u16, statement: &str) -> String {
    format!(
        "cockroach sql --certs-dir={} --host={} --port={} -e \"{}\"",
        CERTS_DIR, host, port, statement
    )
}

fn backup_command(host: &str, port: u16, destination: &str, name: &str, databases: &[String]) -> String {
    let mut parts = vec!["export BACKUP_TS=$(date -u +%Y-%m-%dT%H-%M-%SZ)".to_string()];
    for database in databases {
        parts.push(sql(
            host,
            port,
            &format!("BACKUP DATABASE {} TO '{}/{}/{}/${{BACKUP_TS}}';", database, destination, name, database),
        ));
    }
    parts.join(" && ")
}

fn restore_command(host: &str, port: u16, destination: &str, name: &str, timestamp: &str, databases: &[String]) -> String {
    let mut parts = Vec::with_capacity(databases.len());
    for database in databases {
        let source = if timestamp.is_empty() {
            format!("{}/{}/{}/LATEST", destination, name, database)
        } else {
            format!("{}/{}/{}/{}", destination, name, database, timestamp)
        };
        parts.push(sql(host, port, &format!("RESTORE DATABASE {} FROM '{}';", database, source)));
    }
    parts.join(" && ")
}

fn clean_command(host: &str, port: u16, databases: &[String], users: &[String]) -> String {
    let mut parts = Vec::new();
    for database in databases {
        parts.push(sql(host, port, &format!("DROP DATABASE IF EXISTS {} CASCADE;", database)));
    }
    for user in users.iter().filter(|user| user.as_str() != "root") {
        parts.push(sql(host, port, &format!("DROP USER IF EXISTS {};", user)));
    }
    parts.join(" && ")
}
