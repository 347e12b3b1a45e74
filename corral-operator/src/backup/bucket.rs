//! Bucket (GCS) backup target.
//!
//! Credentials are a single service account JSON document, mounted into the
//! job and announced via `GOOGLE_APPLICATION_CREDENTIALS`.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{EnvVar, SecretVolumeSource, Volume, VolumeMount};
use serde::{Deserialize, Serialize};

use corral_core::secret::{Existing, Secret};
use corral_core::tree::Tree;

use crate::adapt::{Adapted, SecretSlot};
use crate::cockroach::root_client_secret_name;
use crate::reconcile::{BoxedDestroyer, BoxedQuerier};
use crate::resources::{resource_querier, DestroyCronJob, DestroyJob, DestroySecret};

use super::{
    backup_name, clean_job_name, restore_job_name, AwaitJobCompletion, BackupBranch, BranchKind, CredentialSecretQuerier,
    Feature, BUCKET_JOB_TIMEOUT, CLEAN_CLEANUP_TIMEOUT,
};

/// Field under which the credential secret stores the service account JSON.
pub const SERVICE_ACCOUNT_JSON_FIELD: &str = "serviceaccountjson";

const CREDENTIALS_DIR: &str = "/secrets";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Spec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cron: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bucket: String,
    /// Backup timestamp a restore reads from; empty restores the latest.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(rename = "serviceAccountJSON", skip_serializing_if = "Option::is_none")]
    pub service_account_json: Option<Secret>,
    #[serde(rename = "existingServiceAccountJSON", skip_serializing_if = "Option::is_none")]
    pub existing_service_account_json: Option<Existing>,
}

impl Spec {
    pub fn is_zero(&self) -> bool {
        self.name.is_empty()
            && self.cron.is_empty()
            && self.bucket.is_empty()
            && self.timestamp.is_empty()
            && self.service_account_json.as_ref().map_or(true, Secret::is_zero)
            && self.existing_service_account_json.as_ref().map_or(true, Existing::is_zero)
    }
}

/// Adapt a bucket backup document into its feature-gated branches.
pub fn adapt(namespace: &str, tree: &Tree, features: &[Feature]) -> Result<Adapted> {
    let spec: Spec = tree.parse_spec().context("parsing bucket backup spec")?;
    let name = spec.name.clone();
    let secret_name = backup_name(&name);

    let sa_json: SecretSlot = Arc::new(Mutex::new(spec.service_account_json.clone().unwrap_or_default()));
    let mut adapted = Adapted::new(Vec::new(), Vec::new());
    adapted.secrets.insert(SERVICE_ACCOUNT_JSON_FIELD.to_string(), sa_json.clone());
    if let Some(existing) = &spec.existing_service_account_json {
        adapted.existing.insert(SERVICE_ACCOUNT_JSON_FIELD.to_string(), existing.clone());
    }

    let branch = |kind: BranchKind| BackupBranch {
        kind,
        namespace: namespace.to_string(),
        name: name.clone(),
        schedule: spec.cron.clone(),
        destination: format!("gs://{}", spec.bucket),
        timestamp: spec.timestamp.clone(),
        certs_secret: root_client_secret_name(),
        env: vec![EnvVar {
            name: "GOOGLE_APPLICATION_CREDENTIALS".into(),
            value: Some(format!("{}/{}", CREDENTIALS_DIR, SERVICE_ACCOUNT_JSON_FIELD)),
            ..Default::default()
        }],
        volumes: vec![Volume {
            name: "backup-credentials".into(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.clone()),
                default_mode: Some(0o400),
                ..Default::default()
            }),
            ..Default::default()
        }],
        mounts: vec![VolumeMount {
            name: "backup-credentials".into(),
            mount_path: CREDENTIALS_DIR.into(),
            read_only: Some(true),
            ..Default::default()
        }],
    };

    let active: Vec<Feature> = features
        .iter()
        .copied()
        .filter(|feature| !matches!(feature, Feature::Database))
        .collect();

    let mut queriers: Vec<BoxedQuerier> = Vec::new();
    let mut destroyers: Vec<BoxedDestroyer> = Vec::new();
    if !active.is_empty() {
        queriers.push(Box::new(CredentialSecretQuerier {
            namespace: namespace.to_string(),
            secret_name: secret_name.clone(),
            fields: vec![(SERVICE_ACCOUNT_JSON_FIELD.to_string(), sa_json)],
        }));
        queriers.push(Box::new(crate::database::DatabaseReadyGate));
    }

    let mut credential_teardown = false;
    for feature in &active {
        match feature {
            Feature::Backup => {
                queriers.push(Box::new(branch(BranchKind::ScheduledBackup)));
                destroyers.push(Box::new(DestroyCronJob {
                    namespace: namespace.to_string(),
                    name: backup_name(&name),
                }));
                credential_teardown = true;
            }
            Feature::InstantBackup => {
                queriers.push(Box::new(branch(BranchKind::InstantBackup)));
                queriers.push(resource_querier(AwaitJobCompletion {
                    namespace: namespace.to_string(),
                    job_name: backup_name(&name),
                    max_wait: BUCKET_JOB_TIMEOUT,
                }));
                destroyers.push(Box::new(DestroyJob {
                    namespace: namespace.to_string(),
                    name: backup_name(&name),
                }));
                credential_teardown = true;
            }
            Feature::Restore => {
                queriers.push(Box::new(branch(BranchKind::Restore)));
                queriers.push(resource_querier(AwaitJobCompletion {
                    namespace: namespace.to_string(),
                    job_name: restore_job_name(&name),
                    max_wait: BUCKET_JOB_TIMEOUT,
                }));
                destroyers.push(Box::new(DestroyJob {
                    namespace: namespace.to_string(),
                    name: restore_job_name(&name),
                }));
            }
            Feature::Clean => {
                queriers.push(Box::new(branch(BranchKind::Clean)));
                queriers.push(resource_querier(AwaitJobCompletion {
                    namespace: namespace.to_string(),
                    job_name: clean_job_name(&name),
                    max_wait: CLEAN_CLEANUP_TIMEOUT,
                }));
                destroyers.push(Box::new(DestroyJob {
                    namespace: namespace.to_string(),
                    name: clean_job_name(&name),
                }));
            }
            Feature::Database => {}
        }
    }
    if credential_teardown {
        destroyers.push(Box::new(DestroySecret {
            namespace: namespace.to_string(),
            name: secret_name,
        }));
    }

    adapted.queriers = queriers;
    adapted.destroyers = destroyers;
    Ok(adapted)
}
