//! S3-compatible backup target.
//!
//! Credentials are the AWS key triple, injected into the job as environment
//! variables sourced from the credential secret. Endpoint and region reach
//! the cockroach client the same way.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};
use serde::{Deserialize, Serialize};

use corral_core::secret::{Existing, Secret};
use corral_core::tree::Tree;

use crate::adapt::{Adapted, SecretSlot};
use crate::cockroach::root_client_secret_name;
use crate::reconcile::{BoxedDestroyer, BoxedQuerier};
use crate::resources::{resource_querier, DestroyCronJob, DestroyJob, DestroySecret};

use super::{
    backup_name, clean_job_name, restore_job_name, AwaitJobCompletion, BackupBranch, BranchKind, CredentialSecretQuerier,
    Feature, CLEAN_CLEANUP_TIMEOUT, S3_JOB_TIMEOUT,
};

/// Credential secret field names. Interop-critical.
pub const ACCESS_KEY_ID_FIELD: &str = "accesskeyid";
pub const SECRET_ACCESS_KEY_FIELD: &str = "secretaccesskey";
pub const SESSION_TOKEN_FIELD: &str = "sessiontoken";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Spec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cron: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bucket: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// Backup timestamp a restore reads from; empty restores the latest.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(rename = "accessKeyID", skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<Secret>,
    #[serde(rename = "existingAccessKeyID", skip_serializing_if = "Option::is_none")]
    pub existing_access_key_id: Option<Existing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_secret_access_key: Option<Existing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_session_token: Option<Existing>,
}

impl Spec {
    pub fn is_zero(&self) -> bool {
        self.name.is_empty()
            && self.cron.is_empty()
            && self.bucket.is_empty()
            && self.endpoint.is_empty()
            && self.region.is_empty()
            && self.timestamp.is_empty()
            && self.access_key_id.as_ref().map_or(true, Secret::is_zero)
            && self.existing_access_key_id.as_ref().map_or(true, Existing::is_zero)
            && self.secret_access_key.as_ref().map_or(true, Secret::is_zero)
            && self.existing_secret_access_key.as_ref().map_or(true, Existing::is_zero)
            && self.session_token.as_ref().map_or(true, Secret::is_zero)
            && self.existing_session_token.as_ref().map_or(true, Existing::is_zero)
    }
}

fn secret_env(name: &str, secret_name: &str, field: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret_name.to_string()),
                key: field.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Adapt an S3 backup document into its feature-gated branches.
pub fn adapt(namespace: &str, tree: &Tree, features: &[Feature]) -> Result<Adapted> {
    let spec: Spec = tree.parse_spec().context("parsing s3 backup spec")?;
    let name = spec.name.clone();
    let secret_name = backup_name(&name);

    let slot = |secret: &Option<Secret>| -> SecretSlot { Arc::new(Mutex::new(secret.clone().unwrap_or_default())) };
    let access_key_id = slot(&spec.access_key_id);
    let secret_access_key = slot(&spec.secret_access_key);
    let session_token = slot(&spec.session_token);

    let mut adapted = Adapted::new(Vec::new(), Vec::new());
    adapted.secrets.insert(ACCESS_KEY_ID_FIELD.to_string(), access_key_id.clone());
    adapted.secrets.insert(SECRET_ACCESS_KEY_FIELD.to_string(), secret_access_key.clone());
    adapted.secrets.insert(SESSION_TOKEN_FIELD.to_string(), session_token.clone());
    for (field, existing) in [
        (ACCESS_KEY_ID_FIELD, &spec.existing_access_key_id),
        (SECRET_ACCESS_KEY_FIELD, &spec.existing_secret_access_key),
        (SESSION_TOKEN_FIELD, &spec.existing_session_token),
    ] {
        if let Some(existing) = existing {
            adapted.existing.insert(field.to_string(), existing.clone());
        }
    }

    let branch = |kind: BranchKind| BackupBranch {
        kind,
        namespace: namespace.to_string(),
        name: name.clone(),
        schedule: spec.cron.clone(),
        destination: format!("s3://{}", spec.bucket),
        timestamp: spec.timestamp.clone(),
        certs_secret: root_client_secret_name(),
        env: vec![
            secret_env("AWS_ACCESS_KEY_ID", &secret_name, ACCESS_KEY_ID_FIELD),
            secret_env("AWS_SECRET_ACCESS_KEY", &secret_name, SECRET_ACCESS_KEY_FIELD),
            secret_env("AWS_SESSION_TOKEN", &secret_name, SESSION_TOKEN_FIELD),
            EnvVar {
                name: "AWS_ENDPOINT".into(),
                value: Some(spec.endpoint.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "AWS_REGION".into(),
                value: Some(spec.region.clone()),
                ..Default::default()
            },
        ],
        volumes: Vec::new(),
        mounts: Vec::new(),
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
            fields: vec![
                (ACCESS_KEY_ID_FIELD.to_string(), access_key_id),
                (SECRET_ACCESS_KEY_FIELD.to_string(), secret_access_key),
                (SESSION_TOKEN_FIELD.to_string(), session_token),
            ],
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
                    max_wait: S3_JOB_TIMEOUT,
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
                    max_wait: S3_JOB_TIMEOUT,
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
