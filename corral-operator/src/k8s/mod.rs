//! The cluster client capability surface.
//!
//! Every component of the reconciliation engine talks to Kubernetes through
//! the [`KubeClient`] trait rather than a concrete client, so the engine can
//! be exercised against a recording stand-in. All operations are synchronous
//! in effect: callers await them inline, the engine never fans out.
//!
//! `apply_*` uses Server-Side Apply and is idempotent; `delete_*` treats an
//! already-absent object as success. The `wait_until_*` primitives poll the
//! API and block the calling pass for up to the caller-supplied timeout.

mod api;
#[cfg(test)]
pub mod mock;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::batch::v1beta1::CronJob;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1beta1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};

pub use api::KubeApi;

/// The app name used by the operator, also its SSA field manager.
pub const APP_NAME: &str = "corral-operator";

/// Cluster access used by the reconciliation engine.
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn apply_secret(&self, secret: &Secret) -> Result<()>;
    async fn apply_job(&self, job: &Job) -> Result<()>;
    async fn apply_cron_job(&self, cron_job: &CronJob) -> Result<()>;
    async fn apply_service(&self, service: &Service) -> Result<()>;
    async fn apply_role(&self, role: &Role) -> Result<()>;
    async fn apply_cluster_role(&self, role: &ClusterRole) -> Result<()>;
    async fn apply_role_binding(&self, binding: &RoleBinding) -> Result<()>;
    async fn apply_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()>;
    async fn apply_service_account(&self, account: &ServiceAccount) -> Result<()>;
    async fn apply_stateful_set(&self, set: &StatefulSet) -> Result<()>;
    async fn apply_pod_disruption_budget(&self, budget: &PodDisruptionBudget) -> Result<()>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_pod_disruption_budget(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_role(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_cluster_role(&self, name: &str) -> Result<()>;
    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<()>;
    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_secrets(&self, namespace: &str, selector: &str) -> Result<Vec<Secret>>;
    async fn list_persistent_volume_claims(&self, namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>>;

    async fn wait_until_job_completed(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()>;
    async fn wait_until_stateful_set_ready(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()>;
    async fn scale_stateful_set(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;
}
