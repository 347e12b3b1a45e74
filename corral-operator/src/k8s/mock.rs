//! A recording stand-in for [`KubeClient`] used by engine tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::batch::v1beta1::CronJob;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1beta1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::ObjectMeta;

use crate::k8s::KubeClient;

/// One recorded cluster API call, keyed by object name.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    ApplySecret(String),
    ApplyJob(String),
    ApplyCronJob(String),
    ApplyService(String),
    ApplyRole(String),
    ApplyClusterRole(String),
    ApplyRoleBinding(String),
    ApplyClusterRoleBinding(String),
    ApplyServiceAccount(String),
    ApplyStatefulSet(String),
    ApplyPodDisruptionBudget(String),
    GetJob(String),
    GetSecret(String),
    DeleteSecret(String),
    DeleteJob(String),
    DeleteCronJob(String),
    DeleteService(String),
    DeleteStatefulSet(String),
    DeletePodDisruptionBudget(String),
    DeleteRole(String),
    DeleteClusterRole(String),
    DeleteRoleBinding(String),
    DeleteClusterRoleBinding(String),
    DeleteServiceAccount(String),
    DeletePersistentVolumeClaim(String),
    ListSecrets(String),
    ListPersistentVolumeClaims(String),
    WaitJob(String),
    WaitStatefulSet(String),
    ScaleStatefulSet(String, i32),
}

/// Recording cluster client. All operations succeed; list results are
/// seeded per label selector.
#[derive(Default)]
pub struct MockKube {
    pub calls: Mutex<Vec<Call>>,
    /// Secrets returned by `list_secrets`, keyed by label selector.
    pub secrets_by_selector: Mutex<HashMap<String, Vec<Secret>>>,
    /// Secrets returned by `get_secret`, keyed by name.
    pub secrets_by_name: Mutex<HashMap<String, Secret>>,
    /// Every secret object passed to `apply_secret`, for content asserts.
    pub applied_secrets: Mutex<Vec<Secret>>,
}

impl MockKube {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the secrets returned for the given label selector.
    pub fn seed_secrets(&self, selector: &str, secrets: Vec<Secret>) {
        self.secrets_by_selector.lock().unwrap().insert(selector.to_string(), secrets);
    }

    pub fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// The number of recorded calls matching the given predicate.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| pred(call)).count()
    }
}

fn name_of(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

#[async_trait]
impl KubeClient for MockKube {
    async fn apply_secret(&self, secret: &Secret) -> Result<()> {
        self.record(Call::ApplySecret(name_of(&secret.metadata)));
        self.applied_secrets.lock().unwrap().push(secret.clone());
        Ok(())
    }

    async fn apply_job(&self, job: &Job) -> Result<()> {
        self.record(Call::ApplyJob(name_of(&job.metadata)));
        Ok(())
    }

    async fn apply_cron_job(&self, cron_job: &CronJob) -> Result<()> {
        self.record(Call::ApplyCronJob(name_of(&cron_job.metadata)));
        Ok(())
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        self.record(Call::ApplyService(name_of(&service.metadata)));
        Ok(())
    }

    async fn apply_role(&self, role: &Role) -> Result<()> {
        self.record(Call::ApplyRole(name_of(&role.metadata)));
        Ok(())
    }

    async fn apply_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        self.record(Call::ApplyClusterRole(name_of(&role.metadata)));
        Ok(())
    }

    async fn apply_role_binding(&self, binding: &RoleBinding) -> Result<()> {
        self.record(Call::ApplyRoleBinding(name_of(&binding.metadata)));
        Ok(())
    }

    async fn apply_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()> {
        self.record(Call::ApplyClusterRoleBinding(name_of(&binding.metadata)));
        Ok(())
    }

    async fn apply_service_account(&self, account: &ServiceAccount) -> Result<()> {
        self.record(Call::ApplyServiceAccount(name_of(&account.metadata)));
        Ok(())
    }

    async fn apply_stateful_set(&self, set: &StatefulSet) -> Result<()> {
        self.record(Call::ApplyStatefulSet(name_of(&set.metadata)));
        Ok(())
    }

    async fn apply_pod_disruption_budget(&self, budget: &PodDisruptionBudget) -> Result<()> {
        self.record(Call::ApplyPodDisruptionBudget(name_of(&budget.metadata)));
        Ok(())
    }

    async fn get_job(&self, _namespace: &str, name: &str) -> Result<Option<Job>> {
        self.record(Call::GetJob(name.to_string()));
        let mut job = Job::default();
        job.metadata.name = Some(name.to_string());
        Ok(Some(job))
    }

    async fn get_secret(&self, _namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.record(Call::GetSecret(name.to_string()));
        Ok(self.secrets_by_name.lock().unwrap().get(name).cloned())
    }

    async fn delete_secret(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteSecret(name.to_string()));
        Ok(())
    }

    async fn delete_job(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteJob(name.to_string()));
        Ok(())
    }

    async fn delete_cron_job(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteCronJob(name.to_string()));
        Ok(())
    }

    async fn delete_service(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteService(name.to_string()));
        Ok(())
    }

    async fn delete_stateful_set(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteStatefulSet(name.to_string()));
        Ok(())
    }

    async fn delete_pod_disruption_budget(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeletePodDisruptionBudget(name.to_string()));
        Ok(())
    }

    async fn delete_role(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteRole(name.to_string()));
        Ok(())
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<()> {
        self.record(Call::DeleteClusterRole(name.to_string()));
        Ok(())
    }

    async fn delete_role_binding(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteRoleBinding(name.to_string()));
        Ok(())
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<()> {
        self.record(Call::DeleteClusterRoleBinding(name.to_string()));
        Ok(())
    }

    async fn delete_service_account(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteServiceAccount(name.to_string()));
        Ok(())
    }

    async fn delete_persistent_volume_claim(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeletePersistentVolumeClaim(name.to_string()));
        Ok(())
    }

    async fn list_secrets(&self, _namespace: &str, selector: &str) -> Result<Vec<Secret>> {
        self.record(Call::ListSecrets(selector.to_string()));
        Ok(self
            .secrets_by_selector
            .lock()
            .unwrap()
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_persistent_volume_claims(&self, _namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        self.record(Call::ListPersistentVolumeClaims(selector.to_string()));
        Ok(Vec::new())
    }

    async fn wait_until_job_completed(&self, _namespace: &str, name: &str, _max_wait: Duration) -> Result<()> {
        self.record(Call::WaitJob(name.to_string()));
        Ok(())
    }

    async fn wait_until_stateful_set_ready(&self, _namespace: &str, name: &str, _max_wait: Duration) -> Result<()> {
        self.record(Call::WaitStatefulSet(name.to_string()));
        Ok(())
    }

    async fn scale_stateful_set(&self, _namespace: &str, name: &str, replicas: i32) -> Result<()> {
        self.record(Call::ScaleStatefulSet(name.to_string(), replicas));
        Ok(())
    }
}
