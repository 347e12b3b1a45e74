//! Live [`KubeClient`] implementation on top of the `kube` client.

use std::fmt::Debug;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::batch::v1beta1::CronJob;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1beta1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::client::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use crate::k8s::{KubeClient, APP_NAME};

/// The default timeout to use for single API calls.
///
/// The `wait_until_*` primitives are bounded by their caller-supplied
/// timeout instead; each individual poll still uses this value.
const API_TIMEOUT: Duration = Duration::from_secs(5);
/// The interval between polls while waiting on job/statefulset state.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Cluster access backed by the real Kubernetes API.
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Apply the given namespaced object using Server-Side Apply.
    async fn apply_namespaced<K>(&self, obj: &K, kind: &str) -> Result<()>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let (namespace, name) = object_coordinates(obj, kind)?;
        tracing::info!(%name, %namespace, kind, "applying object");
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let mut params = PatchParams::apply(APP_NAME);
        params.force = true; // This will still be blocked by the server if we do not have the most up-to-date object info.
        timeout(API_TIMEOUT, api.patch(&name, &params, &Patch::Apply(obj)))
            .await
            .with_context(|| format!("timeout while applying {}", kind))?
            .with_context(|| format!("error applying {}", kind))?;
        Ok(())
    }

    /// Apply the given cluster-scoped object using Server-Side Apply.
    async fn apply_cluster_scoped<K>(&self, obj: &K, kind: &str) -> Result<()>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let name = obj.meta().name.clone().with_context(|| format!("{} has no name", kind))?;
        tracing::info!(%name, kind, "applying object");
        let api: Api<K> = Api::all(self.client.clone());
        let mut params = PatchParams::apply(APP_NAME);
        params.force = true;
        timeout(API_TIMEOUT, api.patch(&name, &params, &Patch::Apply(obj)))
            .await
            .with_context(|| format!("timeout while applying {}", kind))?
            .with_context(|| format!("error applying {}", kind))?;
        Ok(())
    }

    /// Delete the named namespaced object, treating NOT_FOUND as success.
    async fn delete_namespaced<K>(&self, namespace: &str, name: &str, kind: &str) -> Result<()>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        tracing::info!(%name, %namespace, kind, "deleting object");
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let res = timeout(API_TIMEOUT, api.delete(name, &Default::default()))
            .await
            .with_context(|| format!("timeout while deleting {}", kind))?;
        match res {
            Ok(_val) => Ok(()),
            Err(err) => match err {
                kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND => Ok(()),
                _ => Err(err).with_context(|| format!("error deleting {}", kind)),
            },
        }
    }

    /// Delete the named cluster-scoped object, treating NOT_FOUND as success.
    async fn delete_cluster_scoped<K>(&self, name: &str, kind: &str) -> Result<()>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        tracing::info!(%name, kind, "deleting object");
        let api: Api<K> = Api::all(self.client.clone());
        let res = timeout(API_TIMEOUT, api.delete(name, &Default::default()))
            .await
            .with_context(|| format!("timeout while deleting {}", kind))?;
        match res {
            Ok(_val) => Ok(()),
            Err(err) => match err {
                kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND => Ok(()),
                _ => Err(err).with_context(|| format!("error deleting {}", kind)),
            },
        }
    }

    /// Fetch the named object, mapping NOT_FOUND to `None`.
    async fn get_namespaced<K>(&self, namespace: &str, name: &str, kind: &str) -> Result<Option<K>>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let res = timeout(API_TIMEOUT, api.get(name))
            .await
            .with_context(|| format!("timeout while fetching {}", kind))?;
        match res {
            Ok(val) => Ok(Some(val)),
            Err(err) => match err {
                kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND => Ok(None),
                _ => Err(err).with_context(|| format!("error fetching {}", kind)),
            },
        }
    }

    /// List objects in the namespace matching the given label selector.
    async fn list_namespaced<K>(&self, namespace: &str, selector: &str, kind: &str) -> Result<Vec<K>>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams {
            label_selector: Some(selector.to_string()),
            ..Default::default()
        };
        let list = timeout(API_TIMEOUT, api.list(&lp))
            .await
            .with_context(|| format!("timeout while listing {}", kind))?
            .with_context(|| format!("error listing {}", kind))?;
        Ok(list.items)
    }
}

#[async_trait]
impl KubeClient for KubeApi {
    async fn apply_secret(&self, secret: &Secret) -> Result<()> {
        self.apply_namespaced(secret, "Secret").await
    }

    async fn apply_job(&self, job: &Job) -> Result<()> {
        self.apply_namespaced(job, "Job").await
    }

    async fn apply_cron_job(&self, cron_job: &CronJob) -> Result<()> {
        self.apply_namespaced(cron_job, "CronJob").await
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        self.apply_namespaced(service, "Service").await
    }

    async fn apply_role(&self, role: &Role) -> Result<()> {
        self.apply_namespaced(role, "Role").await
    }

    async fn apply_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        self.apply_cluster_scoped(role, "ClusterRole").await
    }

    async fn apply_role_binding(&self, binding: &RoleBinding) -> Result<()> {
        self.apply_namespaced(binding, "RoleBinding").await
    }

    async fn apply_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()> {
        self.apply_cluster_scoped(binding, "ClusterRoleBinding").await
    }

    async fn apply_service_account(&self, account: &ServiceAccount) -> Result<()> {
        self.apply_namespaced(account, "ServiceAccount").await
    }

    async fn apply_stateful_set(&self, set: &StatefulSet) -> Result<()> {
        self.apply_namespaced(set, "StatefulSet").await
    }

    async fn apply_pod_disruption_budget(&self, budget: &PodDisruptionBudget) -> Result<()> {
        self.apply_namespaced(budget, "PodDisruptionBudget").await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        self.get_namespaced(namespace, name, "Job").await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.get_namespaced(namespace, name, "Secret").await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<Secret>(namespace, name, "Secret").await
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<Job>(namespace, name, "Job").await
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<CronJob>(namespace, name, "CronJob").await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<Service>(namespace, name, "Service").await
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<StatefulSet>(namespace, name, "StatefulSet").await
    }

    async fn delete_pod_disruption_budget(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<PodDisruptionBudget>(namespace, name, "PodDisruptionBudget").await
    }

    async fn delete_role(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<Role>(namespace, name, "Role").await
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<()> {
        self.delete_cluster_scoped::<ClusterRole>(name, "ClusterRole").await
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<RoleBinding>(namespace, name, "RoleBinding").await
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<()> {
        self.delete_cluster_scoped::<ClusterRoleBinding>(name, "ClusterRoleBinding").await
    }

    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<ServiceAccount>(namespace, name, "ServiceAccount").await
    }

    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_namespaced::<PersistentVolumeClaim>(namespace, name, "PersistentVolumeClaim").await
    }

    async fn list_secrets(&self, namespace: &str, selector: &str) -> Result<Vec<Secret>> {
        self.list_namespaced(namespace, selector, "Secret").await
    }

    async fn list_persistent_volume_claims(&self, namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        self.list_namespaced(namespace, selector, "PersistentVolumeClaim").await
    }

    #[tracing::instrument(level = "debug", skip(self, max_wait))]
    async fn wait_until_job_completed(&self, namespace: &str, name: &str, max_wait: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let job = self
                .get_job(namespace, name)
                .await
                .context("error polling job while waiting for completion")?;
            if job_completed(job.as_ref()) {
                return Ok(());
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                bail!("timeout while waiting for job {} to complete", name);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    #[tracing::instrument(level = "debug", skip(self, max_wait))]
    async fn wait_until_stateful_set_ready(&self, namespace: &str, name: &str, max_wait: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let set: Option<StatefulSet> = self
                .get_namespaced(namespace, name, "StatefulSet")
                .await
                .context("error polling statefulset while waiting for readiness")?;
            if stateful_set_ready(set.as_ref()) {
                return Ok(());
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                bail!("timeout while waiting for statefulset {} to become ready", name);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn scale_stateful_set(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        tracing::info!(%name, %namespace, replicas, "scaling statefulset");
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        timeout(API_TIMEOUT, api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await
            .context("timeout while scaling statefulset")?
            .context("error scaling statefulset")?;
        Ok(())
    }
}

/// Extract namespace and name from an object about to be applied.
fn object_coordinates<K>(obj: &K, kind: &str) -> Result<(String, String)>
where
    K: Resource,
{
    let name = obj.meta().name.clone().with_context(|| format!("{} has no name", kind))?;
    let namespace = obj
        .meta()
        .namespace
        .clone()
        .with_context(|| format!("{} {} has no namespace", kind, name))?;
    Ok((namespace, name))
}

/// True if the job reports at least one succeeded pod.
fn job_completed(job: Option<&Job>) -> bool {
    job.and_then(|job| job.status.as_ref())
        .and_then(|status| status.succeeded)
        .map(|succeeded| succeeded > 0)
        .unwrap_or(false)
}

/// True if every desired replica of the statefulset reports ready.
fn stateful_set_ready(set: Option<&StatefulSet>) -> bool {
    let set = match set {
        Some(set) => set,
        None => return false,
    };
    let desired = set.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(0);
    let ready = set
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);
    desired > 0 && ready >= desired
}
