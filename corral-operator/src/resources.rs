//! Thin adapters from built Kubernetes objects to the engine's shapes.
//!
//! Each adapter wraps exactly one object (or one named deletion) and lifts
//! it into an [`Ensurer`] or [`Destroyer`]. No planning logic lives here;
//! a built object either gets applied verbatim or its name gets deleted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::batch::v1beta1::CronJob;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1beta1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};

use crate::k8s::KubeClient;
use crate::reconcile::{ensurer_as_querier, BoxedQuerier, Destroyer, Ensurer};

/// Lift a one-resource ensure action into the general querier shape.
///
/// The adapter needs no observed state, so its planning step is trivial.
pub fn resource_querier<E: Ensurer + 'static>(ensurer: E) -> BoxedQuerier {
    ensurer_as_querier(Arc::new(ensurer))
}

/// Set the canonical labels on an object controlled by Corral.
pub fn set_canonical_labels(labels: &mut BTreeMap<String, String>) {
    labels.insert("app".into(), "corral".into());
    labels.insert("corral.dev/controlled-by".into(), "corral-operator".into());
}

macro_rules! ensure_adapter {
    ($name:ident, $obj:ty, $method:ident) => {
        pub struct $name(pub $obj);

        #[async_trait]
        impl Ensurer for $name {
            async fn apply(&self, kube: &dyn KubeClient) -> Result<()> {
                kube.$method(&self.0).await
            }
        }
    };
}

ensure_adapter!(EnsureSecret, Secret, apply_secret);
ensure_adapter!(EnsureJob, Job, apply_job);
ensure_adapter!(EnsureCronJob, CronJob, apply_cron_job);
ensure_adapter!(EnsureService, Service, apply_service);
ensure_adapter!(EnsureRole, Role, apply_role);
ensure_adapter!(EnsureClusterRole, ClusterRole, apply_cluster_role);
ensure_adapter!(EnsureRoleBinding, RoleBinding, apply_role_binding);
ensure_adapter!(EnsureClusterRoleBinding, ClusterRoleBinding, apply_cluster_role_binding);
ensure_adapter!(EnsureServiceAccount, ServiceAccount, apply_service_account);
ensure_adapter!(EnsureStatefulSet, StatefulSet, apply_stateful_set);
ensure_adapter!(EnsurePodDisruptionBudget, PodDisruptionBudget, apply_pod_disruption_budget);

macro_rules! destroy_adapter {
    ($name:ident, $method:ident) => {
        pub struct $name {
            pub namespace: String,
            pub name: String,
        }

        #[async_trait]
        impl Destroyer for $name {
            async fn destroy(&self, kube: &dyn KubeClient) -> Result<()> {
                kube.$method(&self.namespace, &self.name).await
            }
        }
    };
}

destroy_adapter!(DestroySecret, delete_secret);
destroy_adapter!(DestroyJob, delete_job);
destroy_adapter!(DestroyCronJob, delete_cron_job);
destroy_adapter!(DestroyService, delete_service);
destroy_adapter!(DestroyStatefulSet, delete_stateful_set);
destroy_adapter!(DestroyRole, delete_role);
destroy_adapter!(DestroyRoleBinding, delete_role_binding);
destroy_adapter!(DestroyServiceAccount, delete_service_account);
destroy_adapter!(DestroyPodDisruptionBudget, delete_pod_disruption_budget);

/// Deletes a cluster-scoped RBAC object.
pub struct DestroyClusterRole {
    pub name: String,
}

#[async_trait]
impl Destroyer for DestroyClusterRole {
    async fn destroy(&self, kube: &dyn KubeClient) -> Result<()> {
        kube.delete_cluster_role(&self.name).await
    }
}

pub struct DestroyClusterRoleBinding {
    pub name: String,
}

#[async_trait]
impl Destroyer for DestroyClusterRoleBinding {
    async fn destroy(&self, kube: &dyn KubeClient) -> Result<()> {
        kube.delete_cluster_role_binding(&self.name).await
    }
}

/// Deletes every secret matching a label selector.
///
/// Used for certificate teardown where the exact secret names are not
/// tracked; the deletions are independent and non-transactional.
pub struct DestroySecretsBySelector {
    pub namespace: String,
    pub selector: String,
}

#[async_trait]
impl Destroyer for DestroySecretsBySelector {
    async fn destroy(&self, kube: &dyn KubeClient) -> Result<()> {
        let secrets = kube.list_secrets(&self.namespace, &self.selector).await?;
        for secret in secrets {
            let name = match secret.metadata.name.as_ref() {
                Some(name) => name,
                None => continue,
            };
            kube.delete_secret(&self.namespace, name).await?;
        }
        Ok(())
    }
}

/// Deletes every persistent volume claim matching a label selector.
///
/// StatefulSet deletion leaves its claims behind; teardown removes them by
/// the labels stamped onto the claim template.
pub struct DestroyPersistentVolumeClaimsBySelector {
    pub namespace: String,
    pub selector: String,
}

#[async_trait]
impl Destroyer for DestroyPersistentVolumeClaimsBySelector {
    async fn destroy(&self, kube: &dyn KubeClient) -> Result<()> {
        let claims = kube.list_persistent_volume_claims(&self.namespace, &self.selector).await?;
        for claim in claims {
            let name = match claim.metadata.name.as_ref() {
                Some(name) => name,
                None => continue,
            };
            kube.delete_persistent_volume_claim(&self.namespace, name).await?;
        }
        Ok(())
    }
}

/// Blocks until the named statefulset reports all replicas ready.
///
/// Wrapped via [`resource_querier`] this acts as a readiness gate placed
/// before dependent resource applies in an ordered querier list.
pub struct WaitStatefulSetReady {
    pub namespace: String,
    pub name: String,
    pub max_wait: Duration,
}

#[async_trait]
impl Ensurer for WaitStatefulSetReady {
    async fn apply(&self, kube: &dyn KubeClient) -> Result<()> {
        kube.wait_until_stateful_set_ready(&self.namespace, &self.name, self.max_wait).await
    }
}
