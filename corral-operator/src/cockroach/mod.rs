//! The managed CockroachDB cluster adapter.
//!
//! Adapts a cluster document into the full ordered querier list: RBAC first,
//! then certificates, then the services and the statefulset, then the
//! disruption budget. Teardown runs the mirror image, scaling the cluster
//! down first and releasing the volume claims last.

mod builders;

#[cfg(test)]
mod cockroach_test;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use corral_core::tree::Tree;

use crate::adapt::Adapted;
use crate::backup::Feature;
use crate::config::Config;
use crate::database::managed::ManagedDatabase;
use crate::database::{DatabaseCurrent, RegisterDatabase};
use crate::k8s::KubeClient;
use crate::pki::{client_secret_name, node_cert_destroyer, CertState, NodeCertQuerier, CLIENT_SECRET_SELECTOR};
use crate::reconcile::{BoxedDestroyer, BoxedQuerier, Destroyer};
use crate::resources::{
    resource_querier, DestroyClusterRole, DestroyClusterRoleBinding, DestroyPersistentVolumeClaimsBySelector,
    DestroyPodDisruptionBudget, DestroyRole, DestroyRoleBinding, DestroySecretsBySelector, DestroyService,
    DestroyServiceAccount, DestroyStatefulSet, EnsureClusterRole, EnsureClusterRoleBinding, EnsurePodDisruptionBudget,
    EnsureRole, EnsureRoleBinding, EnsureService, EnsureServiceAccount, EnsureStatefulSet,
};

/// The fixed cluster object name. Interop-critical: certificates, service
/// DNS names and backup jobs all address the cluster under this name.
pub const CLUSTER_NAME: &str = "cockroachdb";

pub const SQL_PORT: i32 = 26257;
pub const HTTP_PORT: i32 = 8080;

const DEFAULT_IMAGE: &str = "cockroachdb/cockroach:v21.2.5";
const DEFAULT_STORAGE_CAPACITY: &str = "5Gi";

/// Name of the secret carrying the root client certificate.
pub fn root_client_secret_name() -> String {
    client_secret_name(CLUSTER_NAME, "root")
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Spec {
    pub replica_count: i32,
    pub storage_capacity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    pub image: String,
    /// SQL users beyond `root` to hold client certificates.
    pub users: Vec<String>,
}

impl Spec {
    fn replicas(&self) -> i32 {
        if self.replica_count > 0 {
            self.replica_count
        } else {
            1
        }
    }

    fn image(&self) -> &str {
        if self.image.is_empty() {
            DEFAULT_IMAGE
        } else {
            &self.image
        }
    }

    fn storage_capacity(&self) -> &str {
        if self.storage_capacity.is_empty() {
            DEFAULT_STORAGE_CAPACITY
        } else {
            &self.storage_capacity
        }
    }
}

/// Adapt a cluster document.
///
/// The database registration is always planned so that backup documents can
/// resolve the current state; the cluster resources themselves are gated on
/// the `database` feature.
pub fn adapt(tree: &Tree, config: &Config, features: &[Feature]) -> Result<Adapted> {
    let spec: Spec = tree.parse_spec().context("parsing cockroachdb spec")?;
    let namespace = config.namespace.clone();

    let cert_state = Arc::new(CertState::default());
    let database = Arc::new(ManagedDatabase {
        namespace: namespace.clone(),
        cluster_name: CLUSTER_NAME.to_string(),
        cert_state: cert_state.clone(),
        reuse_client_certs: config.reuse_client_certs,
    });

    let mut queriers: Vec<BoxedQuerier> = vec![Box::new(RegisterDatabase {
        database: database.clone() as Arc<dyn DatabaseCurrent>,
    })];

    if features.contains(&Feature::Database) {
        queriers.push(resource_querier(EnsureServiceAccount(builders::service_account(&namespace))));
        queriers.push(resource_querier(EnsureRole(builders::role(&namespace))));
        queriers.push(resource_querier(EnsureRoleBinding(builders::role_binding(&namespace))));
        queriers.push(resource_querier(EnsureClusterRole(builders::cluster_role())));
        queriers.push(resource_querier(EnsureClusterRoleBinding(builders::cluster_role_binding(&namespace))));
        queriers.push(Box::new(NodeCertQuerier {
            namespace: namespace.clone(),
            cluster_name: CLUSTER_NAME.to_string(),
            cluster_dns: config.cluster_dns.clone(),
            generate_if_not_exists: config.generate_node_certs,
            state: cert_state,
        }));
        queriers.push(database.add_user_querier("root"));
        for user in &spec.users {
            queriers.push(database.add_user_querier(user));
        }
        queriers.push(resource_querier(EnsureService(builders::headless_service(&namespace))));
        queriers.push(resource_querier(EnsureService(builders::public_service(&namespace))));
        queriers.push(resource_querier(EnsureStatefulSet(builders::stateful_set(&namespace, &spec))));
        queriers.push(resource_querier(EnsurePodDisruptionBudget(builders::pod_disruption_budget(&namespace))));
    }

    let mut destroyers: Vec<BoxedDestroyer> = Vec::new();
    if features.contains(&Feature::Database) {
        destroyers.push(Box::new(ScaleDownStatefulSet {
            namespace: namespace.clone(),
            name: CLUSTER_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroyPodDisruptionBudget {
            namespace: namespace.clone(),
            name: builders::PDB_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroyStatefulSet {
            namespace: namespace.clone(),
            name: CLUSTER_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroyService {
            namespace: namespace.clone(),
            name: builders::public_service_name(),
        }));
        destroyers.push(Box::new(DestroyService {
            namespace: namespace.clone(),
            name: CLUSTER_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroySecretsBySelector {
            namespace: namespace.clone(),
            selector: CLIENT_SECRET_SELECTOR.to_string(),
        }));
        destroyers.push(node_cert_destroyer(&namespace));
        destroyers.push(Box::new(DestroyRoleBinding {
            namespace: namespace.clone(),
            name: CLUSTER_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroyClusterRoleBinding {
            name: CLUSTER_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroyRole {
            namespace: namespace.clone(),
            name: CLUSTER_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroyClusterRole {
            name: CLUSTER_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroyServiceAccount {
            namespace: namespace.clone(),
            name: CLUSTER_NAME.to_string(),
        }));
        destroyers.push(Box::new(DestroyPersistentVolumeClaimsBySelector {
            namespace,
            selector: builders::cluster_selector(),
        }));
    }

    Ok(Adapted::new(queriers, destroyers))
}

/// Scales the statefulset to zero so teardown does not race running members.
struct ScaleDownStatefulSet {
    namespace: String,
    name: String,
}

#[async_trait]
impl Destroyer for ScaleDownStatefulSet {
    async fn destroy(&self, kube: &dyn KubeClient) -> Result<()> {
        kube.scale_stateful_set(&self.namespace, &self.name, 0).await
    }
}
