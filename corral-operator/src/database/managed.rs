//! Current-state backend for the cluster the operator manages itself.
//!
//! Connection details are derived from the reconciled object names, readiness
//! is the statefulset readiness gate, and SQL users map one-to-one onto
//! client certificate secrets. Listing the SQL databases would need a live
//! connection the operator does not hold, so that operation reports an error
//! and orchestrators degrade to an empty list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::k8s::KubeClient;
use crate::pki::{client_cert_destroyer, CertState, ClientCertQuerier, CLIENT_NAME_LABEL, CLIENT_SECRET_SELECTOR};
use crate::reconcile::{BoxedDestroyer, BoxedQuerier};
use crate::resources::{resource_querier, WaitStatefulSetReady};

use super::DatabaseCurrent;

/// How long the readiness gate waits for the statefulset.
const READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const SQL_PORT: u16 = 26257;

pub struct ManagedDatabase {
    pub namespace: String,
    pub cluster_name: String,
    pub cert_state: Arc<CertState>,
    /// Skip client certificate regeneration when the secret already exists.
    pub reuse_client_certs: bool,
}

#[async_trait]
impl DatabaseCurrent for ManagedDatabase {
    fn url(&self) -> String {
        // The public service fronts all healthy members.
        format!("{}-public", self.cluster_name)
    }

    fn port(&self) -> u16 {
        SQL_PORT
    }

    fn ready_querier(&self) -> BoxedQuerier {
        resource_querier(WaitStatefulSetReady {
            namespace: self.namespace.clone(),
            name: self.cluster_name.clone(),
            max_wait: READY_TIMEOUT,
        })
    }

    fn certificate(&self) -> Option<String> {
        self.cert_state.certificate()
    }

    fn certificate_key(&self) -> Option<String> {
        self.cert_state.certificate_key()
    }

    fn set_certificate(&self, pem: &str) {
        self.cert_state.set_certificate(pem);
    }

    fn set_certificate_key(&self, pem: &str) {
        self.cert_state.set_certificate_key(pem);
    }

    fn add_user_querier(&self, user: &str) -> BoxedQuerier {
        Box::new(ClientCertQuerier {
            namespace: self.namespace.clone(),
            cluster_name: self.cluster_name.clone(),
            client: user.to_string(),
            reuse_existing: self.reuse_client_certs,
            state: self.cert_state.clone(),
        })
    }

    fn delete_user_destroyer(&self, user: &str) -> BoxedDestroyer {
        client_cert_destroyer(&self.namespace, Some(user))
    }

    async fn list_users(&self, kube: &dyn KubeClient) -> Result<Vec<String>> {
        let secrets = kube.list_secrets(&self.namespace, CLIENT_SECRET_SELECTOR).await?;
        let mut users: Vec<String> = secrets
            .iter()
            .filter_map(|secret| secret.metadata.labels.as_ref()?.get(CLIENT_NAME_LABEL).cloned())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn list_databases(&self, _kube: &dyn KubeClient) -> Result<Vec<String>> {
        bail!("listing databases requires a sql connection into the cluster")
    }
}
