//! Certificate bootstrap for the database cluster.
//!
//! ## Bootstrap protocol
//! The node querier is the sole writer of CA material within a pass. It
//! either decodes the CA out of an already-persisted node secret, reuses CA
//! material an external backend pushed into the shared state, or generates a
//! fresh CA, and always leaves the state populated before returning. Client
//! certificate queriers therefore must be composed *after* the node querier;
//! they hard-fail when the CA is still empty.
//!
//! Client certificates are derived fresh on every pass by default (the
//! credentials are short-lived by design); setting `reuse_existing` skips
//! regeneration when the client's secret is already present.

mod ca;

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;

use corral_core::error::PlanningError;

use crate::k8s::KubeClient;
use crate::reconcile::{noop_ensurer, BoxedDestroyer, BoxedEnsurer, Observed, Querier};
use crate::resources::{set_canonical_labels, DestroySecretsBySelector, EnsureSecret};

pub use ca::CertificateAuthority;

/// Persisted secret field names. These are interop-critical: existing
/// clusters were bootstrapped with exactly these keys.
pub const CA_CERT_FIELD: &str = "ca.crt";
pub const CA_KEY_FIELD: &str = "ca.key";
pub const NODE_CERT_FIELD: &str = "node.crt";
pub const NODE_KEY_FIELD: &str = "node.key";

/// Label selecting the node certificate secret.
pub const NODE_SECRET_SELECTOR: &str = "corral.dev/secret-type=node";
/// Label selecting every client certificate secret.
pub const CLIENT_SECRET_SELECTOR: &str = "corral.dev/secret-type=client";
/// Label carrying the client name on client certificate secrets.
pub const CLIENT_NAME_LABEL: &str = "corral.dev/client";

pub fn client_cert_field(client: &str) -> String {
    format!("client.{}.crt", client)
}

pub fn client_key_field(client: &str) -> String {
    format!("client.{}.key", client)
}

pub fn node_secret_name(cluster_name: &str) -> String {
    format!("{}.node", cluster_name)
}

pub fn client_secret_name(cluster_name: &str, client: &str) -> String {
    format!("{}.client.{}", cluster_name, client)
}

pub fn client_secret_selector(client: &str) -> String {
    format!("{},{}={}", CLIENT_SECRET_SELECTOR, CLIENT_NAME_LABEL, client)
}

/// CA material threaded through reconciliation passes.
///
/// Read-then-possibly-regenerated-then-written-back across passes; the node
/// querier is the only writer within a pass.
#[derive(Default)]
pub struct CertState {
    cert_pem: RwLock<String>,
    key_pem: RwLock<String>,
}

impl CertState {
    pub fn certificate(&self) -> Option<String> {
        let cert = self.cert_pem.read().unwrap();
        if cert.is_empty() {
            None
        } else {
            Some(cert.clone())
        }
    }

    pub fn certificate_key(&self) -> Option<String> {
        let key = self.key_pem.read().unwrap();
        if key.is_empty() {
            None
        } else {
            Some(key.clone())
        }
    }

    pub fn set_certificate(&self, pem: &str) {
        *self.cert_pem.write().unwrap() = pem.to_string();
    }

    pub fn set_certificate_key(&self, pem: &str) {
        *self.key_pem.write().unwrap() = pem.to_string();
    }

    pub fn is_populated(&self) -> bool {
        self.certificate().is_some() && self.certificate_key().is_some()
    }
}

/// Guarantees the CA and node certificate exist, and that the shared cert
/// state holds the CA before any client certificate is derived.
pub struct NodeCertQuerier {
    pub namespace: String,
    pub cluster_name: String,
    pub cluster_dns: String,
    /// Refuse to generate a fresh CA when no node secret exists. Regeneration
    /// is dangerous on an already-initialized cluster, so environments where
    /// it must never happen keep this off and treat absence as a hard error.
    pub generate_if_not_exists: bool,
    pub state: std::sync::Arc<CertState>,
}

#[async_trait]
impl Querier for NodeCertQuerier {
    #[tracing::instrument(level = "debug", skip(self, kube, _observed), fields(cluster = %self.cluster_name))]
    async fn plan(&self, kube: &dyn KubeClient, _observed: &mut Observed) -> Result<BoxedEnsurer> {
        let secrets = kube
            .list_secrets(&self.namespace, NODE_SECRET_SELECTOR)
            .await
            .context("error listing node secrets")?;

        if let Some(secret) = secrets.first() {
            // An already-bootstrapped cluster: push its CA into the state so
            // client derivation can rely on it, and change nothing.
            let cert = secret_field(secret, CA_CERT_FIELD)?;
            let key = secret_field(secret, CA_KEY_FIELD)?;
            self.state.set_certificate(&cert);
            self.state.set_certificate_key(&key);
            return Ok(noop_ensurer());
        }

        if !self.generate_if_not_exists {
            return Err(PlanningError::NodeSecretNotFound.into());
        }

        let ca = match (self.state.certificate(), self.state.certificate_key()) {
            // An external backend already supplied CA material this pass.
            (Some(cert), Some(key)) => CertificateAuthority::from_pem(&cert, &key)?,
            _ => {
                tracing::info!(cluster = %self.cluster_name, "generating fresh certificate authority");
                CertificateAuthority::new(&self.cluster_name)?
            }
        };
        self.state.set_certificate(ca.cert_pem());
        self.state.set_certificate_key(ca.key_pem());

        let (node_cert, node_key) = ca.generate_node_cert(&self.cluster_name, &self.namespace, &self.cluster_dns)?;

        let mut data = BTreeMap::new();
        data.insert(CA_CERT_FIELD.to_string(), ca.cert_pem().to_string());
        data.insert(CA_KEY_FIELD.to_string(), ca.key_pem().to_string());
        data.insert(NODE_CERT_FIELD.to_string(), node_cert);
        data.insert(NODE_KEY_FIELD.to_string(), node_key);
        let secret = build_cert_secret(&self.namespace, node_secret_name(&self.cluster_name), "node", None, data);
        Ok(Box::new(EnsureSecret(secret)))
    }
}

/// Derives a client certificate for one logical client name.
///
/// Requires the node querier to have populated the CA state earlier in the
/// same querier list.
pub struct ClientCertQuerier {
    pub namespace: String,
    pub cluster_name: String,
    pub client: String,
    /// Skip regeneration when the client secret already exists.
    pub reuse_existing: bool,
    pub state: std::sync::Arc<CertState>,
}

#[async_trait]
impl Querier for ClientCertQuerier {
    #[tracing::instrument(level = "debug", skip(self, kube, _observed), fields(client = %self.client))]
    async fn plan(&self, kube: &dyn KubeClient, _observed: &mut Observed) -> Result<BoxedEnsurer> {
        if self.reuse_existing {
            let existing = kube
                .list_secrets(&self.namespace, &client_secret_selector(&self.client))
                .await
                .context("error listing client secrets")?;
            if !existing.is_empty() {
                return Ok(noop_ensurer());
            }
        }

        let cert = self.state.certificate().ok_or(PlanningError::NoCaCertificate)?;
        let key = self.state.certificate_key().ok_or(PlanningError::NoCaCertificate)?;
        let ca = CertificateAuthority::from_pem(&cert, &key)?;
        let (client_cert, client_key) = ca.generate_client_cert(&self.client)?;

        let mut data = BTreeMap::new();
        data.insert(CA_CERT_FIELD.to_string(), cert);
        data.insert(client_cert_field(&self.client), client_cert);
        data.insert(client_key_field(&self.client), client_key);
        let secret = build_cert_secret(
            &self.namespace,
            client_secret_name(&self.cluster_name, &self.client),
            "client",
            Some(&self.client),
            data,
        );
        Ok(Box::new(EnsureSecret(secret)))
    }
}

/// Tears down the node certificate secret.
pub fn node_cert_destroyer(namespace: &str) -> BoxedDestroyer {
    Box::new(DestroySecretsBySelector {
        namespace: namespace.to_string(),
        selector: NODE_SECRET_SELECTOR.to_string(),
    })
}

/// Tears down one client's certificate secret, or all of them.
pub fn client_cert_destroyer(namespace: &str, client: Option<&str>) -> BoxedDestroyer {
    let selector = match client {
        Some(client) => client_secret_selector(client),
        None => CLIENT_SECRET_SELECTOR.to_string(),
    };
    Box::new(DestroySecretsBySelector { namespace: namespace.to_string(), selector })
}

fn build_cert_secret(
    namespace: &str,
    name: String,
    secret_type: &str,
    client: Option<&str>,
    data: BTreeMap<String, String>,
) -> Secret {
    let mut secret = Secret::default();
    secret.metadata = ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    let labels = secret.metadata.labels.get_or_insert_with(Default::default);
    set_canonical_labels(labels);
    labels.insert("corral.dev/secret-type".into(), secret_type.into());
    if let Some(client) = client {
        labels.insert(CLIENT_NAME_LABEL.into(), client.into());
    }
    secret.string_data = Some(data);
    secret
}

/// Read a field out of a cluster secret, preferring the binary data map the
/// API fills over the write-side string map.
pub fn secret_field(secret: &Secret, field: &str) -> Result<String> {
    if let Some(data) = secret.data.as_ref().and_then(|data| data.get(field)) {
        return String::from_utf8(data.0.clone()).with_context(|| format!("secret field {} is not valid utf-8", field));
    }
    if let Some(value) = secret.string_data.as_ref().and_then(|data| data.get(field)) {
        return Ok(value.clone());
    }
    anyhow::bail!(
        "secret {} has no {} field",
        secret.metadata.name.as_deref().unwrap_or("<unnamed>"),
        field
    )
}
