//! Current-state backend for an externally operated database.
//!
//! The document carries the connection details and the user/database lists
//! verbatim, so planning can proceed without the operator managing the
//! cluster. Readiness and user provisioning are no-ops here; whoever runs
//! the database owns those.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use corral_core::tree::Tree;

use crate::adapt::Adapted;
use crate::k8s::KubeClient;
use crate::pki::CertState;
use crate::reconcile::{noop_destroyer, noop_querier, BoxedDestroyer, BoxedQuerier};

use super::{DatabaseCurrent, RegisterDatabase};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Spec {
    pub url: String,
    pub port: u16,
    pub users: Vec<String>,
    pub databases: Vec<String>,
}

pub struct ProvidedDatabase {
    spec: Spec,
    cert_state: Arc<CertState>,
}

impl ProvidedDatabase {
    pub fn new(spec: Spec) -> Self {
        Self {
            spec,
            cert_state: Arc::new(CertState::default()),
        }
    }
}

#[async_trait]
impl DatabaseCurrent for ProvidedDatabase {
    fn url(&self) -> String {
        self.spec.url.clone()
    }

    fn port(&self) -> u16 {
        self.spec.port
    }

    fn ready_querier(&self) -> BoxedQuerier {
        noop_querier()
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

    fn add_user_querier(&self, _user: &str) -> BoxedQuerier {
        noop_querier()
    }

    fn delete_user_destroyer(&self, _user: &str) -> BoxedDestroyer {
        noop_destroyer()
    }

    async fn list_users(&self, _kube: &dyn KubeClient) -> Result<Vec<String>> {
        Ok(self.spec.users.clone())
    }

    async fn list_databases(&self, _kube: &dyn KubeClient) -> Result<Vec<String>> {
        Ok(self.spec.databases.clone())
    }
}

/// Adapt a provided-database document. The only planned action is the
/// registration; there is nothing to apply or tear down.
pub fn adapt(tree: &Tree) -> Result<Adapted> {
    let spec: Spec = tree.parse_spec().context("parsing provided database spec")?;
    let database: Arc<dyn DatabaseCurrent> = Arc::new(ProvidedDatabase::new(spec));
    Ok(Adapted::new(
        vec![Box::new(RegisterDatabase { database })],
        vec![],
    ))
}
