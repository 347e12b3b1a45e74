//! The database current-state registry.
//!
//! [`DatabaseCurrent`] is the narrow capability surface any database backend
//! must satisfy for backup/restore/clean planning: connection info, a
//! readiness gate, CA material accessors, and per-user provisioning hooks.
//! Two implementations exist: the managed backend wired to the reconciled
//! cluster, and a provided list standing in for an externally-operated
//! database.

pub mod managed;
pub mod provided;


use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::k8s::KubeClient;
use crate::reconcile::{noop_ensurer, BoxedDestroyer, BoxedEnsurer, BoxedQuerier, Observed, Querier};

/// The current state of the database a reconciliation pass targets.
#[async_trait]
pub trait DatabaseCurrent: Send + Sync {
    /// Host under which clients reach the database.
    fn url(&self) -> String;
    /// SQL port.
    fn port(&self) -> u16;
    /// A querier blocking until the database accepts connections.
    fn ready_querier(&self) -> BoxedQuerier;

    /// PEM-encoded CA certificate, if populated this pass.
    fn certificate(&self) -> Option<String>;
    /// PEM-encoded CA private key, if populated this pass.
    fn certificate_key(&self) -> Option<String>;
    fn set_certificate(&self, pem: &str);
    fn set_certificate_key(&self, pem: &str);

    /// A querier provisioning the given SQL user.
    fn add_user_querier(&self, user: &str) -> BoxedQuerier;
    /// A destroyer deprovisioning the given SQL user.
    fn delete_user_destroyer(&self, user: &str) -> BoxedDestroyer;

    /// The SQL users known to the backend.
    async fn list_users(&self, kube: &dyn KubeClient) -> Result<Vec<String>>;
    /// The databases known to the backend.
    async fn list_databases(&self, kube: &dyn KubeClient) -> Result<Vec<String>>;
}

/// Registers a database backend as the pass's current state.
///
/// Composed first in a database document's querier list so that every later
/// querier of the pass finds the registration.
pub struct RegisterDatabase {
    pub database: Arc<dyn DatabaseCurrent>,
}

#[async_trait]
impl Querier for RegisterDatabase {
    async fn plan(&self, _kube: &dyn KubeClient, observed: &mut Observed) -> Result<BoxedEnsurer> {
        observed.set_database(self.database.clone());
        Ok(noop_ensurer())
    }
}

/// Gates dependent applies on the registered database being ready.
///
/// Resolved against the observed state at planning time, so it must sit
/// after the database document in the pass order.
pub struct DatabaseReadyGate;

#[async_trait]
impl Querier for DatabaseReadyGate {
    async fn plan(&self, kube: &dyn KubeClient, observed: &mut Observed) -> Result<BoxedEnsurer> {
        let database = observed.database()?;
        database.ready_querier().plan(kube, observed).await
    }
}
