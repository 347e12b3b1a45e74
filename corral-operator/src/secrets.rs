//! Resolution of credential slots before a pass plans.
//!
//! A kind spec carries credentials either inline or as a reference to a
//! secret already present in the cluster. Inline values win; empty slots
//! with a reference are filled by reading the referenced secret.

use anyhow::{Context, Result};
use async_trait::async_trait;

use corral_core::secret::Existing;

use crate::adapt::Adapted;
use crate::k8s::KubeClient;
use crate::pki::secret_field;

/// Reads the value behind an `existing` secret reference.
#[async_trait]
pub trait SecretReader: Send + Sync {
    async fn read(&self, namespace: &str, existing: &Existing) -> Result<String>;
}

/// Reader backed by the cluster the operator reconciles.
pub struct ClusterSecretReader<'a> {
    pub kube: &'a dyn KubeClient,
}

#[async_trait]
impl SecretReader for ClusterSecretReader<'_> {
    async fn read(&self, namespace: &str, existing: &Existing) -> Result<String> {
        let secret = self
            .kube
            .get_secret(namespace, &existing.name)
            .await?
            .with_context(|| format!("referenced secret {} not found", existing.name))?;
        secret_field(&secret, &existing.key)
    }
}

/// Fill the empty credential slots of an adapted document from their
/// `existing` references. Slots holding an inline value are left untouched.
pub async fn resolve_secrets(reader: &dyn SecretReader, namespace: &str, adapted: &Adapted) -> Result<()> {
    for (field, existing) in &adapted.existing {
        if existing.is_zero() {
            continue;
        }
        let slot = match adapted.secrets.get(field) {
            Some(slot) => slot,
            None => continue,
        };
        // The guard must not be held across the read.
        let already_set = !slot.lock().unwrap().value.is_empty();
        if already_set {
            continue;
        }
        let value = reader
            .read(namespace, existing)
            .await
            .with_context(|| format!("error resolving secret reference for {}", field))?;
        slot.lock().unwrap().value = value;
    }
    Ok(())
}
