//! Kind dispatch from desired-state documents to reconciliation artifacts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use corral_core::secret::{Existing, Secret};
use corral_core::tree::{Kind, Tree};

use crate::backup::{bucket, s3, Feature};
use crate::config::Config;
use crate::reconcile::{BoxedDestroyer, BoxedQuerier};

/// A credential value shared between a kind spec and the queriers consuming
/// it. The caller resolves the slot (decryption, `existing` lookup) after
/// adaptation but before planning, and the queriers read it at plan time.
pub type SecretSlot = Arc<Mutex<Secret>>;

/// The reconciliation artifacts one desired-state document adapts into.
pub struct Adapted {
    /// Planning steps in the exact order their side effects must occur.
    pub queriers: Vec<BoxedQuerier>,
    /// Teardown steps in the exact order teardown must occur.
    pub destroyers: Vec<BoxedDestroyer>,
    /// Credential slots keyed by field name.
    pub secrets: HashMap<String, SecretSlot>,
    /// References to already-present cluster secrets, keyed like `secrets`.
    pub existing: HashMap<String, Existing>,
}

impl Adapted {
    pub fn new(queriers: Vec<BoxedQuerier>, destroyers: Vec<BoxedDestroyer>) -> Self {
        Self {
            queriers,
            destroyers,
            secrets: HashMap::new(),
            existing: HashMap::new(),
        }
    }
}

/// Adapt one desired-state document via its kind's adapter.
pub fn adapt(tree: &Tree, config: &Config, features: &[Feature]) -> Result<Adapted> {
    match tree.kind()? {
        Kind::CockroachDb => crate::cockroach::adapt(tree, config, features),
        Kind::BucketBackup => bucket::adapt(&config.namespace, tree, features),
        Kind::S3Backup => s3::adapt(&config.namespace, tree, features),
        Kind::ProvidedDatabase => crate::database::provided::adapt(tree),
    }
}
