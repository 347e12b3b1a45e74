//! Desired-state tree structure.
//!
//! A reconciliation pass is driven by a list of YAML documents, each carrying
//! a `kind`/`version` header and a kind-specific `spec` block. The header
//! determines which adapter parses the spec; unknown kinds are a hard error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PlanningError;

/// The document header shared by every kind.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Common {
    /// The kind of the document, e.g. `databases.caos.ch/CockroachDB`.
    pub kind: String,
    /// The version of the kind's spec schema, e.g. `v0`.
    pub version: String,
    /// Enable verbose reconciliation logging for this document.
    #[serde(default, skip_serializing_if = "is_false")]
    pub verbose: bool,
}

/// A desired-state document: header plus the still-unparsed spec block.
///
/// Constructed once per reconciliation pass and discarded afterwards. The
/// spec is held as a raw YAML value until the kind's adapter parses it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Tree {
    #[serde(flatten)]
    pub common: Common,
    #[serde(default = "null_value", skip_serializing_if = "is_null")]
    pub spec: serde_yaml::Value,
}

impl Tree {
    /// Parse a single desired-state document.
    pub fn from_yaml(document: &str) -> Result<Self, PlanningError> {
        serde_yaml::from_str(document).map_err(|err| PlanningError::ParseDesired(err.to_string()))
    }

    /// Parse a list of desired-state documents.
    ///
    /// List order is the order in which the pass reconciles the documents,
    /// so a database document must come before the backups referencing it.
    pub fn list_from_yaml(document: &str) -> Result<Vec<Self>, PlanningError> {
        serde_yaml::from_str(document).map_err(|err| PlanningError::ParseDesired(err.to_string()))
    }

    /// Parse the spec block into the kind's typed spec.
    pub fn parse_spec<S: DeserializeOwned>(&self) -> Result<S, PlanningError> {
        serde_yaml::from_value(self.spec.clone())
            .map_err(|err| PlanningError::ParseDesired(format!("{}: {}", self.common.kind, err)))
    }

    /// Resolve the document's kind, failing on kinds no adapter handles.
    pub fn kind(&self) -> Result<Kind, PlanningError> {
        Kind::parse(&self.common.kind)
    }
}

/// The closed set of kinds the operator reconciles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// A managed CockroachDB cluster.
    CockroachDb,
    /// A scheduled or one-shot backup against a GCS bucket.
    BucketBackup,
    /// A scheduled or one-shot backup against an S3-compatible store.
    S3Backup,
    /// An externally managed database, provided as a static list of
    /// databases and users for backup planning.
    ProvidedDatabase,
}

impl Kind {
    /// Parse a kind string from a document header.
    pub fn parse(kind: &str) -> Result<Self, PlanningError> {
        match kind {
            "databases.caos.ch/CockroachDB" => Ok(Self::CockroachDb),
            "databases.caos.ch/BucketBackup" => Ok(Self::BucketBackup),
            "databases.caos.ch/S3Backup" => Ok(Self::S3Backup),
            "databases.caos.ch/ProvidedDatabase" => Ok(Self::ProvidedDatabase),
            other => Err(PlanningError::UnknownKind(other.to_string())),
        }
    }

    /// The kind string as persisted in document headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CockroachDb => "databases.caos.ch/CockroachDB",
            Self::BucketBackup => "databases.caos.ch/BucketBackup",
            Self::S3Backup => "databases.caos.ch/S3Backup",
            Self::ProvidedDatabase => "databases.caos.ch/ProvidedDatabase",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn is_false(val: &bool) -> bool {
    !*val
}

fn null_value() -> serde_yaml::Value {
    serde_yaml::Value::Null
}

fn is_null(val: &serde_yaml::Value) -> bool {
    val.is_null()
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
