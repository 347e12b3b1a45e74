//! Corral error abstractions.

use thiserror::Error;

/// Planning error variants.
///
/// Planning errors are raised before any cluster mutation has happened for
/// the affected branch. Execution failures (apply/delete/wait) are plain
/// `anyhow` errors carrying their API context.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The desired-state document could not be parsed into its kind spec.
    #[error("parsing desired state failed: {0}")]
    ParseDesired(String),
    /// The desired-state document names a kind no adapter handles.
    #[error("unknown kind {0}")]
    UnknownKind(String),
    /// A feature tag does not map to any orchestration branch.
    #[error("unknown feature {0}")]
    UnknownFeature(String),
    /// A consumer needed the database current state before it was registered.
    #[error("no current state for database found")]
    NoDatabaseState,
    /// Client certificate derivation ran before the CA was populated.
    #[error("no ca certificate found")]
    NoCaCertificate,
    /// The node secret is absent and generation is disallowed.
    #[error("node secret not found")]
    NodeSecretNotFound,
}
