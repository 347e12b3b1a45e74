//! The composable reconciliation algebra.
//!
//! ## Overview
//! Every piece of managed state is reconciled through the same two-phase
//! shape: a *planning* step which inspects the cluster and the desired spec
//! and produces a deferred action, and an *execution* step which performs the
//! idempotent "make it so" side effect. The split is load-bearing: a planning
//! failure aborts a branch before any mutation happened, while an execution
//! failure leaves earlier mutations in place and relies on the next
//! reconciliation pass to converge.
//!
//! ## Ordering
//! Callers assemble querier/destroyer lists in the exact order side effects
//! must occur (RBAC before StatefulSet before readiness gate before backup
//! CronJob). The combinators preserve list order and introduce no
//! parallelism or reordering. A wrongly ordered list is a wrong
//! reconciliation, not a detected error.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use corral_core::error::PlanningError;

use crate::database::DatabaseCurrent;
use crate::k8s::KubeClient;

#[cfg(test)]
mod reconcile_test;

pub type BoxedQuerier = Box<dyn Querier>;
pub type BoxedEnsurer = Box<dyn Ensurer>;
pub type BoxedDestroyer = Box<dyn Destroyer>;

/// The planning phase for creating-or-updating a piece of managed state.
#[async_trait]
pub trait Querier: Send + Sync {
    /// Plan the branch against the cluster and the state observed so far in
    /// this pass, returning the deferred action. No mutation happens here.
    async fn plan(&self, kube: &dyn KubeClient, observed: &mut Observed) -> Result<BoxedEnsurer>;
}

/// The deferred mutating action produced by a successful planning step.
#[async_trait]
pub trait Ensurer: Send + Sync {
    async fn apply(&self, kube: &dyn KubeClient) -> Result<()>;
}

/// The deferred teardown action. Must tolerate already-absent state.
#[async_trait]
pub trait Destroyer: Send + Sync {
    async fn destroy(&self, kube: &dyn KubeClient) -> Result<()>;
}

/// State observed or derived during a single reconciliation pass.
///
/// Mutated additively by queriers and read by later queriers of the same
/// pass. Single-writer, single-pass usage only; the pass runs on one task.
#[derive(Default)]
pub struct Observed {
    database: Option<Arc<dyn DatabaseCurrent>>,
}

impl Observed {
    /// Register the database current state for this pass.
    ///
    /// Exactly one registration per pass is expected; a second registration
    /// replaces the first, which matches re-running the database querier.
    pub fn set_database(&mut self, database: Arc<dyn DatabaseCurrent>) {
        self.database = Some(database);
    }

    /// The database current state, failing fast when no database document
    /// was reconciled earlier in the pass.
    pub fn database(&self) -> Result<Arc<dyn DatabaseCurrent>, PlanningError> {
        self.database.clone().ok_or(PlanningError::NoDatabaseState)
    }
}

/// Evaluate every querier in order and collapse their planned actions into
/// one ordered ensurer.
///
/// With `stop_on_first_error` a planning failure short-circuits: later
/// queriers are not evaluated. Without it, every querier is attempted and
/// the planning failures are aggregated into one error. In both cases a
/// planning failure yields no ensurer at all, so no mutation from this list
/// happens.
pub async fn sequence_queriers(
    stop_on_first_error: bool,
    queriers: &[BoxedQuerier],
    kube: &dyn KubeClient,
    observed: &mut Observed,
) -> Result<BoxedEnsurer> {
    let mut ensurers = Vec::with_capacity(queriers.len());
    let mut failures: Vec<String> = Vec::new();
    for querier in queriers {
        match querier.plan(kube, observed).await {
            Ok(ensurer) => ensurers.push(ensurer),
            Err(err) if stop_on_first_error => return Err(err),
            Err(err) => {
                tracing::error!(error = ?err, "planning step failed");
                failures.push(format!("{:#}", err));
            }
        }
    }
    if !failures.is_empty() {
        bail!("planning failed: {}", failures.join("; "));
    }
    Ok(Box::new(SequencedEnsurer { ensurers }))
}

/// Collapse destroyers into one ordered, best-effort teardown action.
///
/// Unlike the ensure path, a failing destroyer never blocks the remaining
/// ones: each failure is logged and the first error is surfaced only after
/// every destroyer ran. Partial cleanup must not wedge the teardown.
pub fn sequence_destroyers(destroyers: Vec<BoxedDestroyer>) -> BoxedDestroyer {
    Box::new(SequencedDestroyer { destroyers })
}

/// Lift a plain idempotent action into the querier shape.
///
/// The action needs no planning step; wrapping it lets readiness gates and
/// similar waits be interleaved positionally with resource queries in an
/// ordered list.
pub fn ensurer_as_querier(ensurer: Arc<dyn Ensurer>) -> BoxedQuerier {
    Box::new(EnsurerQuerier { ensurer })
}

/// An ensurer with nothing left to do; used when planning determined the
/// observed state already matches the desired state.
pub fn noop_ensurer() -> BoxedEnsurer {
    Box::new(NoopEnsurer)
}

/// A querier whose planned action does nothing.
pub fn noop_querier() -> BoxedQuerier {
    Box::new(NoopQuerier)
}

/// A destroyer with nothing to tear down.
pub fn noop_destroyer() -> BoxedDestroyer {
    Box::new(NoopDestroyer)
}

struct SequencedEnsurer {
    ensurers: Vec<BoxedEnsurer>,
}

#[async_trait]
impl Ensurer for SequencedEnsurer {
    async fn apply(&self, kube: &dyn KubeClient) -> Result<()> {
        // Fail fast: an execution error abandons the remaining ensures of
        // this list. Already-applied ones are not rolled back; the next
        // pass re-reconciles from scratch.
        for ensurer in &self.ensurers {
            ensurer.apply(kube).await?;
        }
        Ok(())
    }
}

struct SequencedDestroyer {
    destroyers: Vec<BoxedDestroyer>,
}

#[async_trait]
impl Destroyer for SequencedDestroyer {
    async fn destroy(&self, kube: &dyn KubeClient) -> Result<()> {
        let mut first_error = None;
        for destroyer in &self.destroyers {
            if let Err(err) = destroyer.destroy(kube).await {
                tracing::error!(error = ?err, "destroy step failed, continuing teardown");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct EnsurerQuerier {
    ensurer: Arc<dyn Ensurer>,
}

#[async_trait]
impl Querier for EnsurerQuerier {
    async fn plan(&self, _kube: &dyn KubeClient, _observed: &mut Observed) -> Result<BoxedEnsurer> {
        Ok(Box::new(SharedEnsurer { ensurer: self.ensurer.clone() }))
    }
}

/// An [`Ensurer`] shared behind an `Arc`, so one action can be handed out
/// by repeated planning runs.
pub struct SharedEnsurer {
    pub ensurer: Arc<dyn Ensurer>,
}

#[async_trait]
impl Ensurer for SharedEnsurer {
    async fn apply(&self, kube: &dyn KubeClient) -> Result<()> {
        self.ensurer.apply(kube).await
    }
}

struct NoopEnsurer;

#[async_trait]
impl Ensurer for NoopEnsurer {
    async fn apply(&self, _kube: &dyn KubeClient) -> Result<()> {
        Ok(())
    }
}

struct NoopQuerier;

#[async_trait]
impl Querier for NoopQuerier {
    async fn plan(&self, _kube: &dyn KubeClient, _observed: &mut Observed) -> Result<BoxedEnsurer> {
        Ok(noop_ensurer())
    }
}

struct NoopDestroyer;

#[async_trait]
impl Destroyer for NoopDestroyer {
    async fn destroy(&self, _kube: &dyn KubeClient) -> Result<()> {
        Ok(())
    }
}
