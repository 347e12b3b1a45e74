use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::*;
use crate::k8s::mock::MockKube;

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct RecordingQuerier {
    index: usize,
    log: Log,
    fail_plan: bool,
    fail_apply: bool,
}

impl RecordingQuerier {
    fn ok(index: usize, log: &Log) -> BoxedQuerier {
        Box::new(Self { index, log: log.clone(), fail_plan: false, fail_apply: false })
    }

    fn failing_plan(index: usize, log: &Log) -> BoxedQuerier {
        Box::new(Self { index, log: log.clone(), fail_plan: true, fail_apply: false })
    }

    fn failing_apply(index: usize, log: &Log) -> BoxedQuerier {
        Box::new(Self { index, log: log.clone(), fail_plan: false, fail_apply: true })
    }
}

#[async_trait]
impl Querier for RecordingQuerier {
    async fn plan(&self, _kube: &dyn KubeClient, _observed: &mut Observed) -> Result<BoxedEnsurer> {
        self.log.push(format!("plan-{}", self.index));
        if self.fail_plan {
            bail!("planned failure in querier {}", self.index);
        }
        Ok(Box::new(RecordingEnsurer {
            index: self.index,
            log: self.log.clone(),
            fail_apply: self.fail_apply,
        }))
    }
}

struct RecordingEnsurer {
    index: usize,
    log: Log,
    fail_apply: bool,
}

#[async_trait]
impl Ensurer for RecordingEnsurer {
    async fn apply(&self, _kube: &dyn KubeClient) -> Result<()> {
        self.log.push(format!("apply-{}", self.index));
        if self.fail_apply {
            bail!("planned failure in ensurer {}", self.index);
        }
        Ok(())
    }
}

struct RecordingDestroyer {
    index: usize,
    log: Log,
    fail: bool,
}

#[async_trait]
impl Destroyer for RecordingDestroyer {
    async fn destroy(&self, _kube: &dyn KubeClient) -> Result<()> {
        self.log.push(format!("destroy-{}", self.index));
        if self.fail {
            bail!("planned failure in destroyer {}", self.index);
        }
        Ok(())
    }
}

#[tokio::test]
async fn queriers_plan_and_apply_in_input_order() -> Result<()> {
    let kube = MockKube::new();
    let log = Log::default();
    let queriers: Vec<BoxedQuerier> = (0..4).map(|idx| RecordingQuerier::ok(idx, &log)).collect();
    let mut observed = Observed::default();

    let ensurer = sequence_queriers(true, &queriers, &kube, &mut observed).await?;
    assert!(
        log.entries() == vec!["plan-0", "plan-1", "plan-2", "plan-3"],
        "planning must run in input order, got {:?}",
        log.entries()
    );

    ensurer.apply(&kube).await?;
    assert!(
        log.entries() == vec!["plan-0", "plan-1", "plan-2", "plan-3", "apply-0", "apply-1", "apply-2", "apply-3"],
        "execution must run in the same order, got {:?}",
        log.entries()
    );
    Ok(())
}

#[tokio::test]
async fn ensure_failure_abandons_remaining_ensures() -> Result<()> {
    let kube = MockKube::new();
    let log = Log::default();
    let queriers = vec![
        RecordingQuerier::ok(0, &log),
        RecordingQuerier::failing_apply(1, &log),
        RecordingQuerier::ok(2, &log),
    ];
    let mut observed = Observed::default();

    let ensurer = sequence_queriers(true, &queriers, &kube, &mut observed).await?;
    let res = ensurer.apply(&kube).await;
    assert!(res.is_err(), "combined ensure must surface the execution error");

    let applies: Vec<_> = log.entries().into_iter().filter(|entry| entry.starts_with("apply")).collect();
    assert!(
        applies == vec!["apply-0", "apply-1"],
        "ensures after the failing one must not run, got {:?}",
        applies
    );
    Ok(())
}

#[tokio::test]
async fn planning_failure_stops_early_when_requested() -> Result<()> {
    let kube = MockKube::new();
    let log = Log::default();
    let queriers = vec![
        RecordingQuerier::ok(0, &log),
        RecordingQuerier::failing_plan(1, &log),
        RecordingQuerier::ok(2, &log),
    ];
    let mut observed = Observed::default();

    let res = sequence_queriers(true, &queriers, &kube, &mut observed).await;
    assert!(res.is_err(), "planning failure must surface");
    assert!(
        log.entries() == vec!["plan-0", "plan-1"],
        "queriers after the failing one must not be evaluated, got {:?}",
        log.entries()
    );
    Ok(())
}

#[tokio::test]
async fn planning_failures_aggregate_when_not_stopping_early() -> Result<()> {
    let kube = MockKube::new();
    let log = Log::default();
    let queriers = vec![
        RecordingQuerier::failing_plan(0, &log),
        RecordingQuerier::ok(1, &log),
        RecordingQuerier::failing_plan(2, &log),
    ];
    let mut observed = Observed::default();

    let res = sequence_queriers(false, &queriers, &kube, &mut observed).await;
    let err = match res {
        Err(err) => format!("{:#}", err),
        Ok(_) => panic!("aggregated planning failure expected"),
    };
    assert!(
        log.entries() == vec!["plan-0", "plan-1", "plan-2"],
        "every querier must be attempted, got {:?}",
        log.entries()
    );
    assert!(
        err.contains("querier 0") && err.contains("querier 2"),
        "both failures must be reported, got {}",
        err
    );
    Ok(())
}

#[tokio::test]
async fn destroy_is_best_effort() -> Result<()> {
    let kube = MockKube::new();
    let log = Log::default();
    let destroyers: Vec<BoxedDestroyer> = vec![
        Box::new(RecordingDestroyer { index: 0, log: log.clone(), fail: false }),
        Box::new(RecordingDestroyer { index: 1, log: log.clone(), fail: true }),
        Box::new(RecordingDestroyer { index: 2, log: log.clone(), fail: false }),
    ];

    let destroyer = sequence_destroyers(destroyers);
    let res = destroyer.destroy(&kube).await;
    assert!(res.is_err(), "first destroy error must be surfaced after the full run");
    assert!(
        log.entries() == vec!["destroy-0", "destroy-1", "destroy-2"],
        "destroyers after a failing one must still run exactly once, got {:?}",
        log.entries()
    );
    Ok(())
}

#[tokio::test]
async fn missing_database_state_is_a_planning_error() {
    let observed = Observed::default();
    let err = match observed.database() {
        Err(err) => err,
        Ok(_) => panic!("expected missing database state error"),
    };
    assert!(
        err.to_string() == "no current state for database found",
        "unexpected error message, got {}",
        err
    );
}
