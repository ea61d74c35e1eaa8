//! Executes a spawn plan on a pool of worker threads.
//!
//! Units are fed in plan order through a bounded `crossbeam-channel`, so the
//! most urgent units reach a worker first and the feeder blocks once the
//! queue is full. Each worker is a named OS thread with its own
//! single-threaded tokio runtime driving the [`FixExecutor`].
//!
//! Per unit a worker picks a pattern from the ledger, leases a resource,
//! applies the fix, records the outcome and always releases the lease.
//! Ledger failures are logged and never fail the unit.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::core::executor::{FixExecutor, FixJob, FixReport, PatternSource};
use crate::core::ledger::PatternLedger;
use crate::core::pattern::Pattern;
use crate::core::planner::{SpawnPlan, SpawnUnit};
use crate::core::resource_pool::{LeaseDescriptor, PoolRegistry};
use crate::core::DispatchError;
use crate::util::serde::{AttemptId, PlanId, ResourceId};

/// How one unit ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// The executor reported success.
    Fixed,
    /// The executor ran and reported failure.
    Unfixed,
    /// No lease became available in time.
    Starved,
    /// The unit could not run.
    Failed {
        /// Why.
        reason: String,
    },
}

/// Result of one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    /// The unit.
    pub unit: SpawnUnit,
    /// Outcome.
    pub outcome: UnitOutcome,
    /// Provenance of the pattern used.
    pub source: PatternSource,
    /// Resource the fix ran on.
    pub resource_id: Option<ResourceId>,
    /// Idempotency key of the attempt.
    pub attempt_id: AttemptId,
}

/// Aggregate result of a dispatch run, units in plan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Plan executed.
    pub plan_id: PlanId,
    /// Per-unit results in plan order.
    pub results: Vec<UnitResult>,
    /// Units fixed.
    pub fixed: usize,
    /// Units that ran without fixing.
    pub unfixed: usize,
    /// Units that got no lease.
    pub starved: usize,
    /// Units that could not run.
    pub failed: usize,
}

impl DispatchReport {
    fn new(plan_id: PlanId, results: Vec<UnitResult>) -> Self {
        let count = |f: fn(&UnitOutcome) -> bool| results.iter().filter(|r| f(&r.outcome)).count();
        Self {
            fixed: count(|o| matches!(o, UnitOutcome::Fixed)),
            unfixed: count(|o| matches!(o, UnitOutcome::Unfixed)),
            starved: count(|o| matches!(o, UnitOutcome::Starved)),
            failed: count(|o| matches!(o, UnitOutcome::Failed { .. })),
            plan_id,
            results,
        }
    }
}

/// Runs plans against a pool registry and a pattern ledger.
pub struct Dispatcher<E: FixExecutor> {
    pools: Arc<PoolRegistry>,
    ledger: Arc<PatternLedger>,
    executor: E,
    config: DispatcherConfig,
}

impl<E: FixExecutor> Dispatcher<E> {
    /// Create a dispatcher.
    ///
    /// # Errors
    ///
    /// `Config` when the dispatcher config is invalid.
    pub fn new(
        pools: Arc<PoolRegistry>,
        ledger: Arc<PatternLedger>,
        executor: E,
        config: DispatcherConfig,
    ) -> Result<Self, DispatchError> {
        config.validate().map_err(DispatchError::Config)?;
        Ok(Self {
            pools,
            ledger,
            executor,
            config,
        })
    }

    /// Dispatcher configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Execute every unit of `plan` and block until all are done.
    ///
    /// # Errors
    ///
    /// `NotFound` when the configured pool does not exist; `Backend` when
    /// worker threads cannot be spawned.
    pub fn run(&self, plan: &SpawnPlan) -> Result<DispatchReport, DispatchError> {
        self.pools.snapshot(&self.config.pool)?;
        if plan.units.is_empty() {
            return Ok(DispatchReport::new(plan.id.clone(), Vec::new()));
        }

        let worker_count = self.config.worker_count.min(plan.units.len()).max(1);
        let (unit_tx, unit_rx) = bounded::<(usize, SpawnUnit)>(self.config.queue_depth.max(1));
        let (result_tx, result_rx) = unbounded::<(usize, UnitResult)>();
        info!(
            plan = %plan.id,
            units = plan.units.len(),
            workers = worker_count,
            pool = %self.config.pool,
            "dispatch started"
        );

        // Senders move into the scope closure so they drop (and idle workers
        // exit) before the scope joins, even on an early return.
        thread::scope(move |scope| -> Result<(), DispatchError> {
            for worker_id in 0..worker_count {
                let rx = unit_rx.clone();
                let tx = result_tx.clone();
                let executor = self.executor.clone();
                thread::Builder::new()
                    .name(format!("fix-worker-{worker_id}"))
                    .stack_size(self.config.thread_stack_size)
                    .spawn_scoped(scope, move || self.worker_loop(worker_id, &rx, &tx, &executor))
                    .map_err(|e| {
                        DispatchError::Backend(format!("cannot spawn worker {worker_id}: {e}"))
                    })?;
            }
            drop(unit_rx);
            drop(result_tx);

            for (seq, unit) in plan.units.iter().cloned().enumerate() {
                if unit_tx.send((seq, unit)).is_err() {
                    warn!(
                        plan = %plan.id,
                        seq,
                        "all workers exited; remaining units not dispatched"
                    );
                    break;
                }
            }
            Ok(())
        })?;

        let mut slots: Vec<Option<UnitResult>> = vec![None; plan.units.len()];
        for (seq, result) in result_rx.try_iter() {
            slots[seq] = Some(result);
        }
        let results: Vec<UnitResult> = slots
            .into_iter()
            .zip(&plan.units)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| UnitResult {
                    unit: unit.clone(),
                    outcome: UnitOutcome::Failed {
                        reason: "not dispatched".into(),
                    },
                    source: PatternSource::None,
                    resource_id: None,
                    attempt_id: AttemptId::new(),
                })
            })
            .collect();

        let report = DispatchReport::new(plan.id.clone(), results);
        info!(
            plan = %plan.id,
            fixed = report.fixed,
            unfixed = report.unfixed,
            starved = report.starved,
            failed = report.failed,
            "dispatch finished"
        );
        Ok(report)
    }

    fn worker_loop(
        &self,
        worker_id: usize,
        rx: &Receiver<(usize, SpawnUnit)>,
        tx: &Sender<(usize, UnitResult)>,
        executor: &E,
    ) {
        debug!(worker_id, "worker started");
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(worker_id, error = %e, "failed to create worker runtime");
                return;
            }
        };

        for (seq, unit) in rx {
            let result = self.run_unit(worker_id, &rt, executor, unit);
            if tx.send((seq, result)).is_err() {
                break;
            }
        }
        debug!(worker_id, "worker channel closed, exiting");
    }

    fn run_unit(
        &self,
        worker_id: usize,
        rt: &tokio::runtime::Runtime,
        executor: &E,
        unit: SpawnUnit,
    ) -> UnitResult {
        let attempt_id = AttemptId::new();
        let holder = format!("{}#{}@fix-worker-{worker_id}", unit.class_code, unit.instance_index);
        let (pattern, source) = self.choose_pattern(&unit);

        let lease = match self.acquire(&holder) {
            Ok(lease) => lease,
            Err(err) => {
                let outcome = if err.is_retryable() {
                    warn!(
                        class = %unit.class_code,
                        instance = unit.instance_index,
                        error = %err,
                        "unit starved"
                    );
                    UnitOutcome::Starved
                } else {
                    error!(
                        class = %unit.class_code,
                        instance = unit.instance_index,
                        error = %err,
                        "unit failed"
                    );
                    UnitOutcome::Failed {
                        reason: err.to_string(),
                    }
                };
                return UnitResult {
                    unit,
                    outcome,
                    source,
                    resource_id: None,
                    attempt_id,
                };
            }
        };

        let job = FixJob {
            unit: unit.clone(),
            pattern: pattern.clone(),
            source,
            attempt_id: attempt_id.clone(),
        };
        let report = rt.block_on(executor.apply(job, lease.clone()));
        self.record(&unit, pattern.as_ref(), source, &report, &attempt_id);

        if let Err(err) = self.pools.release_lease(&lease) {
            error!(
                pool = %lease.pool,
                resource = %lease.resource_id,
                error = %err,
                "failed to release lease"
            );
        }

        UnitResult {
            unit,
            outcome: if report.success {
                UnitOutcome::Fixed
            } else {
                UnitOutcome::Unfixed
            },
            source,
            resource_id: Some(lease.resource_id),
            attempt_id,
        }
    }

    fn acquire(&self, holder: &str) -> Result<LeaseDescriptor, DispatchError> {
        match self.config.acquire_timeout_ms {
            Some(ms) => self
                .pools
                .acquire(&self.config.pool, holder, Duration::from_millis(ms)),
            None => self.pools.acquire_default(&self.config.pool, holder),
        }
    }

    fn choose_pattern(&self, unit: &SpawnUnit) -> (Option<Pattern>, PatternSource) {
        match self.ledger.best(&unit.class_code) {
            Ok(Some(pattern)) => return (Some(pattern), PatternSource::Exact),
            Ok(None) => {}
            Err(err) => warn!(class = %unit.class_code, error = %err, "pattern lookup failed"),
        }
        match self.ledger.find_similar(&unit.class_code, &unit.message) {
            Ok(similar) => similar
                .into_iter()
                .next()
                .map_or((None, PatternSource::None), |p| (Some(p), PatternSource::Similar)),
            Err(err) => {
                warn!(class = %unit.class_code, error = %err, "similar pattern lookup failed");
                (None, PatternSource::None)
            }
        }
    }

    fn record(
        &self,
        unit: &SpawnUnit,
        pattern: Option<&Pattern>,
        source: PatternSource,
        report: &FixReport,
        attempt_id: &AttemptId,
    ) {
        let result = match (source, pattern) {
            (PatternSource::Exact, Some(pattern)) => self
                .ledger
                .record_outcome(&pattern.id, report.success, attempt_id)
                .map(|ack| debug!(ack = ?ack, "outcome acknowledged")),
            (PatternSource::Similar, Some(pattern)) => self
                .ledger
                .adopt(&unit.class_code, pattern, report.success, attempt_id)
                .map(|outcome| debug!(outcome = ?outcome, "sibling pattern adopted")),
            _ => {
                if report.fix_description.is_empty() {
                    debug!(class = %unit.class_code, "nothing to learn from attempt");
                    return;
                }
                self.ledger
                    .learn(
                        &unit.class_code,
                        &report.fix_description,
                        report.success,
                        attempt_id,
                    )
                    .map(|outcome| debug!(outcome = ?outcome, "attempt learned"))
            }
        };
        if let Err(err) = result {
            warn!(
                class = %unit.class_code,
                attempt = %attempt_id,
                error = %err,
                "could not record outcome; continuing"
            );
        }
    }
}
