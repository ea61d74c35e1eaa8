//! Periodic maintenance: pool health checks and ledger expiry.
//!
//! The monitor runs on its own named thread and sleeps on a condition
//! variable between ticks, so [`HealthMonitor::shutdown`] wakes it
//! immediately instead of waiting out the interval.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::core::ledger::{ExpireReport, PatternLedger};
use crate::core::resource_pool::{HealthReport, PoolRegistry};
use crate::core::DispatchError;
use crate::util::clock::duration_ms;

/// Shortest interval between ticks; shorter intervals are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Ledger expiry performed on every tick.
#[derive(Clone)]
struct LedgerExpiry {
    ledger: Arc<PatternLedger>,
    max_idle_days: u64,
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct MonitorTick {
    /// Health reports of the pools that could be checked.
    pub health: Vec<HealthReport>,
    /// Expiry result when ledger expiry is enabled and succeeded.
    pub expired: Option<ExpireReport>,
}

/// Background cadence running `check_health` on every pool.
pub struct HealthMonitor {
    pools: Arc<PoolRegistry>,
    expiry: Option<LedgerExpiry>,
    interval: Duration,
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Monitor for `pools`, ticking every `interval` once started.
    ///
    /// Intervals below [`MIN_INTERVAL`] are raised to it.
    #[must_use]
    pub fn new(pools: Arc<PoolRegistry>, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                requested_ms = duration_ms(interval),
                min_ms = duration_ms(MIN_INTERVAL),
                "health monitor interval raised to minimum"
            );
        }
        Self {
            pools,
            expiry: None,
            interval: interval.max(MIN_INTERVAL),
            stop: Arc::new((Mutex::new(false), Condvar::new())),
            handle: None,
        }
    }

    /// Also expire ledger patterns idle for more than `max_idle_days` on
    /// each tick.
    #[must_use]
    pub fn with_ledger_expiry(mut self, ledger: Arc<PatternLedger>, max_idle_days: u64) -> Self {
        self.expiry = Some(LedgerExpiry {
            ledger,
            max_idle_days,
        });
        self
    }

    /// Run one pass now. Per-pool failures are logged and skipped.
    #[must_use]
    pub fn tick(&self) -> MonitorTick {
        run_tick(&self.pools, self.expiry.as_ref())
    }

    /// Start the background thread. Calling it twice is a no-op.
    ///
    /// # Errors
    ///
    /// `Backend` when the thread cannot be spawned.
    pub fn start(&mut self) -> Result<(), DispatchError> {
        if self.handle.is_some() {
            return Ok(());
        }
        *self.stop.0.lock() = false;
        let pools = Arc::clone(&self.pools);
        let expiry = self.expiry.clone();
        let stop = Arc::clone(&self.stop);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("fix-health-monitor".into())
            .spawn(move || {
                info!(interval_ms = duration_ms(interval), "health monitor started");
                loop {
                    {
                        let (flag, condvar) = &*stop;
                        let mut stopped = flag.lock();
                        if !*stopped {
                            condvar.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    let _ = run_tick(&pools, expiry.as_ref());
                }
                info!("health monitor stopped");
            })
            .map_err(|e| DispatchError::Backend(format!("cannot spawn health monitor: {e}")))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Interval between ticks.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the background thread is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the background thread and wait for it.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let (flag, condvar) = &*self.stop;
            *flag.lock() = true;
            condvar.notify_all();
        }
        if handle.join().is_err() {
            warn!("health monitor thread panicked");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_tick(pools: &PoolRegistry, expiry: Option<&LedgerExpiry>) -> MonitorTick {
    let mut tick = MonitorTick::default();
    match pools.list() {
        Ok(names) => {
            for name in names {
                match pools.check_health(&name) {
                    Ok(report) => tick.health.push(report),
                    Err(err) => warn!(pool = %name, error = %err, "health check failed"),
                }
            }
        }
        Err(err) => warn!(error = %err, "cannot list pools"),
    }
    if let Some(expiry) = expiry {
        match expiry.ledger.expire(expiry.max_idle_days) {
            Ok(report) => tick.expired = Some(report),
            Err(err) => warn!(error = %err, "ledger expiry failed"),
        }
    }
    debug!(pools = tick.health.len(), "monitor tick");
    tick
}
