//! Named pools of reusable execution resources with exclusive leases and
//! elastic capacity.
//!
//! Each pool lives in one store document (`pools/<name>`) holding its
//! resources and counters. Every status transition and every resize is a
//! transaction on that document, so exactly one caller wins each resource
//! even when several processes share a file-backed store.
//!
//! Waiting acquirers park on a `parking_lot::Condvar` that local releases
//! signal. Waits are bounded by the pool's `acquire_poll_ms`, so releases
//! done by other processes are picked up on the next attempt. Wake order is
//! not FIFO: whichever waiter retries first after a release wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::DispatchError;
use crate::infra::store::{read_json, update_json, validate_key_segment, DocumentStore};
use crate::util::clock::{elapsed_ms, now_ms};
use crate::util::serde::{ResourceId, ResourceKind};

const POOL_PREFIX: &str = "pools";

/// Lease state of a pooled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Available for leasing.
    Idle,
    /// Leased to exactly one holder.
    Active,
}

/// One reusable resource handle owned by a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolResource {
    /// Identifier, unique within the pool.
    pub id: ResourceId,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Current lease state.
    pub status: ResourceStatus,
    /// Requester holding the lease while active.
    pub lease_holder: Option<String>,
    /// Creation timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
    /// Last release (or creation) timestamp.
    pub last_used_at_ms: u128,
    /// When the current lease started.
    pub leased_at_ms: Option<u128>,
    /// Completed leases.
    pub use_count: u64,
}

/// Counters kept alongside the pool's resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Successful acquires.
    pub acquisitions: u64,
    /// Effective releases.
    pub releases: u64,
    /// Acquires that gave up.
    pub timeouts: u64,
    /// Resize operations that added resources.
    pub grow_events: u64,
    /// Resize operations that removed resources.
    pub shrink_events: u64,
    /// Highest number of simultaneously active resources seen.
    pub peak_active: usize,
}

/// Lease handed to the fix executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseDescriptor {
    /// Pool the resource belongs to.
    pub pool: String,
    /// Leased resource.
    pub resource_id: ResourceId,
    /// Resource kind.
    pub kind: ResourceKind,
    /// How the executor reaches the resource.
    pub connection_info: String,
    /// Requester holding the lease.
    pub holder: String,
    /// Lease start in milliseconds since epoch.
    pub leased_at_ms: u128,
}

/// Persisted state of one pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDocument {
    /// Pool name.
    pub name: String,
    /// Configuration the pool was created with.
    pub config: PoolConfig,
    /// All resources, idle and active.
    pub resources: Vec<PoolResource>,
    /// Counters.
    pub stats: PoolStats,
    /// Sequence number for the next resource id.
    pub next_seq: u64,
}

impl PoolDocument {
    fn new(name: &str, config: PoolConfig, now: u128) -> Self {
        let size = config.size;
        let mut doc = Self {
            name: name.to_string(),
            config,
            resources: Vec::with_capacity(size),
            stats: PoolStats::default(),
            next_seq: 0,
        };
        doc.push_resources(size, now);
        doc
    }

    /// Total resources.
    #[must_use]
    pub fn total(&self) -> usize {
        self.resources.len()
    }

    /// Leased resources.
    #[must_use]
    pub fn active(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Active)
            .count()
    }

    /// Available resources.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.total() - self.active()
    }

    /// Describe the first violated pool invariant, if any.
    #[must_use]
    pub fn invariant_violation(&self) -> Option<String> {
        let total = self.total();
        if total < self.config.min_size || total > self.config.max_size {
            return Some(format!(
                "total {total} outside [{}, {}]",
                self.config.min_size, self.config.max_size
            ));
        }
        for r in &self.resources {
            match (r.status, r.lease_holder.is_some()) {
                (ResourceStatus::Active, false) => {
                    return Some(format!("active resource {} has no holder", r.id));
                }
                (ResourceStatus::Idle, true) => {
                    return Some(format!("idle resource {} still has a holder", r.id));
                }
                _ => {}
            }
        }
        None
    }

    fn push_resources(&mut self, n: usize, now: u128) {
        let kind = self.config.resource.kind();
        for _ in 0..n {
            let id = ResourceId::for_pool(&self.name, self.next_seq);
            self.next_seq += 1;
            self.resources.push(PoolResource {
                id,
                kind,
                status: ResourceStatus::Idle,
                lease_holder: None,
                created_at_ms: now,
                last_used_at_ms: now,
                leased_at_ms: None,
                use_count: 0,
            });
        }
    }

    /// Add up to `n` resources without exceeding `max_size`.
    fn grow(&mut self, n: usize, now: u128) -> usize {
        let added = n.min(self.config.max_size.saturating_sub(self.total()));
        if added > 0 {
            self.push_resources(added, now);
            self.stats.grow_events += 1;
        }
        added
    }

    /// Remove up to `n` idle resources, least recently used first, without
    /// going below `min_size`. Active resources are never touched.
    fn shrink(&mut self, n: usize) -> Vec<ResourceId> {
        let budget = n
            .min(self.total().saturating_sub(self.config.min_size))
            .min(self.idle());
        if budget == 0 {
            return Vec::new();
        }
        let mut idle: Vec<(u128, ResourceId)> = self
            .resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Idle)
            .map(|r| (r.last_used_at_ms, r.id.clone()))
            .collect();
        idle.sort();
        let victims: Vec<ResourceId> = idle.into_iter().take(budget).map(|(_, id)| id).collect();
        self.resources
            .retain(|r| r.status == ResourceStatus::Active || !victims.contains(&r.id));
        self.stats.shrink_events += 1;
        victims
    }

    /// Mark the first idle resource active for `holder`.
    fn lease_idle(&mut self, holder: &str, now: u128) -> Option<LeaseDescriptor> {
        let resource = self
            .resources
            .iter_mut()
            .find(|r| r.status == ResourceStatus::Idle)?;
        resource.status = ResourceStatus::Active;
        resource.lease_holder = Some(holder.to_string());
        resource.leased_at_ms = Some(now);
        let lease = LeaseDescriptor {
            pool: self.name.clone(),
            resource_id: resource.id.clone(),
            kind: resource.kind,
            connection_info: self.config.resource.connection_info(&resource.id),
            holder: holder.to_string(),
            leased_at_ms: now,
        };
        self.stats.acquisitions += 1;
        self.stats.peak_active = self.stats.peak_active.max(self.active());
        Some(lease)
    }

    /// Return an active resource to the idle set. `None` when the id is
    /// unknown or the resource was not leased.
    fn release(&mut self, id: &ResourceId, now: u128) -> Option<String> {
        let resource = self
            .resources
            .iter_mut()
            .find(|r| &r.id == id && r.status == ResourceStatus::Active)?;
        resource.status = ResourceStatus::Idle;
        resource.use_count += 1;
        resource.last_used_at_ms = now;
        resource.leased_at_ms = None;
        let holder = resource.lease_holder.take();
        self.stats.releases += 1;
        holder
    }
}

/// Utilization classification produced by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Utilization within thresholds.
    Healthy,
    /// Utilization above the overload threshold.
    Overloaded,
    /// Utilization below the underuse threshold with room to shrink.
    Underutilized,
}

/// Capacity change applied by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeAction {
    /// Nothing changed.
    None,
    /// This many resources were added.
    Grew(usize),
    /// This many idle resources were removed.
    Shrank(usize),
}

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Pool name.
    pub pool: String,
    /// Total resources before resizing.
    pub total: usize,
    /// Active resources.
    pub active: usize,
    /// `active / total` before resizing.
    pub usage: f64,
    /// Classification.
    pub status: HealthStatus,
    /// Resize applied.
    pub action: ResizeAction,
}

/// Pool snapshot data for listing and reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Pool name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Total resources.
    pub total: usize,
    /// Leased resources.
    pub active: usize,
    /// Available resources.
    pub idle: usize,
    /// Lower bound.
    pub min_size: usize,
    /// Upper bound.
    pub max_size: usize,
    /// Counters.
    pub stats: PoolStats,
}

impl From<&PoolDocument> for PoolSnapshot {
    fn from(doc: &PoolDocument) -> Self {
        Self {
            name: doc.name.clone(),
            kind: doc.config.resource.kind(),
            total: doc.total(),
            active: doc.active(),
            idle: doc.idle(),
            min_size: doc.config.min_size,
            max_size: doc.config.max_size,
            stats: doc.stats.clone(),
        }
    }
}

/// Generation counter bumped whenever capacity may have become available.
struct WakeState {
    generation: Mutex<u64>,
    condvar: Condvar,
}

/// Registry of named resource pools over a shared document store.
pub struct PoolRegistry {
    store: Arc<dyn DocumentStore>,
    wake: Arc<WakeState>,
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
}

impl PoolRegistry {
    /// Create a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            wake: Arc::new(WakeState {
                generation: Mutex::new(0),
                condvar: Condvar::new(),
            }),
            audit: None,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(audit)));
        self
    }

    fn key(name: &str) -> String {
        format!("{POOL_PREFIX}/{name}")
    }

    fn record_audit(
        &self,
        pool: &str,
        action: AuditAction,
        resource_id: Option<&ResourceId>,
        holder: Option<&str>,
        detail: Option<String>,
    ) {
        if let Some(audit) = &self.audit {
            audit.lock().record(build_audit_event(
                pool,
                action,
                resource_id.map(ToString::to_string),
                holder.map(str::to_string),
                detail,
            ));
        }
    }

    fn notify_capacity(&self) {
        *self.wake.generation.lock() += 1;
        self.wake.condvar.notify_all();
    }

    /// Run `f` on the pool document inside the critical section. `f` returns
    /// whether it changed the document together with its result.
    fn mutate<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut PoolDocument) -> Result<(bool, R), DispatchError>,
    ) -> Result<R, DispatchError> {
        update_json::<PoolDocument, R, _>(self.store.as_ref(), &Self::key(name), |doc| {
            let mut doc = doc.ok_or_else(|| DispatchError::not_found("pool", name))?;
            let (dirty, out) = f(&mut doc)?;
            Ok((dirty.then_some(doc), out))
        })
    }

    fn load(&self, name: &str) -> Result<PoolDocument, DispatchError> {
        read_json::<PoolDocument>(self.store.as_ref(), &Self::key(name))?
            .ok_or_else(|| DispatchError::not_found("pool", name))
    }

    /// Create pool `name` with `config.size` idle resources.
    ///
    /// # Errors
    ///
    /// `Config` when the name or config is invalid (including `size` outside
    /// `[min_size, max_size]`) or the pool already exists.
    pub fn create(&self, name: &str, config: PoolConfig) -> Result<PoolSnapshot, DispatchError> {
        validate_key_segment(name).map_err(DispatchError::Config)?;
        config
            .validate()
            .map_err(|e| DispatchError::Config(format!("pool `{name}`: {e}")))?;

        let snapshot = update_json::<PoolDocument, PoolSnapshot, _>(
            self.store.as_ref(),
            &Self::key(name),
            |existing| {
                if existing.is_some() {
                    return Err(DispatchError::Config(format!("pool `{name}` already exists")));
                }
                let doc = PoolDocument::new(name, config, now_ms());
                let snapshot = PoolSnapshot::from(&doc);
                Ok((Some(doc), snapshot))
            },
        )?;
        tracing::info!(
            pool = name,
            kind = %snapshot.kind,
            size = snapshot.total,
            min = snapshot.min_size,
            max = snapshot.max_size,
            "pool created"
        );
        Ok(snapshot)
    }

    /// Open pool `name` if it is already persisted, otherwise create it.
    ///
    /// A persisted pool keeps its stored configuration and resources.
    pub fn open_or_create(
        &self,
        name: &str,
        config: PoolConfig,
    ) -> Result<PoolSnapshot, DispatchError> {
        validate_key_segment(name).map_err(DispatchError::Config)?;
        config
            .validate()
            .map_err(|e| DispatchError::Config(format!("pool `{name}`: {e}")))?;

        update_json::<PoolDocument, PoolSnapshot, _>(
            self.store.as_ref(),
            &Self::key(name),
            |existing| match existing {
                Some(doc) => {
                    if doc.config != config {
                        tracing::warn!(
                            pool = name,
                            "persisted pool config differs; keeping stored config"
                        );
                    }
                    Ok((None, PoolSnapshot::from(&doc)))
                }
                None => {
                    let doc = PoolDocument::new(name, config, now_ms());
                    let snapshot = PoolSnapshot::from(&doc);
                    tracing::info!(pool = name, size = snapshot.total, "pool created");
                    Ok((Some(doc), snapshot))
                }
            },
        )
    }

    fn try_acquire(
        &self,
        name: &str,
        requester: &str,
    ) -> Result<Option<LeaseDescriptor>, DispatchError> {
        self.mutate(name, |doc| {
            let now = now_ms();
            if let Some(lease) = doc.lease_idle(requester, now) {
                return Ok((true, Some(lease)));
            }
            if doc.config.grow_on_demand && doc.grow(1, now) == 1 {
                tracing::debug!(pool = name, total = doc.total(), "grew on demand");
                return Ok((true, doc.lease_idle(requester, now)));
            }
            Ok((false, None))
        })
    }

    /// Lease an idle resource of pool `name` for `requester`, waiting up to
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// - `AcquireTimeout` when no resource became available in time
    /// - `LockContention` when the last attempts all lost the store lock
    /// - `NotFound` for an unknown pool
    pub fn acquire(
        &self,
        name: &str,
        requester: &str,
        timeout: Duration,
    ) -> Result<LeaseDescriptor, DispatchError> {
        let poll = Duration::from_millis(self.load(name)?.config.acquire_poll_ms.max(1));
        let start = Instant::now();
        // `None` when the timeout is too large to represent: wait without limit.
        let deadline = start.checked_add(timeout);

        let contention = loop {
            let seen = *self.wake.generation.lock();
            let last_contention = match self.try_acquire(name, requester) {
                Ok(Some(lease)) => {
                    tracing::info!(
                        pool = name,
                        resource = %lease.resource_id,
                        holder = requester,
                        waited_ms = elapsed_ms(start),
                        "lease acquired"
                    );
                    self.record_audit(
                        name,
                        AuditAction::Acquire,
                        Some(&lease.resource_id),
                        Some(requester),
                        None,
                    );
                    return Ok(lease);
                }
                Ok(None) => None,
                Err(err @ DispatchError::LockContention { .. }) => Some(err),
                Err(err) => return Err(err),
            };

            let now = Instant::now();
            let wait = match deadline {
                Some(deadline) if now >= deadline => break last_contention,
                Some(deadline) => (deadline - now).min(poll),
                None => poll,
            };
            let mut generation = self.wake.generation.lock();
            if *generation == seen {
                self.wake.condvar.wait_for(&mut generation, wait);
            }
        };

        let waited_ms = elapsed_ms(start);
        if let Some(err) = contention {
            tracing::warn!(
                pool = name,
                holder = requester,
                waited_ms,
                "acquire gave up on lock contention"
            );
            return Err(err);
        }
        if let Err(err) = self.mutate(name, |doc| {
            doc.stats.timeouts += 1;
            Ok((true, ()))
        }) {
            tracing::debug!(pool = name, error = %err, "could not record acquire timeout");
        }
        self.record_audit(
            name,
            AuditAction::Timeout,
            None,
            Some(requester),
            Some(format!("waited {waited_ms}ms")),
        );
        tracing::warn!(pool = name, holder = requester, waited_ms, "acquire timed out");
        Err(DispatchError::AcquireTimeout {
            pool: name.to_string(),
            waited_ms: u128::from(waited_ms),
        })
    }

    /// [`acquire`](Self::acquire) using the pool's configured timeout.
    pub fn acquire_default(
        &self,
        name: &str,
        requester: &str,
    ) -> Result<LeaseDescriptor, DispatchError> {
        let timeout = Duration::from_millis(self.load(name)?.config.acquire_timeout_ms);
        self.acquire(name, requester, timeout)
    }

    /// Return `resource_id` to pool `name`.
    ///
    /// Returns `false` (and logs) when the id is unknown or the resource was
    /// not leased; the pool is left unchanged in that case.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown pool; store errors.
    pub fn release(&self, name: &str, resource_id: &ResourceId) -> Result<bool, DispatchError> {
        let holder = self.mutate(name, |doc| {
            let holder = doc.release(resource_id, now_ms());
            Ok((holder.is_some(), holder))
        })?;
        let Some(holder) = holder else {
            tracing::warn!(
                pool = name,
                resource = %resource_id,
                "release ignored: unknown or idle resource"
            );
            return Ok(false);
        };
        self.notify_capacity();
        tracing::info!(pool = name, resource = %resource_id, holder = %holder, "lease released");
        self.record_audit(name, AuditAction::Release, Some(resource_id), Some(&holder), None);
        Ok(true)
    }

    /// Release the resource named by `lease`.
    pub fn release_lease(&self, lease: &LeaseDescriptor) -> Result<bool, DispatchError> {
        self.release(&lease.pool, &lease.resource_id)
    }

    /// Add up to `n` resources, bounded by `max_size`. Returns the number
    /// added.
    pub fn grow(&self, name: &str, n: usize) -> Result<usize, DispatchError> {
        let added = self.mutate(name, |doc| {
            let added = doc.grow(n, now_ms());
            Ok((added > 0, added))
        })?;
        if added > 0 {
            self.notify_capacity();
            tracing::info!(pool = name, added, "pool grown");
            self.record_audit(name, AuditAction::Grow, None, None, Some(format!("+{added}")));
        }
        Ok(added)
    }

    /// Remove up to `n` idle resources, bounded by `min_size`. Active
    /// resources are never removed. Returns the number removed.
    pub fn shrink(&self, name: &str, n: usize) -> Result<usize, DispatchError> {
        let removed = self.mutate(name, |doc| {
            let removed = doc.shrink(n);
            Ok((!removed.is_empty(), removed))
        })?;
        if !removed.is_empty() {
            tracing::info!(pool = name, removed = removed.len(), "pool shrunk");
            for id in &removed {
                self.record_audit(name, AuditAction::Shrink, Some(id), None, None);
            }
        }
        Ok(removed.len())
    }

    /// Classify utilization of pool `name` and grow or shrink it
    /// accordingly, all inside one critical section.
    pub fn check_health(&self, name: &str) -> Result<HealthReport, DispatchError> {
        let report = self.mutate(name, |doc| {
            let total = doc.total();
            let active = doc.active();
            #[allow(clippy::cast_precision_loss)]
            let usage = if total == 0 { 1.0 } else { active as f64 / total as f64 };
            let thresholds = doc.config.health.clone();

            let (status, action) = if usage > thresholds.overloaded_above {
                let added = doc.grow(thresholds.grow_step, now_ms());
                let action = if added > 0 {
                    ResizeAction::Grew(added)
                } else {
                    ResizeAction::None
                };
                (HealthStatus::Overloaded, action)
            } else if usage < thresholds.underutilized_below && total > doc.config.min_size {
                let removed = doc.shrink(thresholds.shrink_step).len();
                let action = if removed > 0 {
                    ResizeAction::Shrank(removed)
                } else {
                    ResizeAction::None
                };
                (HealthStatus::Underutilized, action)
            } else {
                (HealthStatus::Healthy, ResizeAction::None)
            };

            let report = HealthReport {
                pool: doc.name.clone(),
                total,
                active,
                usage,
                status,
                action,
            };
            Ok((action != ResizeAction::None, report))
        })?;

        match report.action {
            ResizeAction::Grew(n) => {
                self.notify_capacity();
                self.record_audit(
                    name,
                    AuditAction::Grow,
                    None,
                    None,
                    Some(format!("health +{n}")),
                );
            }
            ResizeAction::Shrank(n) => {
                self.record_audit(
                    name,
                    AuditAction::Shrink,
                    None,
                    None,
                    Some(format!("health -{n}")),
                );
            }
            ResizeAction::None => {}
        }
        if report.status == HealthStatus::Healthy {
            tracing::debug!(pool = name, usage = report.usage, "pool healthy");
        } else {
            tracing::info!(
                pool = name,
                usage = report.usage,
                status = ?report.status,
                action = ?report.action,
                "pool health adjusted"
            );
        }
        Ok(report)
    }

    /// Reporting snapshot of pool `name` (dirty read).
    pub fn snapshot(&self, name: &str) -> Result<PoolSnapshot, DispatchError> {
        self.load(name).map(|doc| PoolSnapshot::from(&doc))
    }

    /// Full persisted document of pool `name` (dirty read).
    pub fn document(&self, name: &str) -> Result<PoolDocument, DispatchError> {
        self.load(name)
    }

    /// Names of all pools in the store.
    pub fn list(&self) -> Result<Vec<String>, DispatchError> {
        let prefix = format!("{POOL_PREFIX}/");
        Ok(self
            .store
            .list(POOL_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}
