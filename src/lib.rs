//! # Fix Dispatch
//!
//! An adaptive dispatch engine for automated build-error repair.
//!
//! Given the errors of a failed build, the engine decides how much parallel
//! repair effort each error class deserves, picks the repair procedure that
//! has worked best for that class before, and runs the repairs through a
//! bounded pool of reusable execution resources. Outcomes feed back into the
//! ledger, so the next build is planned with better knowledge.
//!
//! ## Components
//!
//! - **Planner** ([`core::planner`]): error reports in, a priority-ordered
//!   [`SpawnPlan`](core::SpawnPlan) out. Severity comes from the error
//!   category and count; blocking errors are dispatched first.
//! - **Pattern Ledger** ([`core::ledger`]): fix procedures per error class,
//!   ranked by observed success rate, with idempotent outcome recording, a
//!   learning path and a fallback to sibling classes.
//! - **Resource Pool** ([`core::resource_pool`]): exclusive leases on
//!   reusable resources with blocking acquire, health scoring and elastic
//!   grow/shrink.
//! - **Dispatcher** ([`core::dispatcher`]): worker threads executing a plan
//!   through a user-supplied [`FixExecutor`](core::FixExecutor).
//! - **Health Monitor** ([`core::health`]): periodic health checks and
//!   ledger expiry.
//!
//! All shared state lives in a [`DocumentStore`](infra::DocumentStore):
//! [`FileStore`](infra::FileStore) coordinates several processes through
//! advisory file locks; [`InMemoryStore`](infra::InMemoryStore) serves a
//! single process and tests.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fix_dispatch::builders::DispatchEngine;
//! use fix_dispatch::config::DispatchConfig;
//! use fix_dispatch::core::DryRunExecutor;
//!
//! fix_dispatch::util::init_tracing();
//! let engine = DispatchEngine::from_config(DispatchConfig::from_path("dispatch.json")?)?;
//! let mut monitor = engine.monitor();
//! monitor.start()?;
//!
//! let raw = std::fs::read_to_string("build-errors.json")?;
//! let report = engine.run_report(&raw, DryRunExecutor)?;
//! println!("fixed {} of {} units", report.fixed, report.results.len());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Planner, ledger, resource pool, dispatcher and their error types.
pub mod core;
/// Configuration models for pools, the ledger, the planner and the dispatcher.
pub mod config;
/// Builders to construct engine components from configuration.
pub mod builders;
/// Storage adapters shared by all components.
pub mod infra;
/// Shared utilities.
pub mod util;
