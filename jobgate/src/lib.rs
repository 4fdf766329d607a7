//! Jobgate - per-type admission control and crash-safe job execution.
//!
//! Runs jobs of named types, each type bounded by its own concurrency
//! ceiling, and keeps a durable status record for every job so that work
//! interrupted by an unclean exit is reconciled on the next start.
//!
//! # Core Concepts
//!
//! - **Job types**: The [`JobTypeRegistry`] holds each type's maximum
//!   concurrency and simulated work duration, loaded once from
//!   [`ServiceConfig`].
//!
//! - **Admission**: The [`AdmissionController`] owns one slot pool per type
//!   and the registry of per-job [`CancellationHandle`]s. Slots are held
//!   through [`SlotPermit`] guards.
//!
//! - **Execution**: The [`ExecutionEngine`] moves jobs through
//!   `Pending -> InProgress -> {Completed, Failed, Cancelled}` under a
//!   [`MergedSignal`] combining the job's handle with caller and shutdown
//!   signals.
//!
//! - **Recovery**: [`recover_orphaned_jobs`] fails jobs left `InProgress` by
//!   a previous process instance before new work is accepted.
//!
//! - **Storage**: The [`JobStore`] trait abstracts the durable record.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL job store via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use jobgate::*;
//! use std::sync::Arc;
//!
//! let config = ServiceConfig::load()?;
//! let engine = EngineBuilder::from_service_config(&config)?
//!     .with_store(Arc::new(store))
//!     .with_handler(Arc::new(SimulatedWork))
//!     .build()?;
//!
//! engine.recover().await?;
//! let job = engine.create("email", Some("hello".into())).await?;
//! ```

/// Per-type slot pools and cancellation handle registry.
///
/// The `admission` module provides [`AdmissionController`], whose
/// [`acquire`](AdmissionController::acquire) waits for a slot or a
/// cancellation signal, and the [`SlotPermit`] guard that returns the slot
/// when dropped.
pub mod admission;

/// Cancellation signals.
///
/// [`CancellationHandle`] is a one-shot signal shared by clones;
/// [`MergedSignal`] fires when any of its sources does.
pub mod cancel;

/// Configuration structures for job types, the engine and persistence.
pub mod config;

/// Error types.
pub mod error;

/// Process instance identity.
///
/// The `instance` module defines [`ProcessIdentity`] and the default
/// [`ProcessInstance`] stamped on jobs this process runs.
pub mod instance;

/// Core job definitions.
///
/// The `job` module defines:
/// - [`JobId`] - unique job identifier
/// - [`JobStatus`] - lifecycle states and allowed transitions
/// - [`JobRecord`] - the persisted job
pub mod job;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides a PostgreSQL-backed [`JobStore`]
/// when the `postgres` feature is enabled.
pub mod persistence;

/// Startup reconciliation of jobs orphaned by an unclean exit.
pub mod recovery;

/// Job type registry.
pub mod registry;

/// Execution engine and its builder.
///
/// The `runtime` module provides:
/// - [`ExecutionEngine`] - create, run, cancel and inspect jobs
/// - [`EngineBuilder`] - assembles an engine from its collaborators
/// - [`WorkHandler`] - the unit-of-work seam, with [`SimulatedWork`]
pub mod runtime;

/// Job store trait, list queries and summaries.
pub mod store;

/// Tracing spans and recording helpers.
pub mod telemetry;

pub use admission::*;
pub use cancel::*;
pub use config::*;
pub use error::*;
pub use instance::*;
pub use job::*;
pub use recovery::*;
pub use registry::*;
pub use runtime::*;
pub use store::*;
