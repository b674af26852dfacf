//! # fleet-sync
//!
//! Reconciliation for `fleet`: plan the difference between a repository and
//! its effective baseline, then apply plans across the fleet with an audit
//! trail.
//!
//! [`Pipeline::plan_all`] produces side-effect-free [`RepoPlan`]s;
//! [`Pipeline::sync`] hands them to a [`FanOutExecutor`].

pub mod audit;
pub mod diff;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod planner;
pub mod transport;
pub mod writer;

pub use audit::{new_run_id, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use diff::{diff_plan, FileDiff};
pub use error::{ExecutionError, Step, SyncError, TransportError};
pub use executor::{ExecutorOptions, FanOutExecutor, RepoOutcome, RunReport, UnitStatus};
pub use pipeline::{FailureStage, Pipeline, PlanSet, RepoFailure, SyncReport};
pub use planner::{current_hashes, plan, RepoPlan};
pub use transport::{GitTransport, RepoTransport, ReviewHandle};
