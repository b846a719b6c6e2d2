//! Core orchestration logic.
//!
//! This module contains:
//! - Limits: run timeouts, input guards, and the retry policy
//! - Collector: concurrent per-source fetching with retries and a deadline
//! - Analysis: contract enforcement around the injected analyzer
//! - Assembler: digest ordering, filtering, and summary
//! - Controller: the run state machine
//! - EventStore: append-only run event log

pub mod analysis;
pub mod assembler;
pub mod collector;
pub mod controller;
pub mod event_store;
pub mod limits;

// Re-export commonly used types
pub use analysis::AnalysisStage;
pub use assembler::{sort_opportunities, DigestAssembler};
pub use collector::{Collection, Collector};
pub use controller::{list_runs, run_status, RunOutcome, WorkflowController};
pub use event_store::{record, EventLog, EventStore, MemoryEventLog};
pub use limits::{LimitViolation, RetryPolicy, RunLimits};
