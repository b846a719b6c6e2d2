//! marketscan - Multi-source market scan orchestrator
//!
//! Runs a scheduled market scan as a three-stage workflow: concurrent
//! collection from independent data sources, analysis of the merged
//! dataset into scored opportunities, and assembly of a per-run digest.
//!
//! # Architecture
//!
//! - Collection tolerates partial failure: failed sources are recorded
//!   as degraded and the run continues on whatever data arrived
//! - Every run reaches exactly one terminal state and is bounded by an
//!   overall timeout
//! - Every run writes an append-only event trail; `status` replays it
//!
//! # Modules
//!
//! - `adapters`: Data sources, analyzers, and digest sinks
//! - `core`: Collector, analysis stage, assembler, workflow controller, event log
//! - `domain`: Data structures (WorkflowRun, MergedDataset, Opportunity, Digest, Event)
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the daily scan over the configured watchlist
//! marketscan run --scan-type daily
//!
//! # Run from a scheduler payload
//! marketscan run --trigger trigger.json
//!
//! # Check run status
//! marketscan status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{RunOutcome, WorkflowController};
pub use domain::{Digest, Event, EventType, RunState, RunTrigger, ScanType, WorkflowRun};
