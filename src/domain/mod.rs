//! Domain types for the scan orchestrator.
//!
//! - Source: fetch requests/results and the per-source error taxonomy
//! - Dataset: the merged partial-success dataset
//! - Opportunity: scored signals
//! - Digest: the per-run output artifact
//! - Run: workflow run state machine
//! - Events: the run event trail

pub mod dataset;
pub mod digest;
pub mod events;
pub mod opportunity;
pub mod run;
pub mod source;

pub use dataset::{DatasetSnapshot, MergedDataset, RecordKey};
pub use digest::{Digest, DigestSummary};
pub use events::{Event, EventType, RunStatus};
pub use opportunity::{Opportunity, RiskLevel, Signal, MAX_CONFIDENCE};
pub use run::{
    AnalysisContext, FailureCause, RunState, RunTrigger, ScanType, Stage, StageError, StageTiming,
    TransitionError, WorkflowRun,
};
pub use source::{
    ErrorKind, FetchError, Record, SourceError, SourceId, SourceRequest, SourceResult,
};
