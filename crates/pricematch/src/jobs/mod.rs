//! Matching job orchestration.
//!
//! Upload creates a pending job with its batches. The scheduler leases
//! unfinished jobs and dispatches them one batch at a time, either over
//! HTTP to the process-job endpoint or on a local task. Whoever matches a
//! batch leases it first, so manual and scheduled runs never overlap on one.
//! Once matched, results can be corrected by hand or rematched.

mod creation;
mod dispatcher;
mod editing;
mod lifecycle;
mod processor;
mod scheduler;

pub use creation::{
    create_job_from_upload, plan_batches, NewUpload, SheetSummary, UploadSummary, BATCH_SIZE,
};
pub use dispatcher::{DispatchResult, HttpDispatcher, InProcessDispatcher, JobDispatcher};
pub use editing::{correct_result, delete_job, ResultCorrection, MANUAL_METHOD};
pub use lifecycle::{progress, JobStatus, JobStatusView};
pub use processor::{BatchOutcome, JobProcessor, FAILED_MATCH_DESCRIPTION};
pub use scheduler::JobScheduler;
