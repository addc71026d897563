//! The monitoring pipeline and its scheduling.

pub mod error;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod scheduler;

pub use error::PipelineError;
pub use pipeline::{CleanupWindow, MonitorPipeline, PipelineDeps, PipelineSettings};
pub use report::{Stage, StageReport, StageStatus, TickOutcome, TickPhase, TickReport};
pub use retry::RetryPolicy;
pub use scheduler::MonitorScheduler;
