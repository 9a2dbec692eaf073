//! Crawl pipeline: stage runner, pacing, workers and orchestration

pub mod orchestrator;
pub mod pacing;
pub mod stage_runner;
pub mod state;
pub mod workers;

pub use orchestrator::{PipelineError, PipelineOrchestrator, PipelineSettings};
pub use pacing::PacingController;
pub use stage_runner::{StageRunner, Worker, WorkerError};
pub use state::{PipelineReport, StageStats};
