pub mod assessor;
pub mod fetcher;
pub mod filter;
pub mod generator;
pub mod pipeline;
pub mod retry;
pub mod run_log;
pub mod search;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use groundwork_common::PipelineError;

/// Per-item result type carrying the pipeline error taxonomy.
pub type Result<T> = std::result::Result<T, PipelineError>;
