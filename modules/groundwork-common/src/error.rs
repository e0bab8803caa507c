use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Query generation error: {0}")]
    Generation(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl PipelineError {
    /// Timeouts are the only failures retried within a run.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout(_))
    }

    /// Bucket name used for per-kind failure tallies.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Generation(_) => "generation",
            PipelineError::Search(_) => "search",
            PipelineError::Scoring(_) => "scoring",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Anyhow(_) => "other",
        }
    }
}
