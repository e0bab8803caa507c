/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store failures are fatal to the running stage: callers propagate them
/// instead of tallying and continuing.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
