pub mod error;
pub mod models;
mod store;

pub use error::{Result, StoreError};
pub use models::{
    AssessedResource, NewAssessment, NewResource, SelectionDecision, StatusCounts, UpsertOutcome,
};
pub use store::Store;
