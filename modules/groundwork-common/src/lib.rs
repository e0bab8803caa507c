pub mod config;
pub mod error;
pub mod quality;
pub mod retry;
pub mod types;

pub use config::Config;
pub use error::PipelineError;
pub use quality::*;
pub use retry::*;
pub use types::*;
