use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_path: PathBuf,
    pub data_dir: PathBuf,

    // AI provider
    pub anthropic_api_key: String,

    // Search providers
    pub serper_api_key: String,
    pub semantic_scholar_api_key: Option<String>,
    pub crossref_mailto: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_path: database_path(),
            data_dir: data_dir(),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            serper_api_key: required_env("SERPER_API_KEY"),
            semantic_scholar_api_key: env::var("SEMANTIC_SCHOLAR_API_KEY").ok(),
            crossref_mailto: env::var("CROSSREF_MAILTO").ok(),
        }
    }

    /// Load a minimal config for store-only commands (status, clear-db).
    /// No provider keys needed.
    pub fn store_from_env() -> Self {
        Self {
            database_path: database_path(),
            data_dir: data_dir(),
            anthropic_api_key: String::new(),
            serper_api_key: String::new(),
            semantic_scholar_api_key: None,
            crossref_mailto: None,
        }
    }
}

/// Root directory for run artifacts (saved queries, run logs).
pub fn data_dir() -> PathBuf {
    env::var("DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn database_path() -> PathBuf {
    env::var("GROUNDWORK_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("groundwork.db"))
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
