use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::quality::CriterionScores;

// --- Channels ---

/// Retrieval channel a resource was discovered through. The channel decides
/// which quality criteria apply and whether full text can be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Web,
    Academic,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Web, Channel::Academic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::Academic => "academic",
        }
    }

    pub fn parse(s: &str) -> Option<Channel> {
        match s {
            "web" => Some(Channel::Web),
            "academic" => Some(Channel::Academic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Topics & Queries ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

/// A stored search query belonging to a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: i64,
    pub topic_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// --- Resources ---

/// One search result as returned by a provider, before persistence.
/// `url` is already canonical: the page URL for web hits, the DOI URL
/// (or paper page) for academic hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHit {
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    /// Provider context: provider name, result position, authors, venue, open-access data.
    pub source_metadata: serde_json::Value,
}

/// `source_metadata` key carrying an open-access PDF URL for academic hits.
/// Its presence decides extraction eligibility for the academic channel.
pub const OPEN_ACCESS_PDF_KEY: &str = "open_access_pdf";

/// A discovered resource. `identity` is the deduplication key: the
/// tracking-stripped URL for web results, the lowercased DOI URL for papers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub identity: String,
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    pub channel: Channel,
    pub source_metadata: serde_json::Value,
    pub discovered_at: DateTime<Utc>,
}

// --- Assessments ---

/// Quality assessment for one resource. One row per resource; a forced
/// re-assessment overwrites in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub resource_id: i64,
    pub scores: CriterionScores,
    pub composite: f64,
    pub justification: String,
    pub assessed_at: DateTime<Utc>,
}

// --- Filtering ---

/// Outcome of a filter run for one assessed resource. `rank` is 1-based
/// within the resource's channel, composite-descending; only selected rows
/// carry one. Decisions are recomputed and overwritten on every filter run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDecision {
    pub resource_id: i64,
    pub selected: bool,
    pub rank: Option<u32>,
    pub decided_at: DateTime<Utc>,
}

// --- Extraction ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Success,
    Failed,
    SkippedRestricted,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Success => "success",
            ExtractionStatus::Failed => "failed",
            ExtractionStatus::SkippedRestricted => "skipped_restricted",
        }
    }

    pub fn parse(s: &str) -> Option<ExtractionStatus> {
        match s {
            "success" => Some(ExtractionStatus::Success),
            "failed" => Some(ExtractionStatus::Failed),
            "skipped_restricted" => Some(ExtractionStatus::SkippedRestricted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Extraction outcome for one selected resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub resource_id: i64,
    pub status: ExtractionStatus,
    pub text: Option<String>,
    pub error: Option<String>,
    pub extracted_at: DateTime<Utc>,
}
