use chrono::{DateTime, Utc};
use sqlx::types::Json;

use groundwork_common::{
    Assessment, Channel, CriterionScores, ExtractedContent, ExtractionStatus, FilterDecision,
    Query, Resource, Topic,
};

use crate::error::StoreError;

// --- Rows ---

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TopicRow {
    pub id: i64,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

impl From<TopicRow> for Topic {
    fn from(row: TopicRow) -> Self {
        Topic {
            id: row.id,
            topic: row.topic,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct QueryRow {
    pub id: i64,
    pub topic_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<QueryRow> for Query {
    fn from(row: QueryRow) -> Self {
        Query {
            id: row.id,
            topic_id: row.topic_id,
            text: row.text,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ResourceRow {
    pub id: i64,
    pub identity: String,
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    pub channel: String,
    pub source_metadata: Json<serde_json::Value>,
    pub discovered_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = StoreError;

    fn try_from(row: ResourceRow) -> Result<Self, StoreError> {
        let channel = Channel::parse(&row.channel)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown channel: {}", row.channel)))?;
        Ok(Resource {
            id: row.id,
            identity: row.identity,
            url: row.url,
            title: row.title,
            snippet: row.snippet,
            channel,
            source_metadata: row.source_metadata.0,
            discovered_at: row.discovered_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AssessmentRow {
    pub resource_id: i64,
    pub relevance: f64,
    pub credibility: Option<f64>,
    pub solidity: Option<f64>,
    pub usefulness: f64,
    pub composite: f64,
    pub justification: String,
    pub assessed_at: DateTime<Utc>,
}

impl From<AssessmentRow> for Assessment {
    fn from(row: AssessmentRow) -> Self {
        Assessment {
            resource_id: row.resource_id,
            scores: CriterionScores {
                relevance: row.relevance,
                credibility: row.credibility,
                solidity: row.solidity,
                usefulness: row.usefulness,
            },
            composite: row.composite,
            justification: row.justification,
            assessed_at: row.assessed_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct FilterDecisionRow {
    pub resource_id: i64,
    pub selected: bool,
    pub rank: Option<i64>,
    pub decided_at: DateTime<Utc>,
}

impl From<FilterDecisionRow> for FilterDecision {
    fn from(row: FilterDecisionRow) -> Self {
        FilterDecision {
            resource_id: row.resource_id,
            selected: row.selected,
            rank: row.rank.map(|r| r as u32),
            decided_at: row.decided_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ExtractedContentRow {
    pub resource_id: i64,
    pub status: String,
    pub text: Option<String>,
    pub error: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

impl TryFrom<ExtractedContentRow> for ExtractedContent {
    type Error = StoreError;

    fn try_from(row: ExtractedContentRow) -> Result<Self, StoreError> {
        let status = ExtractionStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown extraction status: {}", row.status))
        })?;
        Ok(ExtractedContent {
            resource_id: row.resource_id,
            status,
            text: row.text,
            error: row.error,
            extracted_at: row.extracted_at,
        })
    }
}

// --- Parameters ---

/// Parameters for inserting a discovered resource.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub identity: String,
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    pub channel: Channel,
    pub source_metadata: serde_json::Value,
}

/// Outcome of an identity-keyed resource upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    /// False when the identity was already known and the insert was a no-op.
    pub inserted: bool,
}

/// Parameters for persisting one assessment.
#[derive(Debug, Clone)]
pub struct NewAssessment {
    pub resource_id: i64,
    pub scores: CriterionScores,
    pub composite: f64,
    pub justification: String,
}

/// One filter outcome to persist; the filter stage produces one per assessed
/// resource in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionDecision {
    pub resource_id: i64,
    pub selected: bool,
    pub rank: Option<u32>,
}

// --- Projections ---

/// An assessed resource as the filter stage consumes it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AssessedResource {
    pub resource_id: i64,
    pub composite: f64,
    pub relevance: f64,
    pub discovered_at: DateTime<Utc>,
}

/// Row counts for the status report.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub topics: i64,
    pub queries: i64,
    pub web_resources: i64,
    pub academic_resources: i64,
    pub assessed: i64,
    pub selected: i64,
    pub extracted_success: i64,
    pub extracted_failed: i64,
    pub extracted_skipped: i64,
}

impl std::fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Store Status ===")?;
        writeln!(f, "Topics:             {}", self.topics)?;
        writeln!(f, "Queries:            {}", self.queries)?;
        writeln!(f, "Web resources:      {}", self.web_resources)?;
        writeln!(f, "Academic resources: {}", self.academic_resources)?;
        writeln!(f, "Assessed:           {}", self.assessed)?;
        writeln!(f, "Selected:           {}", self.selected)?;
        writeln!(f, "\nExtraction:")?;
        writeln!(f, "  Success: {}", self.extracted_success)?;
        writeln!(f, "  Failed:  {}", self.extracted_failed)?;
        writeln!(f, "  Skipped: {}", self.extracted_skipped)?;
        Ok(())
    }
}
