// SQLite persistence for the research pipeline. Every write is idempotent by
// natural key (topic text, (topic_id, query text), resource identity,
// resource_id) so stages can be re-run safely.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::SqlitePool;
use tracing::debug;

use groundwork_common::{
    Assessment, Channel, ExtractedContent, ExtractionStatus, FilterDecision, Query, Resource,
    Topic,
};

use crate::error::Result;
use crate::models::{
    AssessedResource, AssessmentRow, ExtractedContentRow, FilterDecisionRow, NewAssessment,
    NewResource, QueryRow, ResourceRow, SelectionDecision, StatusCounts, TopicRow, UpsertOutcome,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (topic_id, text)
);

CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    snippet TEXT,
    channel TEXT NOT NULL,
    source_metadata TEXT NOT NULL DEFAULT '{}',
    discovered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS query_resources (
    query_id INTEGER NOT NULL REFERENCES queries(id) ON DELETE CASCADE,
    resource_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    PRIMARY KEY (query_id, resource_id)
);

CREATE TABLE IF NOT EXISTS assessments (
    resource_id INTEGER PRIMARY KEY REFERENCES resources(id) ON DELETE CASCADE,
    relevance REAL NOT NULL,
    credibility REAL,
    solidity REAL,
    usefulness REAL NOT NULL,
    composite REAL NOT NULL,
    justification TEXT NOT NULL,
    assessed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS filter_decisions (
    resource_id INTEGER PRIMARY KEY REFERENCES resources(id) ON DELETE CASCADE,
    selected INTEGER NOT NULL,
    rank INTEGER,
    decided_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS extracted_content (
    resource_id INTEGER PRIMARY KEY REFERENCES resources(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    text TEXT,
    error TEXT,
    extracted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resources_channel ON resources(channel);
CREATE INDEX IF NOT EXISTS idx_filter_decisions_selected ON filter_decisions(selected);
"#;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the database at `path`, creating the file and schema if needed.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        debug!(path = %path.display(), "Opened store");
        Self::init(pool).await
    }

    /// In-memory database on a single shared connection. Used by tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    // --- Topics & queries ---

    pub async fn find_or_create_topic(&self, topic: &str) -> Result<Topic> {
        sqlx::query("INSERT INTO topics (topic, created_at) VALUES ($1, $2) ON CONFLICT(topic) DO NOTHING")
            .bind(topic)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        let row = sqlx::query_as::<_, TopicRow>("SELECT * FROM topics WHERE topic = $1")
            .bind(topic)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    pub async fn upsert_query(&self, topic_id: i64, text: &str) -> Result<Query> {
        sqlx::query(
            r#"
            INSERT INTO queries (topic_id, text, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(topic_id, text) DO NOTHING
            "#,
        )
        .bind(topic_id)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, QueryRow>(
            "SELECT * FROM queries WHERE topic_id = $1 AND text = $2",
        )
        .bind(topic_id)
        .bind(text)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn queries_for_topic(&self, topic_id: i64) -> Result<Vec<Query>> {
        let rows = sqlx::query_as::<_, QueryRow>(
            "SELECT * FROM queries WHERE topic_id = $1 ORDER BY id ASC",
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Query::from).collect())
    }

    // --- Resources ---

    /// Identity-keyed upsert: inserting a known identity is a no-op and
    /// returns the existing row id.
    pub async fn upsert_resource(&self, new: NewResource) -> Result<UpsertOutcome> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO resources
                (identity, url, title, snippet, channel, source_metadata, discovered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(identity) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&new.identity)
        .bind(&new.url)
        .bind(&new.title)
        .bind(&new.snippet)
        .bind(new.channel.as_str())
        .bind(Json(&new.source_metadata))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(UpsertOutcome { id, inserted: true }),
            None => {
                let id =
                    sqlx::query_scalar::<_, i64>("SELECT id FROM resources WHERE identity = $1")
                        .bind(&new.identity)
                        .fetch_one(&self.pool)
                        .await?;
                Ok(UpsertOutcome {
                    id,
                    inserted: false,
                })
            }
        }
    }

    pub async fn link_query_resource(&self, query_id: i64, resource_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_resources (query_id, resource_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(query_id)
        .bind(resource_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All resources, optionally restricted to one channel.
    pub async fn resources(&self, channel: Option<Channel>) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT * FROM resources
            WHERE ($1 IS NULL OR channel = $1)
            ORDER BY id ASC
            "#,
        )
        .bind(channel.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Resource::try_from).collect()
    }

    /// Resources with no assessment row yet.
    pub async fn unassessed_resources(&self, channel: Option<Channel>) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT r.* FROM resources r
            WHERE NOT EXISTS (SELECT 1 FROM assessments a WHERE a.resource_id = r.id)
              AND ($1 IS NULL OR r.channel = $1)
            ORDER BY r.id ASC
            "#,
        )
        .bind(channel.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Resource::try_from).collect()
    }

    // --- Assessments ---

    /// Single-statement upsert keyed by resource_id.
    pub async fn save_assessment(&self, new: NewAssessment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assessments
                (resource_id, relevance, credibility, solidity, usefulness,
                 composite, justification, assessed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(resource_id) DO UPDATE SET
                relevance = excluded.relevance,
                credibility = excluded.credibility,
                solidity = excluded.solidity,
                usefulness = excluded.usefulness,
                composite = excluded.composite,
                justification = excluded.justification,
                assessed_at = excluded.assessed_at
            "#,
        )
        .bind(new.resource_id)
        .bind(new.scores.relevance)
        .bind(new.scores.credibility)
        .bind(new.scores.solidity)
        .bind(new.scores.usefulness)
        .bind(new.composite)
        .bind(&new.justification)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn assessment(&self, resource_id: i64) -> Result<Option<Assessment>> {
        let row = sqlx::query_as::<_, AssessmentRow>(
            "SELECT * FROM assessments WHERE resource_id = $1",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Assessment::from))
    }

    /// Assessed resources in one channel, as the filter stage consumes them.
    pub async fn assessed_by_channel(&self, channel: Channel) -> Result<Vec<AssessedResource>> {
        let rows = sqlx::query_as::<_, AssessedResource>(
            r#"
            SELECT r.id AS resource_id, a.composite, a.relevance, r.discovered_at
            FROM resources r
            JOIN assessments a ON a.resource_id = r.id
            WHERE r.channel = $1
            ORDER BY r.id ASC
            "#,
        )
        .bind(channel.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- Filter decisions ---

    /// Overwrite the decisions for one channel's filter run in a single
    /// transaction.
    pub async fn save_filter_decisions(&self, decisions: &[SelectionDecision]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let decided_at = Utc::now();
        for decision in decisions {
            sqlx::query(
                r#"
                INSERT INTO filter_decisions (resource_id, selected, rank, decided_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT(resource_id) DO UPDATE SET
                    selected = excluded.selected,
                    rank = excluded.rank,
                    decided_at = excluded.decided_at
                "#,
            )
            .bind(decision.resource_id)
            .bind(decision.selected)
            .bind(decision.rank.map(|r| r as i64))
            .bind(decided_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn filter_decisions(&self, channel: Channel) -> Result<Vec<FilterDecision>> {
        let rows = sqlx::query_as::<_, FilterDecisionRow>(
            r#"
            SELECT f.* FROM filter_decisions f
            JOIN resources r ON r.id = f.resource_id
            WHERE r.channel = $1
            ORDER BY f.resource_id ASC
            "#,
        )
        .bind(channel.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FilterDecision::from).collect())
    }

    // --- Extracted content ---

    /// Selected resources that have no extraction outcome yet, in rank order.
    pub async fn selected_without_content(&self, channel: Option<Channel>) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT r.* FROM resources r
            JOIN filter_decisions f ON f.resource_id = r.id AND f.selected = 1
            WHERE NOT EXISTS (SELECT 1 FROM extracted_content e WHERE e.resource_id = r.id)
              AND ($1 IS NULL OR r.channel = $1)
            ORDER BY r.channel ASC, f.rank ASC
            "#,
        )
        .bind(channel.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Resource::try_from).collect()
    }

    pub async fn save_extracted_content(
        &self,
        resource_id: i64,
        status: ExtractionStatus,
        text: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO extracted_content (resource_id, status, text, error, extracted_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(resource_id) DO UPDATE SET
                status = excluded.status,
                text = excluded.text,
                error = excluded.error,
                extracted_at = excluded.extracted_at
            "#,
        )
        .bind(resource_id)
        .bind(status.as_str())
        .bind(text)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn extracted_content(&self, resource_id: i64) -> Result<Option<ExtractedContent>> {
        let row = sqlx::query_as::<_, ExtractedContentRow>(
            "SELECT * FROM extracted_content WHERE resource_id = $1",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ExtractedContent::try_from).transpose()
    }

    /// Drop failed extraction rows so the extract stage re-attempts them.
    pub async fn clear_failed_extractions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM extracted_content WHERE status = $1")
            .bind(ExtractionStatus::Failed.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // --- Status & maintenance ---

    pub async fn status_counts(&self) -> Result<StatusCounts> {
        Ok(StatusCounts {
            topics: self.count("SELECT COUNT(*) FROM topics").await?,
            queries: self.count("SELECT COUNT(*) FROM queries").await?,
            web_resources: self.count_channel(Channel::Web).await?,
            academic_resources: self.count_channel(Channel::Academic).await?,
            assessed: self.count("SELECT COUNT(*) FROM assessments").await?,
            selected: self
                .count("SELECT COUNT(*) FROM filter_decisions WHERE selected = 1")
                .await?,
            extracted_success: self.count_extracted(ExtractionStatus::Success).await?,
            extracted_failed: self.count_extracted(ExtractionStatus::Failed).await?,
            extracted_skipped: self
                .count_extracted(ExtractionStatus::SkippedRestricted)
                .await?,
        })
    }

    /// Delete every row. Destructive; gated behind an explicit CLI flag.
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "extracted_content",
            "filter_decisions",
            "assessments",
            "query_resources",
            "queries",
            "resources",
            "topics",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, sql: &'static str) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn count_channel(&self, channel: Channel) -> Result<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM resources WHERE channel = $1")
                .bind(channel.as_str())
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn count_extracted(&self, status: ExtractionStatus) -> Result<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM extracted_content WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?,
        )
    }
}
