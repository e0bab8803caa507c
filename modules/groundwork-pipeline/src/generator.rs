use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use ai_client::Claude;
use groundwork_common::PipelineError;

const GENERATION_MODEL: &str = "claude-sonnet-4-20250514";

const QUERY_SYSTEM_PROMPT: &str = r#"You are a research librarian planning a web and literature search.

Given a research topic, produce a set of search queries that together cover the topic from complementary angles.

## Guidelines

- Each query must read like a real search-engine query: short, concrete, no boolean operators.
- Cover distinct facets of the topic: foundations, recent developments, criticism, applications, measurement.
- Prefer the terminology a domain expert would type over generic phrasing.
- Never return near-duplicates of the same query.

## Output

Return the queries in `queries`, most promising first, without numbering or commentary."#;

/// Produces search queries for a topic.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(
        &self,
        topic: &str,
        count: usize,
        exploration_budget: u32,
    ) -> crate::Result<Vec<String>>;
}

pub struct ClaudeGenerator {
    claude: Claude,
}

impl ClaudeGenerator {
    pub fn new(api_key: &str) -> Self {
        Self {
            claude: Claude::new(api_key, GENERATION_MODEL),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct GeneratedQueries {
    /// Search queries covering the topic, most promising first.
    #[serde(default)]
    queries: Vec<String>,
}

#[async_trait]
impl QueryGenerator for ClaudeGenerator {
    async fn generate(
        &self,
        topic: &str,
        count: usize,
        exploration_budget: u32,
    ) -> crate::Result<Vec<String>> {
        let user_prompt = format!(
            "Topic: {topic}\n\nGenerate up to {count} queries. Budget your coverage as if you could consult roughly {exploration_budget} sources while mapping the topic."
        );

        let response: GeneratedQueries = self
            .claude
            .extract(QUERY_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;

        let queries = dedup_queries(response.queries, count);
        if queries.is_empty() {
            return Err(PipelineError::Generation(format!(
                "model returned no usable queries for topic '{topic}'"
            )));
        }

        info!(topic, count = queries.len(), "Generated search queries");
        Ok(queries)
    }
}

/// Trim, drop empties, deduplicate case-insensitively preserving order,
/// and cap the result length.
pub fn dedup_queries(queries: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut deduped = Vec::new();
    for query in queries {
        if deduped.len() >= cap {
            break;
        }
        let trimmed = query.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
            continue;
        }
        deduped.push(trimmed.to_string());
    }
    deduped
}

/// On-disk queries document, reusable across runs via `--queries-file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedQueries {
    pub topic: String,
    pub generated_at: DateTime<Utc>,
    pub queries: Vec<String>,
}

impl SavedQueries {
    pub fn new(topic: &str, queries: Vec<String>) -> Self {
        Self {
            topic: topic.to_string(),
            generated_at: Utc::now(),
            queries,
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read queries file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse queries file {}", path.display()))
    }

    /// Write under `{data_dir}/queries/`, named after the topic.
    pub fn save(&self, data_dir: &Path) -> anyhow::Result<PathBuf> {
        let dir = data_dir.join("queries");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("{}.json", topic_slug(&self.topic)));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), count = self.queries.len(), "Saved queries");
        Ok(path)
    }
}

fn topic_slug(topic: &str) -> String {
    let mut slug = String::with_capacity(topic.len());
    let mut pending_dash = false;
    for c in topic.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("topic");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_queries_trims_and_ignores_case() {
        let queries = vec![
            "  Rust async  ".to_string(),
            "rust ASYNC".to_string(),
            String::new(),
            "tokio internals".to_string(),
        ];
        assert_eq!(
            dedup_queries(queries, 10),
            vec!["Rust async".to_string(), "tokio internals".to_string()]
        );
    }

    #[test]
    fn dedup_queries_caps_length() {
        let queries = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(dedup_queries(queries, 2), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn topic_slug_collapses_punctuation() {
        assert_eq!(topic_slug("Rust: async & await!"), "rust-async-await");
        assert_eq!(topic_slug("***"), "topic");
    }

    #[test]
    fn saved_queries_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let doc = SavedQueries::new("Urban heat islands", vec!["heat island mitigation".to_string()]);

        let path = doc.save(dir.path()).unwrap();
        assert!(path.ends_with("queries/urban-heat-islands.json"));

        let loaded = SavedQueries::load(&path).unwrap();
        assert_eq!(loaded.topic, doc.topic);
        assert_eq!(loaded.queries, doc.queries);
    }
}
