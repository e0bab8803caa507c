use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use ai_client::Claude;
use groundwork_common::{clamp_score, Channel, CriterionScores, PipelineError, Resource};

const SCORING_MODEL: &str = "claude-haiku-4-5-20251001";

/// ai-client's request timeout; scoring timeouts surface with this value.
const SCORING_TIMEOUT_SECS: u64 = 120;

const MAX_SNIPPET_CHARS: usize = 4_000;

const WEB_SCORING_PROMPT: &str = r#"You are a research quality rater.

Given a research topic and one candidate web source, score the source on three criteria from 1 (poor) to 5 (excellent).

## Criteria

- **relevance**: how directly the source addresses the research topic.
- **credibility**: how authoritative and trustworthy the publishing source looks.
- **usefulness**: how much substance a researcher could act on.

## Rules

- Judge only what the title, URL, snippet, and metadata support; never invent content.
- Use the whole scale and reserve 5 for clearly exceptional sources.
- Keep the justification to one or two sentences."#;

const ACADEMIC_SCORING_PROMPT: &str = r#"You are a research quality rater for academic literature.

Given a research topic and one candidate paper, score the paper on three criteria from 1 (poor) to 5 (excellent).

## Criteria

- **relevance**: how directly the paper addresses the research topic.
- **solidity**: how rigorous the methodology and evidence appear from the abstract and venue.
- **usefulness**: how much a researcher of the topic could build on this paper.

## Rules

- Judge only what the title, abstract, and metadata support; never invent findings.
- Use the whole scale and reserve 5 for clearly exceptional papers.
- Keep the justification to one or two sentences."#;

/// Scores plus the model's reasoning for one resource.
#[derive(Debug, Clone)]
pub struct ScoredAssessment {
    pub scores: CriterionScores,
    pub justification: String,
}

/// Scores one resource against the run's research topic.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn assess(&self, resource: &Resource) -> crate::Result<ScoredAssessment>;
}

/// Claude-backed scorer bound to one topic for the duration of a run.
pub struct ClaudeScorer {
    claude: Claude,
    topic: String,
}

impl ClaudeScorer {
    pub fn new(api_key: &str, topic: &str) -> Self {
        Self {
            claude: Claude::new(api_key, SCORING_MODEL),
            topic: topic.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct WebScoreResponse {
    /// How directly the source addresses the research topic, 1 to 5.
    relevance: f64,
    /// How authoritative and trustworthy the publishing source looks, 1 to 5.
    credibility: f64,
    /// How much substance a researcher could act on, 1 to 5.
    usefulness: f64,
    /// One or two sentences explaining the scores.
    justification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct AcademicScoreResponse {
    /// How directly the paper addresses the research topic, 1 to 5.
    relevance: f64,
    /// How rigorous the methodology and evidence appear, 1 to 5.
    solidity: f64,
    /// How much a researcher of the topic could build on this paper, 1 to 5.
    usefulness: f64,
    /// One or two sentences explaining the scores.
    justification: String,
}

#[async_trait]
impl QualityScorer for ClaudeScorer {
    async fn assess(&self, resource: &Resource) -> crate::Result<ScoredAssessment> {
        let user_prompt = resource_prompt(&self.topic, resource);

        match resource.channel {
            Channel::Web => {
                let response: WebScoreResponse = self
                    .claude
                    .extract(WEB_SCORING_PROMPT, &user_prompt)
                    .await
                    .map_err(to_scoring_error)?;
                Ok(ScoredAssessment {
                    scores: CriterionScores::web(
                        clamped(resource.id, "relevance", response.relevance),
                        clamped(resource.id, "credibility", response.credibility),
                        clamped(resource.id, "usefulness", response.usefulness),
                    ),
                    justification: response.justification,
                })
            }
            Channel::Academic => {
                let response: AcademicScoreResponse = self
                    .claude
                    .extract(ACADEMIC_SCORING_PROMPT, &user_prompt)
                    .await
                    .map_err(to_scoring_error)?;
                Ok(ScoredAssessment {
                    scores: CriterionScores::academic(
                        clamped(resource.id, "relevance", response.relevance),
                        clamped(resource.id, "solidity", response.solidity),
                        clamped(resource.id, "usefulness", response.usefulness),
                    ),
                    justification: response.justification,
                })
            }
        }
    }
}

fn to_scoring_error(err: anyhow::Error) -> PipelineError {
    match err.downcast_ref::<reqwest::Error>() {
        Some(e) if e.is_timeout() => PipelineError::Timeout(SCORING_TIMEOUT_SECS),
        _ => PipelineError::Scoring(err.to_string()),
    }
}

fn clamped(resource_id: i64, criterion: &str, value: f64) -> f64 {
    let clamped = clamp_score(value);
    if clamped != value {
        warn!(resource_id, criterion, value, "Score out of range, clamped");
    }
    clamped
}

fn resource_prompt(topic: &str, resource: &Resource) -> String {
    let snippet = resource.snippet.as_deref().unwrap_or("(none)");
    let mut end = snippet.len().min(MAX_SNIPPET_CHARS);
    while !snippet.is_char_boundary(end) {
        end -= 1;
    }
    let snippet = &snippet[..end];
    let metadata = serde_json::to_string(&resource.source_metadata).unwrap_or_default();

    format!(
        "Research topic: {topic}\n\nCandidate source ({channel}):\nTitle: {title}\nURL: {url}\nSnippet: {snippet}\nMetadata: {metadata}",
        channel = resource.channel,
        title = resource.title,
        url = resource.url,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resource(snippet: Option<&str>) -> Resource {
        Resource {
            id: 7,
            identity: "https://example.com/a".to_string(),
            url: "https://example.com/a".to_string(),
            title: "A Title".to_string(),
            snippet: snippet.map(str::to_string),
            channel: Channel::Web,
            source_metadata: serde_json::json!({"provider": "serper"}),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn clamped_pulls_scores_into_range() {
        assert_eq!(clamped(1, "relevance", 7.0), 5.0);
        assert_eq!(clamped(1, "relevance", 0.2), 1.0);
        assert_eq!(clamped(1, "relevance", 3.5), 3.5);
    }

    #[test]
    fn resource_prompt_includes_topic_and_source_fields() {
        let prompt = resource_prompt("urban heat", &resource(Some("a snippet")));
        assert!(prompt.contains("Research topic: urban heat"));
        assert!(prompt.contains("Candidate source (web)"));
        assert!(prompt.contains("Title: A Title"));
        assert!(prompt.contains("Snippet: a snippet"));
    }

    #[test]
    fn resource_prompt_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_SNIPPET_CHARS);
        let prompt = resource_prompt("t", &resource(Some(&long)));
        assert!(prompt.len() < long.len() + 200);
        assert!(!prompt.contains('\u{FFFD}'));
    }
}
