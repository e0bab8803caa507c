// Test mocks for the research pipeline.
//
// Four mocks matching the four collaborator traits:
// - MockGenerator (QueryGenerator) — fixed query list or forced failure
// - MockSearcher (SearchProvider) — HashMap-based query→hits for one channel
// - MockScorer (QualityScorer) — HashMap-based url→scores with optional default
// - MockFetcher (ContentFetcher) — HashMap-based url→text plus forced timeouts
//
// Plus helpers for constructing web and academic raw hits.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use groundwork_common::{
    Channel, CriterionScores, PipelineError, RawHit, Resource, OPEN_ACCESS_PDF_KEY,
};

use crate::assessor::{QualityScorer, ScoredAssessment};
use crate::fetcher::{ContentFetcher, FetchKind};
use crate::generator::QueryGenerator;
use crate::search::SearchProvider;

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// Returns a fixed query list, or a `Generation` error when built with
/// `failing()`.
pub struct MockGenerator {
    queries: Vec<String>,
    fail: bool,
}

impl MockGenerator {
    pub fn returning(queries: &[&str]) -> Self {
        Self {
            queries: queries.iter().map(|q| q.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            queries: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl QueryGenerator for MockGenerator {
    async fn generate(
        &self,
        topic: &str,
        count: usize,
        _exploration_budget: u32,
    ) -> crate::Result<Vec<String>> {
        if self.fail {
            return Err(PipelineError::Generation(format!(
                "MockGenerator: forced failure for {topic}"
            )));
        }
        Ok(self.queries.iter().take(count).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// MockSearcher
// ---------------------------------------------------------------------------

/// HashMap-based search provider for one channel. Returns `Err` for
/// unregistered queries and counts every call.
pub struct MockSearcher {
    channel: Channel,
    hits: HashMap<String, Vec<RawHit>>,
    calls: AtomicU32,
}

impl MockSearcher {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            hits: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn on_query(mut self, query: &str, hits: Vec<RawHit>) -> Self {
        self.hits.insert(query.to_string(), hits);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for MockSearcher {
    async fn search(&self, query: &str, limit: usize) -> crate::Result<Vec<RawHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hits = self.hits.get(query).cloned().ok_or_else(|| {
            PipelineError::Search(format!("MockSearcher: no hits registered for {query}"))
        })?;
        Ok(hits.into_iter().take(limit).collect())
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &'static str {
        match self.channel {
            Channel::Web => "mock-web",
            Channel::Academic => "mock-academic",
        }
    }
}

// ---------------------------------------------------------------------------
// MockScorer
// ---------------------------------------------------------------------------

/// HashMap-based scorer keyed by resource URL. `with_default()` scores
/// any unregistered URL; otherwise unregistered URLs fail.
pub struct MockScorer {
    scores: HashMap<String, CriterionScores>,
    default: Option<CriterionScores>,
    calls: AtomicU32,
}

impl MockScorer {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            default: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn on_url(mut self, url: &str, scores: CriterionScores) -> Self {
        self.scores.insert(url.to_string(), scores);
        self
    }

    pub fn with_default(mut self, scores: CriterionScores) -> Self {
        self.default = Some(scores);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QualityScorer for MockScorer {
    async fn assess(&self, resource: &Resource) -> crate::Result<ScoredAssessment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scores = self
            .scores
            .get(&resource.url)
            .copied()
            .or(self.default)
            .ok_or_else(|| {
                PipelineError::Scoring(format!(
                    "MockScorer: no scores registered for {}",
                    resource.url
                ))
            })?;
        Ok(ScoredAssessment {
            scores,
            justification: format!("mock justification for {}", resource.url),
        })
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// HashMap-based content fetcher. URLs registered with `timing_out()`
/// always fail with a `Timeout`; unregistered URLs fail with `Fetch`.
pub struct MockFetcher {
    pages: HashMap<String, String>,
    timeouts: HashSet<String>,
    calls: AtomicU32,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            timeouts: HashSet::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn on_url(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }

    pub fn timing_out(mut self, url: &str) -> Self {
        self.timeouts.insert(url.to_string());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, url: &str, _kind: FetchKind) -> crate::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.timeouts.contains(url) {
            return Err(PipelineError::Timeout(30));
        }
        self.pages.get(url).cloned().ok_or_else(|| {
            PipelineError::Fetch(format!("MockFetcher: no content registered for {url}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Hit helpers
// ---------------------------------------------------------------------------

/// Web raw hit with serper-shaped metadata.
pub fn web_hit(url: &str, title: &str) -> RawHit {
    RawHit {
        url: url.to_string(),
        title: title.to_string(),
        snippet: Some(format!("Snippet for {title}")),
        source_metadata: serde_json::json!({"provider": "serper", "position": 1}),
    }
}

/// Academic raw hit; pass an open-access PDF URL to make it extractable.
pub fn academic_hit(url: &str, title: &str, open_access_pdf: Option<&str>) -> RawHit {
    let mut metadata = serde_json::json!({
        "provider": "semantic_scholar",
        "authors": ["A. Author"],
        "year": 2022,
    });
    if let Some(pdf) = open_access_pdf {
        metadata[OPEN_ACCESS_PDF_KEY] = serde_json::Value::String(pdf.to_string());
    }
    RawHit {
        url: url.to_string(),
        title: title.to_string(),
        snippet: Some(format!("Abstract for {title}")),
        source_metadata: metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resource(url: &str, channel: Channel) -> Resource {
        Resource {
            id: 1,
            identity: url.to_string(),
            url: url.to_string(),
            title: "t".to_string(),
            snippet: None,
            channel,
            source_metadata: serde_json::json!({}),
            discovered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mock_searcher_returns_registered_hits_and_counts_calls() {
        let searcher = MockSearcher::new(Channel::Web)
            .on_query("q", vec![web_hit("https://a.com", "A"), web_hit("https://b.com", "B")]);

        let hits = searcher.search("q", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(searcher.search("unknown", 5).await.is_err());
        assert_eq!(searcher.calls(), 2);
    }

    #[tokio::test]
    async fn mock_scorer_falls_back_to_default() {
        let scorer = MockScorer::new()
            .on_url("https://a.com", CriterionScores::web(5.0, 5.0, 5.0))
            .with_default(CriterionScores::web(2.0, 2.0, 2.0));

        let specific = scorer.assess(&resource("https://a.com", Channel::Web)).await.unwrap();
        assert_eq!(specific.scores.relevance, 5.0);

        let fallback = scorer.assess(&resource("https://z.com", Channel::Web)).await.unwrap();
        assert_eq!(fallback.scores.relevance, 2.0);
        assert_eq!(scorer.calls(), 2);
    }

    #[tokio::test]
    async fn mock_fetcher_times_out_registered_urls() {
        let fetcher = MockFetcher::new()
            .on_url("https://ok.com", "text")
            .timing_out("https://slow.com");

        assert!(fetcher.fetch("https://ok.com", FetchKind::Page).await.is_ok());
        let err = fetcher.fetch("https://slow.com", FetchKind::Page).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn academic_hit_carries_the_pdf_key_only_when_given() {
        let open = academic_hit("https://doi.org/10.1/a", "A", Some("https://h.org/a.pdf"));
        assert_eq!(open.source_metadata[OPEN_ACCESS_PDF_KEY], "https://h.org/a.pdf");

        let closed = academic_hit("https://doi.org/10.1/b", "B", None);
        assert!(closed.source_metadata.get(OPEN_ACCESS_PDF_KEY).is_none());
    }
}
