use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use groundwork_common::{Channel, PipelineError, RawHit, OPEN_ACCESS_PDF_KEY};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SERPER_URL: &str = "https://google.serper.dev/search";
const SEMANTIC_SCHOLAR_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";
const CROSSREF_URL: &str = "https://api.crossref.org/works";

const PAPER_FIELDS: &str = "title,abstract,url,year,venue,authors,externalIds,openAccessPdf";

/// One retrieval channel's search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> crate::Result<Vec<RawHit>>;

    fn channel(&self) -> Channel;

    fn name(&self) -> &'static str;
}

fn to_search_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Timeout(REQUEST_TIMEOUT.as_secs())
    } else {
        PipelineError::Search(err.to_string())
    }
}

// --- Identity normalization ---

/// Strip tracking parameters and fragments so syntactic URL variants share
/// one identity. Unparseable input passes through unchanged.
pub fn sanitize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let keep: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if keep.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(&keep);
    }
    parsed.set_fragment(None);

    parsed.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_")
        || matches!(key, "fbclid" | "gclid" | "msclkid" | "ref" | "ref_src")
}

/// Deduplication key for a hit: tracking-stripped URL on the web channel,
/// lowercased DOI/paper URL on the academic channel.
pub fn resource_identity(channel: Channel, url: &str) -> String {
    match channel {
        Channel::Web => sanitize_url(url),
        Channel::Academic => url.to_ascii_lowercase(),
    }
}

fn doi_url(doi: &str) -> String {
    format!("https://doi.org/{}", doi.trim().to_ascii_lowercase())
}

// --- Serper (web channel) ---

pub struct SerperSearcher {
    api_key: String,
    client: Client,
}

impl SerperSearcher {
    pub fn new(api_key: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            api_key: api_key.to_string(),
            client,
        }
    }
}

#[async_trait]
impl SearchProvider for SerperSearcher {
    async fn search(&self, query: &str, limit: usize) -> crate::Result<Vec<RawHit>> {
        let response = self
            .client
            .post(SERPER_URL)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query, "num": limit }))
            .send()
            .await
            .map_err(to_search_error)?;

        if !response.status().is_success() {
            return Err(PipelineError::Search(format!(
                "Serper API error ({})",
                response.status()
            )));
        }

        let body: SerperResponse = response.json().await.map_err(to_search_error)?;
        let hits = serper_hits(body);
        info!(query, count = hits.len(), "Serper search complete");
        Ok(hits)
    }

    fn channel(&self) -> Channel {
        Channel::Web
    }

    fn name(&self) -> &'static str {
        "serper"
    }
}

#[derive(Debug, serde::Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperHit>,
}

#[derive(Debug, serde::Deserialize)]
struct SerperHit {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: Option<String>,
}

fn serper_hits(body: SerperResponse) -> Vec<RawHit> {
    body.organic
        .into_iter()
        .enumerate()
        .filter(|(_, hit)| !hit.link.is_empty())
        .map(|(position, hit)| {
            let domain = Url::parse(&hit.link)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string));
            RawHit {
                url: hit.link,
                title: hit.title,
                snippet: hit.snippet,
                source_metadata: serde_json::json!({
                    "provider": "serper",
                    "position": position + 1,
                    "domain": domain,
                }),
            }
        })
        .collect()
}

// --- Semantic Scholar + Crossref (academic channel) ---

/// Paper search backed by Semantic Scholar, topped up from Crossref when
/// Semantic Scholar returns fewer than `limit` rows. Hit URLs are the DOI
/// URL when a DOI exists, otherwise the paper page.
pub struct AcademicSearcher {
    api_key: Option<String>,
    mailto: Option<String>,
    client: Client,
}

impl AcademicSearcher {
    pub fn new(api_key: Option<&str>, mailto: Option<&str>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            api_key: api_key.map(str::to_string),
            mailto: mailto.map(str::to_string),
            client,
        }
    }

    async fn semantic_scholar(&self, query: &str, limit: usize) -> crate::Result<Vec<RawHit>> {
        let limit_param = limit.to_string();
        let mut request = self.client.get(SEMANTIC_SCHOLAR_URL).query(&[
            ("query", query),
            ("limit", limit_param.as_str()),
            ("fields", PAPER_FIELDS),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(to_search_error)?;
        if !response.status().is_success() {
            return Err(PipelineError::Search(format!(
                "Semantic Scholar API error ({})",
                response.status()
            )));
        }

        let body: SemanticScholarResponse = response.json().await.map_err(to_search_error)?;
        Ok(semantic_scholar_hits(body))
    }

    async fn crossref(&self, query: &str, limit: usize) -> crate::Result<Vec<RawHit>> {
        let rows_param = limit.to_string();
        let mut request = self
            .client
            .get(CROSSREF_URL)
            .query(&[("query", query), ("rows", rows_param.as_str())]);
        if let Some(mailto) = &self.mailto {
            request = request.query(&[("mailto", mailto.as_str())]);
        }

        let response = request.send().await.map_err(to_search_error)?;
        if !response.status().is_success() {
            return Err(PipelineError::Search(format!(
                "Crossref API error ({})",
                response.status()
            )));
        }

        let body: CrossrefResponse = response.json().await.map_err(to_search_error)?;
        Ok(crossref_hits(body))
    }
}

#[async_trait]
impl SearchProvider for AcademicSearcher {
    async fn search(&self, query: &str, limit: usize) -> crate::Result<Vec<RawHit>> {
        let mut hits: Vec<RawHit> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        match self.semantic_scholar(query, limit).await {
            Ok(found) => {
                for hit in found {
                    if seen.insert(hit.url.to_ascii_lowercase()) {
                        hits.push(hit);
                    }
                }
            }
            Err(e) => warn!(query, error = %e, "Semantic Scholar search failed, trying Crossref"),
        }

        if hits.len() < limit {
            match self.crossref(query, limit - hits.len()).await {
                Ok(found) => {
                    for hit in found {
                        if hits.len() == limit {
                            break;
                        }
                        if seen.insert(hit.url.to_ascii_lowercase()) {
                            hits.push(hit);
                        }
                    }
                }
                Err(e) if hits.is_empty() => return Err(e),
                Err(e) => warn!(query, error = %e, "Crossref top-up failed, keeping partial results"),
            }
        }

        info!(query, count = hits.len(), "Academic search complete");
        Ok(hits)
    }

    fn channel(&self) -> Channel {
        Channel::Academic
    }

    fn name(&self) -> &'static str {
        "academic"
    }
}

#[derive(Debug, serde::Deserialize)]
struct SemanticScholarResponse {
    #[serde(default)]
    data: Vec<SemanticScholarPaper>,
}

#[derive(Debug, serde::Deserialize)]
struct SemanticScholarPaper {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    authors: Vec<SemanticScholarAuthor>,
    #[serde(default, rename = "externalIds")]
    external_ids: Option<ExternalIds>,
    #[serde(default, rename = "openAccessPdf")]
    open_access_pdf: Option<OpenAccessPdf>,
}

#[derive(Debug, serde::Deserialize)]
struct SemanticScholarAuthor {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ExternalIds {
    #[serde(default, rename = "DOI")]
    doi: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAccessPdf {
    #[serde(default)]
    url: Option<String>,
}

fn semantic_scholar_hits(body: SemanticScholarResponse) -> Vec<RawHit> {
    body.data
        .into_iter()
        .enumerate()
        .filter_map(|(position, paper)| {
            let title = paper.title.filter(|t| !t.is_empty())?;
            let doi = paper.external_ids.as_ref().and_then(|ids| ids.doi.as_deref());
            let url = match (doi, paper.url.as_deref()) {
                (Some(doi), _) => doi_url(doi),
                (None, Some(url)) if !url.is_empty() => url.to_string(),
                _ => return None,
            };

            let authors: Vec<String> = paper
                .authors
                .into_iter()
                .filter_map(|a| a.name)
                .collect();
            let mut metadata = serde_json::json!({
                "provider": "semantic_scholar",
                "position": position + 1,
                "authors": authors,
                "year": paper.year,
                "venue": paper.venue.as_deref().filter(|v| !v.is_empty()),
                "has_abstract": paper.abstract_text.is_some(),
            });
            if let Some(pdf) = paper.open_access_pdf.and_then(|p| p.url).filter(|u| !u.is_empty()) {
                metadata[OPEN_ACCESS_PDF_KEY] = serde_json::Value::String(pdf);
            }

            Some(RawHit {
                url,
                title,
                snippet: paper.abstract_text,
                source_metadata: metadata,
            })
        })
        .collect()
}

#[derive(Debug, serde::Deserialize)]
struct CrossrefResponse {
    message: CrossrefMessage,
}

#[derive(Debug, serde::Deserialize)]
struct CrossrefMessage {
    #[serde(default)]
    items: Vec<CrossrefWork>,
}

#[derive(Debug, serde::Deserialize)]
struct CrossrefWork {
    #[serde(default, rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(default)]
    issued: Option<CrossrefDate>,
    #[serde(default, rename = "container-title")]
    container_title: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
struct CrossrefAuthor {
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    family: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct CrossrefDate {
    #[serde(default, rename = "date-parts")]
    date_parts: Vec<Vec<Option<i32>>>,
}

fn crossref_hits(body: CrossrefResponse) -> Vec<RawHit> {
    body.message
        .items
        .into_iter()
        .enumerate()
        .filter_map(|(position, work)| {
            // Works without a DOI have no stable identity; skip them.
            let doi = work.doi.filter(|d| !d.is_empty())?;
            let title = work.title.into_iter().next().filter(|t| !t.is_empty())?;

            let authors: Vec<String> = work
                .author
                .iter()
                .filter_map(|a| match (&a.given, &a.family) {
                    (Some(given), Some(family)) => Some(format!("{given} {family}")),
                    (None, Some(family)) => Some(family.clone()),
                    _ => None,
                })
                .collect();
            let year = work
                .issued
                .as_ref()
                .and_then(|d| d.date_parts.first())
                .and_then(|parts| parts.first())
                .copied()
                .flatten();
            let venue = work.container_title.into_iter().next().filter(|v| !v.is_empty());

            Some(RawHit {
                url: doi_url(&doi),
                title,
                snippet: work.abstract_text.clone(),
                source_metadata: serde_json::json!({
                    "provider": "crossref",
                    "position": position + 1,
                    "authors": authors,
                    "year": year,
                    "venue": venue,
                    "has_abstract": work.abstract_text.is_some(),
                }),
            })
        })
        .collect()
}
