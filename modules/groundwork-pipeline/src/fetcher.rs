use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::info;

use groundwork_common::{Channel, PipelineError, Resource, OPEN_ACCESS_PDF_KEY};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Page,
    Pdf,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Page => "page",
            FetchKind::Pdf => "pdf",
        }
    }
}

/// What EXTRACT may do with a selected resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Fetch { url: String, kind: FetchKind },
    /// No fetchable full text; recorded as `skipped_restricted`.
    Restricted,
}

/// Web pages are always fetchable. Academic resources are fetchable only
/// through an open-access PDF URL in their source metadata.
pub fn eligibility(resource: &Resource) -> Eligibility {
    match resource.channel {
        Channel::Web => Eligibility::Fetch {
            url: resource.url.clone(),
            kind: FetchKind::Page,
        },
        Channel::Academic => {
            let pdf_url = resource
                .source_metadata
                .get(OPEN_ACCESS_PDF_KEY)
                .and_then(|v| v.as_str())
                .filter(|u| !u.is_empty());
            match pdf_url {
                Some(url) => Eligibility::Fetch {
                    url: url.to_string(),
                    kind: FetchKind::Pdf,
                },
                None => Eligibility::Restricted,
            }
        }
    }
}

/// Retrieves the text of one resource.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, kind: FetchKind) -> crate::Result<String>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, kind: FetchKind) -> crate::Result<String> {
        info!(url, kind = kind.as_str(), "Fetching content");

        let response = self.client.get(url).send().await.map_err(to_fetch_error)?;
        if !response.status().is_success() {
            return Err(PipelineError::Fetch(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        match kind {
            FetchKind::Page => {
                let html = response.text().await.map_err(to_fetch_error)?;
                let text = extract_readable_text(url, &html)?;
                info!(url, bytes = text.len(), "Extracted page content");
                Ok(text)
            }
            FetchKind::Pdf => {
                let bytes = response.bytes().await.map_err(to_fetch_error)?;
                if !bytes.starts_with(b"%PDF") {
                    return Err(PipelineError::Fetch(format!(
                        "Response from {url} is not a PDF"
                    )));
                }
                // TODO: extract the PDF text layer instead of failing.
                Err(PipelineError::Fetch(format!(
                    "PDF text extraction is not supported yet ({url})"
                )))
            }
        }
    }
}

fn to_fetch_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Timeout(REQUEST_TIMEOUT.as_secs())
    } else {
        PipelineError::Fetch(err.to_string())
    }
}

fn extract_readable_text(url: &str, html: &str) -> crate::Result<String> {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    let text = transform_content_input(input, &config);
    if text.trim().is_empty() {
        return Err(PipelineError::Fetch(format!(
            "No readable content extracted from {url}"
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resource(channel: Channel, metadata: serde_json::Value) -> Resource {
        Resource {
            id: 1,
            identity: "id".to_string(),
            url: "https://example.com/page".to_string(),
            title: "Title".to_string(),
            snippet: None,
            channel,
            source_metadata: metadata,
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn web_resources_fetch_their_own_url_as_page() {
        let r = resource(Channel::Web, serde_json::json!({}));
        assert_eq!(
            eligibility(&r),
            Eligibility::Fetch {
                url: "https://example.com/page".to_string(),
                kind: FetchKind::Page,
            }
        );
    }

    #[test]
    fn academic_with_open_access_pdf_fetches_the_pdf() {
        let r = resource(
            Channel::Academic,
            serde_json::json!({ OPEN_ACCESS_PDF_KEY: "https://host.org/paper.pdf" }),
        );
        assert_eq!(
            eligibility(&r),
            Eligibility::Fetch {
                url: "https://host.org/paper.pdf".to_string(),
                kind: FetchKind::Pdf,
            }
        );
    }

    #[test]
    fn academic_without_open_access_pdf_is_restricted() {
        let r = resource(Channel::Academic, serde_json::json!({"provider": "crossref"}));
        assert_eq!(eligibility(&r), Eligibility::Restricted);

        let r = resource(Channel::Academic, serde_json::json!({ OPEN_ACCESS_PDF_KEY: "" }));
        assert_eq!(eligibility(&r), Eligibility::Restricted);
    }

    #[test]
    fn contentless_html_is_a_fetch_error() {
        let err = extract_readable_text("https://example.com", "<html><body></body></html>")
            .unwrap_err();
        assert!(err.to_string().contains("No readable content"));
    }
}
