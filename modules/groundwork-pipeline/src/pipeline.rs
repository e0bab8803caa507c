use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use groundwork_common::config::data_dir;
use groundwork_common::{
    composite_score, Channel, Config, ExtractionStatus, Query, Resource, FETCH_RETRY,
    SCORING_RETRY, SEARCH_RETRY,
};
use groundwork_store::{NewAssessment, NewResource, Store};

use crate::assessor::{ClaudeScorer, QualityScorer};
use crate::fetcher::{eligibility, ContentFetcher, Eligibility, FetchKind, HttpFetcher};
use crate::filter::select_top_percentile;
use crate::generator::{dedup_queries, ClaudeGenerator, QueryGenerator, SavedQueries};
use crate::retry::with_retries;
use crate::run_log::{EventKind, RunLog};
use crate::search::{resource_identity, AcademicSearcher, SearchProvider, SerperSearcher};

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generate,
    Retrieve,
    Assess,
    Filter,
    Extract,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Generate,
        Stage::Retrieve,
        Stage::Assess,
        Stage::Filter,
        Stage::Extract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Retrieve => "retrieve",
            Stage::Assess => "assess",
            Stage::Filter => "filter",
            Stage::Extract => "extract",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "generate" => Some(Stage::Generate),
            "retrieve" => Some(Stage::Retrieve),
            "assess" => Some(Stage::Assess),
            "filter" => Some(Stage::Filter),
            "extract" => Some(Stage::Extract),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stats from a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub queries_used: u32,
    pub searches_run: u32,
    pub searches_failed: u32,
    pub resources_new: u32,
    pub resources_known: u32,
    pub assessed: u32,
    pub assessment_failures: u32,
    pub web_total: u32,
    pub web_selected: u32,
    pub academic_total: u32,
    pub academic_selected: u32,
    pub extracted_success: u32,
    pub extracted_failed: u32,
    pub extracted_skipped: u32,
    pub failures_by_kind: BTreeMap<String, u32>,
}

impl RunStats {
    fn tally_failure(&mut self, kind: &str) {
        *self.failures_by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Run Complete ===")?;
        writeln!(f, "Queries used:        {}", self.queries_used)?;
        writeln!(f, "Searches run:        {}", self.searches_run)?;
        writeln!(f, "Searches failed:     {}", self.searches_failed)?;
        writeln!(f, "Resources new:       {}", self.resources_new)?;
        writeln!(f, "Resources known:     {}", self.resources_known)?;
        writeln!(f, "Assessed:            {}", self.assessed)?;
        writeln!(f, "Assessment failures: {}", self.assessment_failures)?;
        writeln!(f, "\nSelected by channel:")?;
        writeln!(f, "  web:      {} of {}", self.web_selected, self.web_total)?;
        writeln!(
            f,
            "  academic: {} of {}",
            self.academic_selected, self.academic_total
        )?;
        writeln!(f, "\nExtraction:")?;
        writeln!(f, "  success: {}", self.extracted_success)?;
        writeln!(f, "  failed:  {}", self.extracted_failed)?;
        writeln!(f, "  skipped: {}", self.extracted_skipped)?;
        if !self.failures_by_kind.is_empty() {
            writeln!(f, "\nFailures by kind:")?;
            for (kind, count) in &self.failures_by_kind {
                writeln!(f, "  {kind}: {count}")?;
            }
        }
        Ok(())
    }
}

/// Mutable per-run state threaded through the stages.
pub struct RunContext {
    pub stats: RunStats,
    pub run_log: RunLog,
}

impl RunContext {
    pub fn new(topic: &str) -> Self {
        let run_id = Uuid::new_v4().to_string();
        Self {
            stats: RunStats::default(),
            run_log: RunLog::new(run_id, topic),
        }
    }
}

/// Invocation parameters for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub topic: String,
    pub queries_file: Option<PathBuf>,
    pub query_count: usize,
    pub exploration_budget: u32,
    pub max_queries: Option<usize>,
    pub channels: Vec<Channel>,
    pub per_query_limit: usize,
    pub batch_size: usize,
    pub web_percent: f64,
    pub academic_percent: f64,
    pub min_composite: Option<f64>,
    pub retrieval_concurrency: usize,
    pub scoring_concurrency: usize,
    pub extraction_concurrency: usize,
    pub force_generate: bool,
    pub force_reassess: bool,
    pub retry_failed_extractions: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            topic: String::new(),
            queries_file: None,
            query_count: 8,
            exploration_budget: 3,
            max_queries: None,
            channels: Channel::ALL.to_vec(),
            per_query_limit: 10,
            batch_size: 10,
            web_percent: 10.0,
            academic_percent: 10.0,
            min_composite: None,
            retrieval_concurrency: 4,
            scoring_concurrency: 4,
            extraction_concurrency: 8,
            force_generate: false,
            force_reassess: false,
            retry_failed_extractions: false,
        }
    }
}

pub struct Pipeline {
    store: Store,
    options: RunOptions,
    generator: Arc<dyn QueryGenerator>,
    providers: Vec<Arc<dyn SearchProvider>>,
    scorer: Arc<dyn QualityScorer>,
    fetcher: Arc<dyn ContentFetcher>,
}

impl Pipeline {
    pub fn new(store: Store, config: &Config, options: RunOptions) -> Self {
        let mut providers: Vec<Arc<dyn SearchProvider>> = Vec::new();
        if options.channels.contains(&Channel::Web) {
            providers.push(Arc::new(SerperSearcher::new(&config.serper_api_key)));
        }
        if options.channels.contains(&Channel::Academic) {
            providers.push(Arc::new(AcademicSearcher::new(
                config.semantic_scholar_api_key.as_deref(),
                config.crossref_mailto.as_deref(),
            )));
        }

        let generator = Arc::new(ClaudeGenerator::new(&config.anthropic_api_key));
        let scorer = Arc::new(ClaudeScorer::new(&config.anthropic_api_key, &options.topic));

        Self {
            store,
            options,
            generator,
            providers,
            scorer,
            fetcher: Arc::new(HttpFetcher::new()),
        }
    }

    /// Build a pipeline from pre-built collaborators.
    pub fn with_collaborators(
        store: Store,
        options: RunOptions,
        generator: Arc<dyn QueryGenerator>,
        providers: Vec<Arc<dyn SearchProvider>>,
        scorer: Arc<dyn QualityScorer>,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Self {
        Self {
            store,
            options,
            generator,
            providers,
            scorer,
            fetcher,
        }
    }

    /// Run the requested stages, always in pipeline order.
    pub async fn run_stages(&self, stages: &[Stage]) -> Result<RunStats> {
        let mut ctx = RunContext::new(&self.options.topic);
        info!(
            run_id = ctx.run_log.run_id(),
            topic = %self.options.topic,
            "Pipeline run starting"
        );

        for stage in Stage::ALL {
            if !stages.contains(&stage) {
                continue;
            }
            ctx.run_log.log(EventKind::StageStarted {
                stage: stage.as_str().to_string(),
            });
            info!(stage = stage.as_str(), "Stage starting");
            match stage {
                Stage::Generate => self.generate(&mut ctx).await?,
                Stage::Retrieve => self.retrieve(&mut ctx).await?,
                Stage::Assess => self.assess(&mut ctx).await?,
                Stage::Filter => self.filter(&mut ctx).await?,
                Stage::Extract => self.extract(&mut ctx).await?,
            }
        }

        info!("{}", ctx.stats);
        if let Err(e) = ctx.run_log.save(&data_dir(), &ctx.stats) {
            warn!(error = %e, "Failed to save run log");
        }
        Ok(ctx.stats)
    }

    /// Store queries apply to a single channel only when the run is
    /// restricted to one.
    fn channel_filter(&self) -> Option<Channel> {
        match self.options.channels.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// GENERATE: decide this run's query set and persist it.
    async fn generate(&self, ctx: &mut RunContext) -> Result<()> {
        let topic = self.store.find_or_create_topic(&self.options.topic).await?;

        let (mut queries, origin) = if let Some(path) = &self.options.queries_file {
            let doc = SavedQueries::load(path)?;
            info!(path = %path.display(), count = doc.queries.len(), "Loaded queries from file");
            (doc.queries, "file")
        } else {
            let stored = self.store.queries_for_topic(topic.id).await?;
            if !stored.is_empty() && !self.options.force_generate {
                info!(count = stored.len(), "Reusing stored queries");
                (stored.into_iter().map(|q| q.text).collect(), "store")
            } else {
                match self
                    .generator
                    .generate(
                        &self.options.topic,
                        self.options.query_count,
                        self.options.exploration_budget,
                    )
                    .await
                {
                    Ok(generated) => {
                        let doc = SavedQueries::new(&self.options.topic, generated.clone());
                        if let Err(e) = doc.save(&data_dir()) {
                            warn!(error = %e, "Failed to save queries document");
                        }
                        (generated, "generated")
                    }
                    Err(e) => {
                        warn!(
                            topic = %self.options.topic,
                            error = %e,
                            "Query generation failed, falling back to the topic"
                        );
                        ctx.stats.tally_failure(e.kind());
                        (vec![self.options.topic.clone()], "topic_fallback")
                    }
                }
            }
        };

        queries = dedup_queries(queries, self.options.max_queries.unwrap_or(usize::MAX));
        if queries.is_empty() {
            warn!("No usable queries after deduplication, falling back to the topic");
            queries = vec![self.options.topic.clone()];
        }

        for text in &queries {
            self.store.upsert_query(topic.id, text).await?;
        }

        ctx.stats.queries_used = queries.len() as u32;
        ctx.run_log.log(EventKind::QueriesReady {
            topic: self.options.topic.clone(),
            count: queries.len(),
            origin: origin.to_string(),
        });
        info!(count = queries.len(), origin, "Queries ready");
        Ok(())
    }

    /// RETRIEVE: fan (query × provider) pairs through a bounded pool,
    /// then upsert hits by identity sequentially.
    async fn retrieve(&self, ctx: &mut RunContext) -> Result<()> {
        let topic = self.store.find_or_create_topic(&self.options.topic).await?;
        let queries = self.store.queries_for_topic(topic.id).await?;
        if queries.is_empty() {
            warn!("No stored queries, run the generate stage first");
            return Ok(());
        }

        let limit = self.options.per_query_limit;
        let pairs: Vec<(&Query, &Arc<dyn SearchProvider>)> = queries
            .iter()
            .flat_map(|query| self.providers.iter().map(move |provider| (query, provider)))
            .collect();

        let search_results: Vec<_> = stream::iter(pairs.into_iter().map(|(query, provider)| {
            async move {
                let result = with_retries(SEARCH_RETRY, provider.name(), || {
                    provider.search(&query.text, limit)
                })
                .await;
                (query, provider.channel(), provider.name(), result)
            }
        }))
        .buffer_unordered(self.options.retrieval_concurrency)
        .collect()
        .await;

        for (query, channel, provider, result) in search_results {
            ctx.stats.searches_run += 1;
            match result {
                Ok(hits) => {
                    ctx.run_log.log(EventKind::SearchQuery {
                        query: query.text.clone(),
                        provider: provider.to_string(),
                        channel: channel.as_str().to_string(),
                        result_count: hits.len(),
                    });
                    for hit in hits {
                        let identity = resource_identity(channel, &hit.url);
                        let outcome = self
                            .store
                            .upsert_resource(NewResource {
                                identity,
                                url: hit.url,
                                title: hit.title,
                                snippet: hit.snippet,
                                channel,
                                source_metadata: hit.source_metadata,
                            })
                            .await?;
                        self.store.link_query_resource(query.id, outcome.id).await?;
                        if outcome.inserted {
                            ctx.stats.resources_new += 1;
                        } else {
                            ctx.stats.resources_known += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(query = %query.text, provider, error = %e, "Search failed");
                    ctx.stats.searches_failed += 1;
                    ctx.stats.tally_failure(e.kind());
                    ctx.run_log.log(EventKind::SearchFailed {
                        query: query.text.clone(),
                        provider: provider.to_string(),
                        channel: channel.as_str().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            new = ctx.stats.resources_new,
            known = ctx.stats.resources_known,
            "Retrieval complete"
        );
        Ok(())
    }

    /// ASSESS: score pending resources in serial batches, each batch
    /// running its scoring calls through a bounded pool.
    async fn assess(&self, ctx: &mut RunContext) -> Result<()> {
        let pending = if self.options.force_reassess {
            self.store.resources(self.channel_filter()).await?
        } else {
            self.store.unassessed_resources(self.channel_filter()).await?
        };
        if pending.is_empty() {
            info!("No resources awaiting assessment");
            return Ok(());
        }
        info!(
            count = pending.len(),
            batch_size = self.options.batch_size,
            "Assessing resources"
        );

        for batch in pending.chunks(self.options.batch_size.max(1)) {
            let batch_results: Vec<_> = stream::iter(batch.iter().map(|resource| {
                async move {
                    let result =
                        with_retries(SCORING_RETRY, "scoring", || self.scorer.assess(resource))
                            .await;
                    (resource, result)
                }
            }))
            .buffer_unordered(self.options.scoring_concurrency)
            .collect()
            .await;

            for (resource, result) in batch_results {
                match result {
                    Ok(assessment) => {
                        let composite = composite_score(&assessment.scores);
                        self.store
                            .save_assessment(NewAssessment {
                                resource_id: resource.id,
                                scores: assessment.scores,
                                composite,
                                justification: assessment.justification,
                            })
                            .await?;
                        ctx.stats.assessed += 1;
                        ctx.run_log.log(EventKind::ResourceAssessed {
                            resource_id: resource.id,
                            channel: resource.channel.as_str().to_string(),
                            composite,
                        });
                    }
                    Err(e) => {
                        warn!(
                            resource_id = resource.id,
                            url = %resource.url,
                            error = %e,
                            "Assessment failed"
                        );
                        ctx.stats.assessment_failures += 1;
                        ctx.stats.tally_failure(e.kind());
                        ctx.run_log.log(EventKind::AssessmentFailed {
                            resource_id: resource.id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            assessed = ctx.stats.assessed,
            failed = ctx.stats.assessment_failures,
            "Assessment complete"
        );
        Ok(())
    }

    /// FILTER: percentile selection per channel, one decision set per
    /// channel written in a single transaction.
    async fn filter(&self, ctx: &mut RunContext) -> Result<()> {
        for channel in Channel::ALL {
            if !self.options.channels.contains(&channel) {
                continue;
            }
            let candidates = self.store.assessed_by_channel(channel).await?;
            if candidates.is_empty() {
                info!(channel = channel.as_str(), "No assessed resources to filter");
                continue;
            }

            let percent = match channel {
                Channel::Web => self.options.web_percent,
                Channel::Academic => self.options.academic_percent,
            };
            let decisions =
                select_top_percentile(&candidates, percent, self.options.min_composite);
            let selected = decisions.iter().filter(|d| d.selected).count();
            self.store.save_filter_decisions(&decisions).await?;

            match channel {
                Channel::Web => {
                    ctx.stats.web_total = candidates.len() as u32;
                    ctx.stats.web_selected = selected as u32;
                }
                Channel::Academic => {
                    ctx.stats.academic_total = candidates.len() as u32;
                    ctx.stats.academic_selected = selected as u32;
                }
            }
            ctx.run_log.log(EventKind::ChannelFiltered {
                channel: channel.as_str().to_string(),
                total: candidates.len(),
                selected,
            });
            info!(
                channel = channel.as_str(),
                total = candidates.len(),
                selected,
                percent,
                "Channel filtered"
            );
        }
        Ok(())
    }

    /// EXTRACT: resolve eligibility, fetch through a bounded pool, and
    /// persist one outcome row per selected resource.
    async fn extract(&self, ctx: &mut RunContext) -> Result<()> {
        if self.options.retry_failed_extractions {
            let cleared = self.store.clear_failed_extractions().await?;
            if cleared > 0 {
                info!(cleared, "Cleared failed extractions for retry");
            }
        }

        let pending = self
            .store
            .selected_without_content(self.channel_filter())
            .await?;
        if pending.is_empty() {
            info!("No selected resources awaiting extraction");
            return Ok(());
        }

        let mut fetchable: Vec<(&Resource, String, FetchKind)> = Vec::new();
        for resource in &pending {
            match eligibility(resource) {
                Eligibility::Fetch { url, kind } => fetchable.push((resource, url, kind)),
                Eligibility::Restricted => {
                    self.store
                        .save_extracted_content(
                            resource.id,
                            ExtractionStatus::SkippedRestricted,
                            None,
                            None,
                        )
                        .await?;
                    ctx.stats.extracted_skipped += 1;
                    ctx.run_log.log(EventKind::ExtractionOutcome {
                        resource_id: resource.id,
                        status: ExtractionStatus::SkippedRestricted.as_str().to_string(),
                        content_chars: 0,
                    });
                    info!(
                        resource_id = resource.id,
                        url = %resource.url,
                        "No open-access route, skipped"
                    );
                }
            }
        }

        info!(count = fetchable.len(), "Fetching selected resources");
        let fetch_results: Vec<_> = stream::iter(fetchable.iter().map(|(resource, url, kind)| {
            async move {
                let result =
                    with_retries(FETCH_RETRY, "fetch", || self.fetcher.fetch(url, *kind)).await;
                (*resource, result)
            }
        }))
        .buffer_unordered(self.options.extraction_concurrency)
        .collect()
        .await;

        for (resource, result) in fetch_results {
            match result {
                Ok(text) => {
                    self.store
                        .save_extracted_content(
                            resource.id,
                            ExtractionStatus::Success,
                            Some(text.as_str()),
                            None,
                        )
                        .await?;
                    ctx.stats.extracted_success += 1;
                    ctx.run_log.log(EventKind::ExtractionOutcome {
                        resource_id: resource.id,
                        status: ExtractionStatus::Success.as_str().to_string(),
                        content_chars: text.chars().count(),
                    });
                }
                Err(e) => {
                    warn!(
                        resource_id = resource.id,
                        url = %resource.url,
                        error = %e,
                        "Extraction failed"
                    );
                    let error = e.to_string();
                    self.store
                        .save_extracted_content(
                            resource.id,
                            ExtractionStatus::Failed,
                            None,
                            Some(error.as_str()),
                        )
                        .await?;
                    ctx.stats.extracted_failed += 1;
                    ctx.stats.tally_failure(e.kind());
                    ctx.run_log.log(EventKind::ExtractionOutcome {
                        resource_id: resource.id,
                        status: ExtractionStatus::Failed.as_str().to_string(),
                        content_chars: 0,
                    });
                }
            }
        }

        info!(
            success = ctx.stats.extracted_success,
            failed = ctx.stats.extracted_failed,
            skipped = ctx.stats.extracted_skipped,
            "Extraction complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_parse_round_trips_known_names() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("deploy"), None);
    }

    #[test]
    fn stages_are_declared_in_pipeline_order() {
        let names: Vec<_> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec!["generate", "retrieve", "assess", "filter", "extract"]
        );
    }

    #[test]
    fn run_stats_display_lists_failure_kinds() {
        let mut stats = RunStats::default();
        stats.tally_failure("search");
        stats.tally_failure("search");
        stats.tally_failure("timeout");

        let printed = stats.to_string();
        assert!(printed.contains("=== Pipeline Run Complete ==="));
        assert!(printed.contains("search: 2"));
        assert!(printed.contains("timeout: 1"));
    }
}
