//! Integration tests for the staged pipeline over an in-memory store and
//! mock collaborators. No network access and no API keys required.

use std::sync::{Arc, OnceLock};

use groundwork_common::{
    composite_score, Channel, CriterionScores, ExtractionStatus, FilterDecision,
    OPEN_ACCESS_PDF_KEY,
};
use groundwork_pipeline::pipeline::{Pipeline, RunOptions, Stage};
use groundwork_pipeline::testing::{
    academic_hit, web_hit, MockFetcher, MockGenerator, MockScorer, MockSearcher,
};
use groundwork_store::{NewAssessment, NewResource, SelectionDecision, Store};

/// Run artifacts (run logs, saved queries) go to a shared temp dir instead
/// of ./data.
fn init_data_dir() {
    static DATA_DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    let dir = DATA_DIR.get_or_init(|| tempfile::tempdir().unwrap());
    std::env::set_var("DATA_DIR", dir.path());
}

async fn fresh_store() -> Store {
    init_data_dir();
    Store::connect_in_memory().await.unwrap()
}

fn options(topic: &str) -> RunOptions {
    RunOptions {
        topic: topic.to_string(),
        ..RunOptions::default()
    }
}

/// Pipeline whose collaborators are all inert; for store-driven stages.
fn store_only_pipeline(store: Store, options: RunOptions) -> Pipeline {
    Pipeline::with_collaborators(
        store,
        options,
        Arc::new(MockGenerator::returning(&[])),
        Vec::new(),
        Arc::new(MockScorer::new()),
        Arc::new(MockFetcher::new()),
    )
}

async fn seed_resource(store: &Store, url: &str, channel: Channel, metadata: serde_json::Value) -> i64 {
    let outcome = store
        .upsert_resource(NewResource {
            identity: url.to_string(),
            url: url.to_string(),
            title: format!("Title for {url}"),
            snippet: None,
            channel,
            source_metadata: metadata,
        })
        .await
        .unwrap();
    outcome.id
}

async fn seed_assessment(store: &Store, resource_id: i64, scores: CriterionScores) {
    store
        .save_assessment(NewAssessment {
            resource_id,
            scores,
            composite: composite_score(&scores),
            justification: "seeded".to_string(),
        })
        .await
        .unwrap();
}

async fn seed_selected(
    store: &Store,
    url: &str,
    channel: Channel,
    metadata: serde_json::Value,
) -> i64 {
    let id = seed_resource(store, url, channel, metadata).await;
    let scores = match channel {
        Channel::Web => CriterionScores::web(4.0, 4.0, 4.0),
        Channel::Academic => CriterionScores::academic(4.0, 4.0, 4.0),
    };
    seed_assessment(store, id, scores).await;
    store
        .save_filter_decisions(&[SelectionDecision {
            resource_id: id,
            selected: true,
            rank: Some(1),
        }])
        .await
        .unwrap();
    id
}

// ---------------------------------------------------------------------------
// Scenario 1: overlapping hits across queries converge to one row each
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retrieval_is_idempotent_by_identity() {
    let store = fresh_store().await;

    let overview_hits: Vec<_> = (0..10)
        .map(|i| web_hit(&format!("https://site.com/a{i}"), &format!("A{i}")))
        .collect();
    // 3 of the second query's hits overlap the first query's URLs.
    let mut case_hits: Vec<_> = (0..3)
        .map(|i| web_hit(&format!("https://site.com/a{i}"), &format!("A{i}")))
        .collect();
    case_hits.extend((0..7).map(|i| web_hit(&format!("https://site.com/b{i}"), &format!("B{i}"))));

    let searcher = Arc::new(
        MockSearcher::new(Channel::Web)
            .on_query("X overview", overview_hits)
            .on_query("X case studies", case_hits),
    );
    let generator = Arc::new(MockGenerator::returning(&["X overview", "X case studies"]));

    let mut opts = options("X");
    opts.channels = vec![Channel::Web];
    let pipeline = Pipeline::with_collaborators(
        store.clone(),
        opts.clone(),
        generator,
        vec![searcher.clone()],
        Arc::new(MockScorer::new()),
        Arc::new(MockFetcher::new()),
    );

    let stats = pipeline
        .run_stages(&[Stage::Generate, Stage::Retrieve])
        .await
        .unwrap();

    assert_eq!(stats.queries_used, 2);
    assert_eq!(stats.resources_new, 17, "2x10 hits with 3 overlaps dedup to 17");
    assert_eq!(stats.resources_known, 3);
    assert_eq!(store.resources(Some(Channel::Web)).await.unwrap().len(), 17);

    // A second run rediscovers all 20 hits without inserting anything.
    let searcher_again = Arc::new(
        MockSearcher::new(Channel::Web)
            .on_query(
                "X overview",
                (0..10)
                    .map(|i| web_hit(&format!("https://site.com/a{i}"), &format!("A{i}")))
                    .collect(),
            )
            .on_query(
                "X case studies",
                (0..3)
                    .map(|i| web_hit(&format!("https://site.com/a{i}"), &format!("A{i}")))
                    .chain((0..7).map(|i| web_hit(&format!("https://site.com/b{i}"), &format!("B{i}"))))
                    .collect(),
            ),
    );
    let pipeline = Pipeline::with_collaborators(
        store.clone(),
        opts,
        Arc::new(MockGenerator::returning(&["unused"])),
        vec![searcher_again],
        Arc::new(MockScorer::new()),
        Arc::new(MockFetcher::new()),
    );

    let stats = pipeline
        .run_stages(&[Stage::Generate, Stage::Retrieve])
        .await
        .unwrap();

    assert_eq!(stats.queries_used, 2, "stored queries are reused, not regenerated");
    assert_eq!(stats.resources_new, 0);
    assert_eq!(stats.resources_known, 20);
    assert_eq!(store.resources(Some(Channel::Web)).await.unwrap().len(), 17);
}

// ---------------------------------------------------------------------------
// Scenario 2: 20% of 17 assessed resources selects the top 4
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filter_selects_top_percentile_with_ranks() {
    let store = fresh_store().await;
    for i in 0..17 {
        let id = seed_resource(
            &store,
            &format!("https://site.com/p{i}"),
            Channel::Web,
            serde_json::json!({}),
        )
        .await;
        // Composite rises with i, so the last four inserted win.
        seed_assessment(&store, id, CriterionScores::web(4.0, 3.0 + i as f64 * 0.1, 3.0)).await;
    }

    let mut opts = options("X");
    opts.channels = vec![Channel::Web];
    opts.web_percent = 20.0;
    let pipeline = store_only_pipeline(store.clone(), opts);

    let stats = pipeline.run_stages(&[Stage::Filter]).await.unwrap();

    assert_eq!(stats.web_total, 17);
    assert_eq!(stats.web_selected, 4, "ceil(0.2 * 17) = 4");

    let decisions = store.filter_decisions(Channel::Web).await.unwrap();
    assert_eq!(decisions.len(), 17, "every candidate gets a decision row");

    let mut ranked: Vec<_> = decisions
        .iter()
        .filter(|d| d.selected)
        .map(|d| (d.rank.unwrap(), d.resource_id))
        .collect();
    ranked.sort();
    assert_eq!(ranked, vec![(1, 17), (2, 16), (3, 15), (4, 14)]);
}

// ---------------------------------------------------------------------------
// Scenario 3: a fetch timeout marks that resource failed, run continues
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_timeout_marks_failed_and_continues() {
    let store = fresh_store().await;
    let slow_id = seed_selected(&store, "https://slow.com/page", Channel::Web, serde_json::json!({})).await;
    let ok_id = seed_selected(&store, "https://ok.com/page", Channel::Web, serde_json::json!({})).await;

    let fetcher = Arc::new(
        MockFetcher::new()
            .timing_out("https://slow.com/page")
            .on_url("https://ok.com/page", "extracted text"),
    );

    let mut opts = options("X");
    opts.channels = vec![Channel::Web];
    let pipeline = Pipeline::with_collaborators(
        store.clone(),
        opts,
        Arc::new(MockGenerator::returning(&[])),
        Vec::new(),
        Arc::new(MockScorer::new()),
        fetcher.clone(),
    );

    let stats = pipeline.run_stages(&[Stage::Extract]).await.unwrap();

    assert_eq!(stats.extracted_success, 1);
    assert_eq!(stats.extracted_failed, 1);
    assert_eq!(stats.failures_by_kind.get("timeout"), Some(&1));

    let failed = store.extracted_content(slow_id).await.unwrap().unwrap();
    assert_eq!(failed.status, ExtractionStatus::Failed);
    assert!(failed.error.as_deref().unwrap_or("").contains("Timed out"));
    assert_eq!(failed.text, None);

    let ok = store.extracted_content(ok_id).await.unwrap().unwrap();
    assert_eq!(ok.status, ExtractionStatus::Success);
    assert_eq!(ok.text.as_deref(), Some("extracted text"));

    assert_eq!(fetcher.calls(), 3, "the timed-out URL gets exactly one retry");
}

// ---------------------------------------------------------------------------
// Scenario 4: re-running ASSESS only scores unassessed resources
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assess_skips_already_assessed_resources() {
    let store = fresh_store().await;
    let mut ids = Vec::new();
    for i in 0..20 {
        ids.push(
            seed_resource(
                &store,
                &format!("https://site.com/r{i}"),
                Channel::Web,
                serde_json::json!({}),
            )
            .await,
        );
    }
    for id in &ids[..5] {
        seed_assessment(&store, *id, CriterionScores::web(3.0, 3.0, 3.0)).await;
    }

    let scorer = Arc::new(MockScorer::new().with_default(CriterionScores::web(4.0, 4.0, 4.0)));
    let mut opts = options("X");
    opts.channels = vec![Channel::Web];
    let pipeline = Pipeline::with_collaborators(
        store.clone(),
        opts,
        Arc::new(MockGenerator::returning(&[])),
        Vec::new(),
        scorer.clone(),
        Arc::new(MockFetcher::new()),
    );

    let stats = pipeline.run_stages(&[Stage::Assess]).await.unwrap();

    assert_eq!(scorer.calls(), 15, "only the unassessed 15 reach the scorer");
    assert_eq!(stats.assessed, 15);
    assert_eq!(stats.assessment_failures, 0);
}

// ---------------------------------------------------------------------------
// Scenario 5: academic resources without an open-access PDF never hit
// the fetcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn academic_without_open_access_pdf_is_skipped_without_fetching() {
    let store = fresh_store().await;
    let open_id = seed_selected(
        &store,
        "https://doi.org/10.1/open",
        Channel::Academic,
        serde_json::json!({ OPEN_ACCESS_PDF_KEY: "https://host.org/open.pdf" }),
    )
    .await;
    let closed_id = seed_selected(
        &store,
        "https://doi.org/10.1/closed",
        Channel::Academic,
        serde_json::json!({"provider": "semantic_scholar"}),
    )
    .await;

    let fetcher = Arc::new(MockFetcher::new().on_url("https://host.org/open.pdf", "paper text"));

    let mut opts = options("X");
    opts.channels = vec![Channel::Academic];
    let pipeline = Pipeline::with_collaborators(
        store.clone(),
        opts,
        Arc::new(MockGenerator::returning(&[])),
        Vec::new(),
        Arc::new(MockScorer::new()),
        fetcher.clone(),
    );

    let stats = pipeline.run_stages(&[Stage::Extract]).await.unwrap();

    assert_eq!(stats.extracted_success, 1);
    assert_eq!(stats.extracted_skipped, 1);
    assert_eq!(fetcher.calls(), 1, "restricted resources never reach the fetcher");

    let open = store.extracted_content(open_id).await.unwrap().unwrap();
    assert_eq!(open.status, ExtractionStatus::Success);
    assert_eq!(open.text.as_deref(), Some("paper text"));

    let closed = store.extracted_content(closed_id).await.unwrap().unwrap();
    assert_eq!(closed.status, ExtractionStatus::SkippedRestricted);
    assert_eq!(closed.text, None);
}

// ---------------------------------------------------------------------------
// Scenario 6: generator failure falls back to the topic as sole query
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generator_failure_falls_back_to_the_topic_query() {
    let store = fresh_store().await;
    let searcher = Arc::new(
        MockSearcher::new(Channel::Web)
            .on_query("urban heat islands", vec![web_hit("https://a.com/1", "One")]),
    );

    let mut opts = options("urban heat islands");
    opts.channels = vec![Channel::Web];
    let pipeline = Pipeline::with_collaborators(
        store.clone(),
        opts,
        Arc::new(MockGenerator::failing()),
        vec![searcher.clone()],
        Arc::new(MockScorer::new()),
        Arc::new(MockFetcher::new()),
    );

    let stats = pipeline
        .run_stages(&[Stage::Generate, Stage::Retrieve])
        .await
        .unwrap();

    assert_eq!(stats.queries_used, 1, "the topic itself becomes the sole query");
    assert_eq!(stats.failures_by_kind.get("generation"), Some(&1));
    assert_eq!(stats.resources_new, 1);
    assert_eq!(searcher.calls(), 1);
}

// ---------------------------------------------------------------------------
// Scenario 7: re-running FILTER with identical parameters is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rerunning_filter_yields_identical_decisions() {
    let store = fresh_store().await;
    for i in 0..10 {
        let id = seed_resource(
            &store,
            &format!("https://site.com/f{i}"),
            Channel::Web,
            serde_json::json!({}),
        )
        .await;
        seed_assessment(&store, id, CriterionScores::web(2.0 + i as f64 * 0.3, 3.0, 3.0)).await;
    }

    let mut opts = options("X");
    opts.channels = vec![Channel::Web];
    opts.web_percent = 30.0;
    let pipeline = store_only_pipeline(store.clone(), opts);

    let decision_key =
        |d: &FilterDecision| (d.resource_id, d.selected, d.rank);

    pipeline.run_stages(&[Stage::Filter]).await.unwrap();
    let mut first: Vec<_> = store
        .filter_decisions(Channel::Web)
        .await
        .unwrap()
        .iter()
        .map(decision_key)
        .collect();

    pipeline.run_stages(&[Stage::Filter]).await.unwrap();
    let mut second: Vec<_> = store
        .filter_decisions(Channel::Web)
        .await
        .unwrap()
        .iter()
        .map(decision_key)
        .collect();

    first.sort();
    second.sort();
    assert_eq!(first, second);
    assert_eq!(first.iter().filter(|(_, selected, _)| *selected).count(), 3);
}

// ---------------------------------------------------------------------------
// Scenario 8: a full run composes all five stages end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_run_composes_all_stages() {
    let store = fresh_store().await;

    let generator = Arc::new(MockGenerator::returning(&["X overview"]));
    let web = Arc::new(MockSearcher::new(Channel::Web).on_query(
        "X overview",
        vec![web_hit("https://a.com/1", "One"), web_hit("https://a.com/2", "Two")],
    ));
    let academic = Arc::new(MockSearcher::new(Channel::Academic).on_query(
        "X overview",
        vec![academic_hit(
            "https://doi.org/10.1/x",
            "Paper X",
            Some("https://host.org/x.pdf"),
        )],
    ));
    let scorer = Arc::new(
        MockScorer::new()
            .on_url("https://a.com/1", CriterionScores::web(5.0, 4.0, 4.0))
            .on_url("https://a.com/2", CriterionScores::web(2.0, 2.0, 2.0))
            .on_url("https://doi.org/10.1/x", CriterionScores::academic(4.0, 4.0, 4.0)),
    );
    let fetcher = Arc::new(
        MockFetcher::new()
            .on_url("https://a.com/1", "web text one")
            .on_url("https://a.com/2", "web text two")
            .on_url("https://host.org/x.pdf", "paper text"),
    );

    let mut opts = options("X");
    opts.web_percent = 100.0;
    opts.academic_percent = 100.0;
    let pipeline = Pipeline::with_collaborators(
        store.clone(),
        opts,
        generator,
        vec![web.clone(), academic.clone()],
        scorer.clone(),
        fetcher.clone(),
    );

    let stats = pipeline.run_stages(&Stage::ALL).await.unwrap();

    assert_eq!(stats.queries_used, 1);
    assert_eq!(stats.searches_run, 2, "one query across two providers");
    assert_eq!(stats.searches_failed, 0);
    assert_eq!(stats.resources_new, 3);
    assert_eq!(stats.assessed, 3);
    assert_eq!(stats.web_selected, 2);
    assert_eq!(stats.web_total, 2);
    assert_eq!(stats.academic_selected, 1);
    assert_eq!(stats.academic_total, 1);
    assert_eq!(stats.extracted_success, 3);
    assert_eq!(stats.extracted_failed, 0);
    assert_eq!(stats.extracted_skipped, 0);

    // Stored composites are recomputable from stored criterion scores.
    let resources = store.resources(None).await.unwrap();
    assert_eq!(resources.len(), 3);
    for resource in &resources {
        let assessment = store.assessment(resource.id).await.unwrap().unwrap();
        assert_eq!(assessment.composite, composite_score(&assessment.scores));
    }
}
