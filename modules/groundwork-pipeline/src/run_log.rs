use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::pipeline::RunStats;

/// Ordered event timeline for one pipeline run, serialized to
/// `{data_dir}/runs/{run_id}.json` alongside the final stats.
pub struct RunLog {
    run_id: String,
    topic: String,
    started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StageStarted {
        stage: String,
    },
    QueriesReady {
        topic: String,
        count: usize,
        origin: String,
    },
    SearchQuery {
        query: String,
        provider: String,
        channel: String,
        result_count: usize,
    },
    SearchFailed {
        query: String,
        provider: String,
        channel: String,
        error: String,
    },
    ResourceAssessed {
        resource_id: i64,
        channel: String,
        composite: f64,
    },
    AssessmentFailed {
        resource_id: i64,
        error: String,
    },
    ChannelFiltered {
        channel: String,
        total: usize,
        selected: usize,
    },
    ExtractionOutcome {
        resource_id: i64,
        status: String,
        content_chars: usize,
    },
}

#[derive(Serialize)]
struct SerializedRunLog<'a> {
    run_id: &'a str,
    topic: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: &'a RunStats,
    events: &'a [RunEvent],
}

impl RunLog {
    pub fn new(run_id: String, topic: &str) -> Self {
        Self {
            run_id,
            topic: topic.to_string(),
            started_at: Utc::now(),
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn save(&self, data_dir: &Path, stats: &RunStats) -> anyhow::Result<PathBuf> {
        let dir = data_dir.join("runs");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", self.run_id));

        let doc = SerializedRunLog {
            run_id: &self.run_id,
            topic: &self.topic,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats,
            events: &self.events,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&doc)?)?;

        info!(path = %path.display(), events = self.events.len(), "Run log saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_writes_ordered_events_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new("run-test".to_string(), "Urban heat islands");
        log.log(EventKind::StageStarted {
            stage: "retrieve".to_string(),
        });
        log.log(EventKind::ChannelFiltered {
            channel: "web".to_string(),
            total: 17,
            selected: 4,
        });

        let mut stats = RunStats::default();
        stats.searches_run = 2;

        let path = log.save(dir.path(), &stats).unwrap();
        assert!(path.ends_with("runs/run-test.json"));

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["topic"], "Urban heat islands");
        assert_eq!(doc["stats"]["searches_run"], 2);
        assert_eq!(doc["events"][0]["seq"], 0);
        assert_eq!(doc["events"][0]["type"], "stage_started");
        assert_eq!(doc["events"][1]["seq"], 1);
        assert_eq!(doc["events"][1]["type"], "channel_filtered");
        assert_eq!(doc["events"][1]["selected"], 4);
    }
}
