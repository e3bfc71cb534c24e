//! Batch pipeline behaviour against recording collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use partition_dispatch::engine::{DryRunEngine, QueryEngine};
use partition_dispatch::error::{AppError, Result};
use partition_dispatch::models::{
    Config, DispatchedQuery, Notification, ObjectMetadata, QueryTags,
};
use partition_dispatch::pipeline::{BatchOrchestrator, BatchReport, EventStatus, Stage};
use partition_dispatch::services::{Housekeeping, ObjectHousekeeping};
use partition_dispatch::storage::{LocalStorage, ObjectStore};
use tempfile::TempDir;

const BUCKET: &str = "data";

/// Ordered record of every collaborator call.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<Call>>>);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Delete(String),
    Head(String),
    Repair(String, String, String),
    Query(DispatchedQuery),
    Prune(String, String),
    Baseline(String, String),
}

impl Journal {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    fn repairs(&self) -> Vec<(String, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Repair(t, d, p) => Some((t, d, p)),
                _ => None,
            })
            .collect()
    }

    fn queries(&self) -> Vec<DispatchedQuery> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Query(q) => Some(q),
                _ => None,
            })
            .collect()
    }

    fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(predicate)
    }
}

struct FakeStore {
    journal: Journal,
    metadata: HashMap<String, ObjectMetadata>,
    failing_heads: HashSet<String>,
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<()> {
        self.journal.push(Call::Delete(key.to_string()));
        Ok(())
    }

    async fn head_object_metadata(&self, _bucket: &str, key: &str) -> Result<ObjectMetadata> {
        self.journal.push(Call::Head(key.to_string()));
        if self.failing_heads.contains(key) {
            return Err(AppError::s3("access denied"));
        }
        Ok(self.metadata.get(key).cloned().unwrap_or_default())
    }

    async fn list_keys(&self, _bucket: &str, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn read_bytes_optional(&self, _bucket: &str, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn write_bytes(
        &self,
        _bucket: &str,
        _key: &str,
        _body: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        Ok(())
    }
}

struct FakeEngine {
    journal: Journal,
    failing_partitions: HashSet<String>,
    failing_queries: HashSet<String>,
}

#[async_trait]
impl QueryEngine for FakeEngine {
    async fn repair_partition(&self, table: &str, date: &str, partition: &str) -> Result<()> {
        self.journal
            .push(Call::Repair(table.into(), date.into(), partition.into()));
        if self.failing_partitions.contains(partition) {
            return Err(AppError::athena("catalog unavailable"));
        }
        Ok(())
    }

    async fn run_query(&self, query: &DispatchedQuery) -> Result<String> {
        self.journal.push(Call::Query(query.clone()));
        if self.failing_queries.contains(&query.query_name) {
            return Err(AppError::query(&query.query_name, "rejected"));
        }
        Ok(format!("exec-{}", query.query_name))
    }
}

struct FakeHousekeeping {
    journal: Journal,
    fail_prune: bool,
    fail_baseline: bool,
}

#[async_trait]
impl Housekeeping for FakeHousekeeping {
    async fn prune_obsolete(
        &self,
        _store: &dyn ObjectStore,
        _bucket: &str,
        key: &str,
        table: &str,
    ) -> Result<usize> {
        self.journal.push(Call::Prune(table.into(), key.into()));
        if self.fail_prune {
            return Err(AppError::s3("listing denied"));
        }
        Ok(1)
    }

    async fn update_baseline(
        &self,
        _store: &dyn ObjectStore,
        network: &str,
        source_id: &str,
    ) -> Result<()> {
        self.journal
            .push(Call::Baseline(network.into(), source_id.into()));
        if self.fail_baseline {
            return Err(AppError::s3("baseline table locked"));
        }
        Ok(())
    }
}

/// Collaborators and configuration for one test batch.
struct Harness {
    config: Config,
    journal: Journal,
    metadata: HashMap<String, ObjectMetadata>,
    failing_partitions: HashSet<String>,
    failing_queries: HashSet<String>,
    failing_heads: HashSet<String>,
    fail_prune: bool,
    fail_baseline: bool,
}

impl Harness {
    fn new() -> Self {
        let mut config = Config::default();
        config.window.warmup_steps = 100;
        config.window.horizon_steps = 50;
        Self {
            config,
            journal: Journal::default(),
            metadata: HashMap::new(),
            failing_partitions: HashSet::new(),
            failing_queries: HashSet::new(),
            failing_heads: HashSet::new(),
            fail_prune: false,
            fail_baseline: false,
        }
    }

    /// Registry with a single tracked table `T` fanning out to two result tables.
    fn with_table_t() -> Self {
        let mut harness = Self::new();
        let registry = &mut harness.config.registry;
        registry.tables.push("T".into());
        registry.tags = QueryTags::from_entries([
            ("T", vec![("R1", &["Q1"][..]), ("R2", &["Q2"][..])]),
            ("fact_energy_trace", vec![]),
            ("modelA", vec![("energy_out", &["QA"][..])]),
        ]);
        harness
    }

    fn metadata(mut self, key: &str, pairs: &[(&str, &str)]) -> Self {
        let entries = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.metadata.insert(key.to_string(), entries);
        self
    }

    async fn run(&self, keys: &[&str]) -> BatchReport {
        let store = FakeStore {
            journal: self.journal.clone(),
            metadata: self.metadata.clone(),
            failing_heads: self.failing_heads.clone(),
        };
        let engine = FakeEngine {
            journal: self.journal.clone(),
            failing_partitions: self.failing_partitions.clone(),
            failing_queries: self.failing_queries.clone(),
        };
        let housekeeping = FakeHousekeeping {
            journal: self.journal.clone(),
            fail_prune: self.fail_prune,
            fail_baseline: self.fail_baseline,
        };

        let orchestrator =
            BatchOrchestrator::new(Arc::new(self.config.clone()), &store, &engine, &housekeeping);
        let notifications = keys.iter().map(|k| Notification::new(BUCKET, *k)).collect();
        orchestrator.run(notifications).await
    }
}

#[tokio::test]
async fn untracked_table_has_no_side_effects() {
    let harness = Harness::new();
    let report = harness
        .run(&["scratch/date=2024-05-01/partition_name=flow_1/out.csv"])
        .await;

    assert!(harness.journal.calls().is_empty());
    assert_eq!(report.events[0].status, EventStatus::Ignored);
    assert_eq!(report.summary.ignored, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn metadata_sidecar_is_only_deleted() {
    let harness = Harness::new();
    let key = "fact_vehicle_trace/date=2024-05-01/partition_name=flow_1/out.csv.metadata";
    let report = harness.run(&[key]).await;

    assert_eq!(harness.journal.calls(), vec![Call::Delete(key.to_string())]);
    assert_eq!(report.events[0].status, EventStatus::MetadataDeleted);
}

#[tokio::test]
async fn repair_called_once_with_key_coordinates() {
    let harness = Harness::new();
    harness
        .run(&["metadata_table/extra/date=2024-05-01/partition_name=flow_42/meta.csv"])
        .await;

    assert_eq!(
        harness.journal.repairs(),
        vec![(
            "metadata_table".to_string(),
            "2024-05-01".to_string(),
            "flow_42".to_string()
        )]
    );
    // Not in the tag registry: repaired, never dispatched.
    assert!(harness.journal.queries().is_empty());
}

#[tokio::test]
async fn aggregate_table_is_pruned_after_repair() {
    let harness = Harness::new();
    let key = "leaderboard_chart_agg/date=2024-05-01/partition_name=flow_3/agg.csv";
    let report = harness.run(&[key]).await;

    let repair = harness
        .journal
        .position(|c| matches!(c, Call::Repair(..)))
        .unwrap();
    let prune = harness
        .journal
        .position(|c| matches!(c, Call::Prune(..)))
        .unwrap();
    assert!(repair < prune);
    assert_eq!(report.events[0].pruned, Some(1));

    // Other tables are never pruned.
    let other = Harness::new();
    other
        .run(&["leaderboard_chart/date=2024-05-01/partition_name=flow_3/chart.csv"])
        .await;
    assert!(other.journal.position(|c| matches!(c, Call::Prune(..))).is_none());
}

#[tokio::test]
async fn prune_precedes_dispatch_for_pruned_table() {
    let mut harness = Harness::with_table_t();
    harness.config.registry.aggregate_table = "T".into();
    harness
        .run(&["T/date=2024-05-01/partition_name=flow_3/out.csv"])
        .await;

    let prune = harness
        .journal
        .position(|c| matches!(c, Call::Prune(..)))
        .unwrap();
    let first_query = harness
        .journal
        .position(|c| matches!(c, Call::Query(..)))
        .unwrap();
    assert!(prune < first_query);
}

#[tokio::test]
async fn baseline_fires_only_for_literal_true() {
    let key = "fact_vehicle_trace/date=2024-05-01/partition_name=flow_9/trace.csv";
    let cases: [(&[(&str, &str)], bool); 4] = [
        (&[("network", "I-24"), ("is_baseline", "True")], true),
        (&[("network", "I-24"), ("is_baseline", "False")], false),
        (&[("network", "I-24"), ("is_baseline", "true")], false),
        (&[("network", "I-24")], false),
    ];

    for (metadata, expected) in cases {
        let harness = Harness::new().metadata(key, metadata);
        let report = harness.run(&[key]).await;

        let baselines: Vec<_> = harness
            .journal
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Baseline(..)))
            .collect();
        if expected {
            assert_eq!(baselines, vec![Call::Baseline("I-24".into(), "flow_9".into())]);
        } else {
            assert!(baselines.is_empty(), "unexpected baseline for {metadata:?}");
        }
        assert_eq!(report.events[0].baseline_updated, expected);
    }
}

#[tokio::test]
async fn energy_trace_resolves_by_model_id() {
    let harness = Harness::with_table_t();
    let report = harness
        .run(&["fact_energy_trace/date=2024-05-01/partition_name=flow_12_modelA/e.csv"])
        .await;

    let queries = harness.journal.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].query_name, "QA");
    assert_eq!(queries[0].partition, "flow_12_modelA");
    assert_eq!(
        queries[0].result_location,
        "s3://circles.data.pipeline/energy_out/date=2024-05-01/partition_name=flow_12_QA"
    );
    assert_eq!(report.events[0].status, EventStatus::Completed);
}

#[tokio::test]
async fn unknown_energy_model_fails_the_event() {
    let harness = Harness::with_table_t();
    let report = harness
        .run(&["fact_energy_trace/date=2024-05-01/partition_name=flow_12_modelZ/e.csv"])
        .await;

    assert!(harness.journal.queries().is_empty());
    let event = &report.events[0];
    assert_eq!(event.status, EventStatus::Failed);
    assert!(event.repaired);
    assert!(event.failures[0].fatal);
    assert_eq!(event.failures[0].stage, Stage::Dispatch);
}

#[tokio::test]
async fn location_filter_follows_network_metadata() {
    let edge_key = "T/date=2024-05-01/partition_name=flow_1/a.csv";
    let plain_key = "T/date=2024-05-01/partition_name=flow_2/b.csv";
    let bare_key = "T/date=2024-05-01/partition_name=flow_3/c.csv";
    let harness = Harness::with_table_t()
        .metadata(edge_key, &[("network", "I-210 without Ramps")])
        .metadata(plain_key, &[("network", "I-24")]);
    harness.run(&[edge_key, plain_key, bare_key]).await;

    let filters = &harness.config.filters;
    for query in harness.journal.queries() {
        let expected = if query.partition == "flow_1" {
            &filters.edge
        } else {
            &filters.cross_section
        };
        assert_eq!(&query.location_filter, expected, "{}", query.partition);
    }
    assert_eq!(harness.journal.queries().len(), 6);
}

#[tokio::test]
async fn result_locations_do_not_collide() {
    let harness = Harness::with_table_t();
    harness
        .run(&[
            "T/date=2024-05-01/partition_name=flow_1/a.csv",
            "T/date=2024-05-02/partition_name=flow_2/b.csv",
        ])
        .await;

    let locations: HashSet<String> = harness
        .journal
        .queries()
        .into_iter()
        .map(|q| q.result_location)
        .collect();
    assert_eq!(locations.len(), 4);
    assert!(locations.contains("s3://circles.data.pipeline/R2/date=2024-05-02/partition_name=flow_2_Q2"));
}

#[tokio::test]
async fn end_to_end_two_notifications() {
    let harness = Harness::with_table_t();
    let report = harness
        .run(&[
            "untracked/date=2024-05-01/partition_name=flow_5/x.csv",
            "T/date=2024-05-01/partition_name=flow_5/out.csv",
        ])
        .await;

    assert_eq!(
        harness.journal.repairs(),
        vec![("T".into(), "2024-05-01".into(), "flow_5".into())]
    );

    let queries = harness.journal.queries();
    assert_eq!(queries.len(), 2);
    assert_ne!(queries[0].result_location, queries[1].result_location);
    for query in &queries {
        assert_eq!(query.start_filter, 100);
        assert_eq!(query.stop_filter, 150);
        assert_eq!(query.query_date, "2024-05-01");
    }

    // Every repair precedes every dispatch.
    let last_repair = harness
        .journal
        .calls()
        .iter()
        .rposition(|c| matches!(c, Call::Repair(..)))
        .unwrap();
    let first_query = harness
        .journal
        .position(|c| matches!(c, Call::Query(..)))
        .unwrap();
    assert!(last_repair < first_query);

    assert_eq!(report.events[0].status, EventStatus::Ignored);
    assert_eq!(report.events[1].status, EventStatus::Completed);
    assert_eq!(report.summary.queries_submitted, 2);
    assert!(report.is_clean());
}

#[tokio::test]
async fn failing_query_does_not_stop_fan_out() {
    let mut harness = Harness::with_table_t();
    harness.failing_queries.insert("Q1".into());
    let report = harness
        .run(&["T/date=2024-05-01/partition_name=flow_5/out.csv"])
        .await;

    assert_eq!(harness.journal.queries().len(), 2);
    let event = &report.events[0];
    assert_eq!(event.status, EventStatus::Partial);
    assert_eq!(event.queries.len(), 1);
    assert_eq!(event.queries[0].query_name, "Q2");
    assert_eq!(event.failures[0].query.as_deref(), Some("Q1"));
}

#[tokio::test]
async fn repair_failure_is_isolated_to_its_event() {
    let mut harness = Harness::with_table_t();
    harness.failing_partitions.insert("flow_1".into());
    let report = harness
        .run(&[
            "T/date=2024-05-01/partition_name=flow_1/a.csv",
            "T/date=2024-05-01/partition_name=flow_2/b.csv",
        ])
        .await;

    assert_eq!(report.events[0].status, EventStatus::Failed);
    assert_eq!(report.events[0].failures[0].stage, Stage::Repair);
    assert_eq!(report.events[1].status, EventStatus::Completed);
    assert!(
        harness
            .journal
            .queries()
            .iter()
            .all(|q| q.partition == "flow_2")
    );
    assert_eq!(report.summary.failed, 1);
}

#[tokio::test]
async fn malformed_tracked_key_is_a_contract_violation() {
    let harness = Harness::with_table_t();
    let report = harness.run(&["T/out.csv"]).await;

    assert!(harness.journal.calls().is_empty());
    let event = &report.events[0];
    assert_eq!(event.status, EventStatus::Failed);
    assert_eq!(event.failures[0].stage, Stage::Classify);
    assert!(event.failures[0].fatal);
}

#[tokio::test]
async fn duplicate_notifications_processed_once() {
    let harness = Harness::with_table_t();
    let key = "T/date=2024-05-01/partition_name=flow_5/out.csv";
    let report = harness.run(&[key, key]).await;

    assert_eq!(harness.journal.repairs().len(), 1);
    assert_eq!(harness.journal.queries().len(), 2);
    assert_eq!(report.events[1].status, EventStatus::Duplicate);
    assert_eq!(report.summary.duplicates, 1);
}

#[tokio::test]
async fn concurrency_keeps_report_order() {
    let mut harness = Harness::with_table_t();
    harness.config.pipeline.max_concurrent = 8;
    let keys: Vec<String> = (0..20)
        .map(|i| format!("T/date=2024-05-01/partition_name=flow_{i}/out.csv"))
        .collect();
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let report = harness.run(&refs).await;

    let reported: Vec<&str> = report.events.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(reported, refs);
    assert_eq!(report.summary.queries_submitted, 40);
}

#[tokio::test]
async fn aggregate_table_pruned_once_from_newest_partition() {
    let older = "leaderboard_chart_agg/date=2024-05-01/partition_name=flow_1/a.csv";
    let newer = "leaderboard_chart_agg/date=2024-05-02/partition_name=flow_2/b.csv";

    // Arrival order must not decide which file survives.
    for keys in [[older, newer], [newer, older]] {
        let harness = Harness::new();
        let report = harness.run(&keys).await;

        let prunes: Vec<_> = harness
            .journal
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Prune(..)))
            .collect();
        assert_eq!(
            prunes,
            vec![Call::Prune("leaderboard_chart_agg".into(), newer.into())]
        );

        let newer_report = report.events.iter().find(|e| e.key == newer).unwrap();
        let older_report = report.events.iter().find(|e| e.key == older).unwrap();
        assert_eq!(newer_report.pruned, Some(1));
        assert_eq!(older_report.pruned, None);
        assert!(older_report.repaired);
    }
}

#[tokio::test]
async fn concurrent_aggregate_uploads_keep_newest_file() {
    let tmp = TempDir::new().unwrap();
    let store = LocalStorage::new(tmp.path());
    let stale = "leaderboard_chart_agg/date=2024-04-30/partition_name=flow_0/old.csv";
    let older = "leaderboard_chart_agg/date=2024-05-01/partition_name=flow_1/a.csv";
    let newer = "leaderboard_chart_agg/date=2024-05-02/partition_name=flow_2/b.csv";
    for key in [stale, older, newer] {
        store
            .write_bytes(BUCKET, key, b"score\n".to_vec(), "text/csv")
            .await
            .unwrap();
    }

    let config = Config::default();
    let engine = DryRunEngine::new();
    let housekeeping = ObjectHousekeeping::new(config.housekeeping.clone(), config.layout.clone());
    let orchestrator = BatchOrchestrator::new(Arc::new(config), &store, &engine, &housekeeping);

    let notifications = [older, newer]
        .iter()
        .map(|k| Notification::new(BUCKET, *k))
        .collect();
    let report = orchestrator.run(notifications).await;

    let remaining = store
        .list_keys(BUCKET, "leaderboard_chart_agg/")
        .await
        .unwrap();
    assert_eq!(remaining, vec![newer]);
    assert_eq!(report.summary.pruned_objects, 2);
    assert!(report.is_clean());
}

#[tokio::test]
async fn prune_failure_still_dispatches() {
    let mut harness = Harness::with_table_t();
    harness.config.registry.aggregate_table = "T".into();
    harness.fail_prune = true;
    let report = harness
        .run(&["T/date=2024-05-01/partition_name=flow_3/out.csv"])
        .await;

    let event = &report.events[0];
    assert_eq!(event.status, EventStatus::Partial);
    assert_eq!(event.failures.len(), 1);
    assert_eq!(event.failures[0].stage, Stage::Prune);
    assert_eq!(event.pruned, None);
    assert_eq!(event.queries.len(), 2);
    assert_eq!(harness.journal.queries().len(), 2);
}

#[tokio::test]
async fn baseline_failure_still_dispatches() {
    let failing = "T/date=2024-05-01/partition_name=flow_1/a.csv";
    let other = "T/date=2024-05-01/partition_name=flow_2/b.csv";
    let mut harness = Harness::with_table_t()
        .metadata(failing, &[("network", "I-24"), ("is_baseline", "True")]);
    harness.fail_baseline = true;
    let report = harness.run(&[failing, other]).await;

    let event = &report.events[0];
    assert_eq!(event.status, EventStatus::Partial);
    assert_eq!(event.failures[0].stage, Stage::Baseline);
    assert!(!event.baseline_updated);
    assert_eq!(event.queries.len(), 2);

    assert_eq!(report.events[1].status, EventStatus::Completed);
    assert_eq!(report.summary.queries_submitted, 4);
}

#[tokio::test]
async fn metadata_failure_skips_dispatch_for_that_event_only() {
    let failing = "T/date=2024-05-01/partition_name=flow_1/a.csv";
    let other = "T/date=2024-05-01/partition_name=flow_2/b.csv";
    let mut harness = Harness::with_table_t();
    harness.failing_heads.insert(failing.into());
    let report = harness.run(&[failing, other]).await;

    let event = &report.events[0];
    assert_eq!(event.status, EventStatus::Partial);
    assert!(event.repaired);
    assert_eq!(event.failures[0].stage, Stage::Metadata);
    assert!(event.queries.is_empty());

    let queries = harness.journal.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries.iter().all(|q| q.partition == "flow_2"));
    assert_eq!(report.events[1].status, EventStatus::Completed);
}
