//! Library-level tests across ingestion, storage, and the query gateway.

use async_trait::async_trait;
use atlascope::config::{load_config, Config};
use atlascope::db;
use atlascope::error::{FetchError, GatewayError, GenerationError, QuotaError};
use atlascope::feed::ReportFeed;
use atlascope::gateway::{QueryExecutor, QueryGateway};
use atlascope::ingest::{IngestOptions, Ingestor};
use atlascope::models::TimeWindow;
use atlascope::normalize::Normalizer;
use atlascope::quota::{MemoryQuotaStore, QuotaStore, QuotaTracker};
use atlascope::store::ReportStore;
use atlascope::translator::{LanguageModel, Translator};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let path = tmp.path().join("atlascope.toml");
    fs::write(
        &path,
        format!(
            "[db]\npath = \"{}/atlascope.sqlite\"\n\n[server]\nbind = \"127.0.0.1:0\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();
    load_config(&path).unwrap()
}

fn kenya_record(id: i64, title: &str, created: &str) -> Value {
    json!({
        "id": id.to_string(),
        "fields": {
            "title": title,
            "language": [{ "name": "English" }],
            "primary_country": {
                "name": "Kenya",
                "iso3": "ken",
                "shortname": "Kenya",
                "location": { "lat": -1.3, "lon": 36.8 }
            },
            "date": { "created": created },
            "source": [{ "shortname": "OCHA", "homepage": "https://www.unocha.org" }],
            "disaster": [{
                "id": 52001,
                "name": "Kenya: Floods - Apr 2024",
                "status": "ongoing",
                "type": [{ "name": "Flood" }]
            }]
        }
    })
}

/// Serves the same single page for every window.
struct OnePageFeed {
    records: Vec<Value>,
}

#[async_trait]
impl ReportFeed for OnePageFeed {
    async fn fetch(
        &self,
        _window: &TimeWindow,
        offset: usize,
        _limit: usize,
    ) -> Result<Vec<Value>, FetchError> {
        if offset == 0 {
            Ok(self.records.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

fn ingestor(pool: SqlitePool, records: Vec<Value>) -> Ingestor {
    Ingestor::new(
        Arc::new(OnePageFeed { records }),
        Normalizer::new("English", Vec::new()),
        Arc::new(ReportStore::new(pool)),
        IngestOptions {
            page_size: 100,
            max_pages: 10,
            lookback: Duration::hours(4),
            fetch_timeout: std::time::Duration::from_secs(5),
            lock_ttl: Duration::minutes(10),
        },
    )
}

/// Always answers with the same JSON reply.
struct CannedModel {
    reply: String,
}

#[async_trait]
impl LanguageModel for CannedModel {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
        Ok(self.reply.clone())
    }
}

fn reply(query: &str, highlight: &str) -> String {
    json!({ "query": query, "highlight_condition": highlight }).to_string()
}

/// Counts how often the quota is consulted.
struct CountingStore {
    inner: MemoryQuotaStore,
    calls: AtomicUsize,
}

#[async_trait]
impl QuotaStore for CountingStore {
    async fn try_increment(
        &self,
        key: &str,
        ceiling: u64,
        ttl: std::time::Duration,
    ) -> Result<Option<u64>, QuotaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.try_increment(key, ceiling, ttl).await
    }
}

struct Fixture {
    _tmp: TempDir,
    writer: SqlitePool,
    quota_calls: Arc<CountingStore>,
    gateway: QueryGateway,
}

/// A store holding report 42 plus a gateway whose model always returns `model_reply`.
async fn fixture(model_reply: String, max_rows: usize) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let writer = db::connect(&config).await.unwrap();
    let created = (Utc::now() - Duration::days(1)).to_rfc3339();
    let summary = ingestor(
        writer.clone(),
        vec![
            kenya_record(42, "Kenya: Floods Flash Update No. 3", &created),
            kenya_record(43, "Kenya: Floods Flash Update No. 4", &created),
        ],
    )
    .run_scheduled()
    .await
    .unwrap();
    assert_eq!(summary.written, 2);

    let read_pool = db::connect_read_only(&config).await.unwrap();
    let quota_calls = Arc::new(CountingStore {
        inner: MemoryQuotaStore::new(),
        calls: AtomicUsize::new(0),
    });
    let gateway = QueryGateway::new(
        QuotaTracker::new(quota_calls.clone(), 4, std::time::Duration::from_secs(60)),
        Translator::new(
            Arc::new(CannedModel { reply: model_reply }),
            std::time::Duration::from_secs(5),
        ),
        QueryExecutor::new(read_pool, std::time::Duration::from_secs(5), max_rows),
    );

    Fixture {
        _tmp: tmp,
        writer,
        quota_calls,
        gateway,
    }
}

// ============ Ingestion → store ============

#[tokio::test]
async fn test_ingested_report_round_trips() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = db::connect(&config).await.unwrap();

    let ingestor = ingestor(
        pool,
        vec![kenya_record(42, "Kenya: Floods", "2024-05-02T09:15:00+00:00")],
    );
    let summary = ingestor.run_scheduled().await.unwrap();
    assert_eq!(summary.written, 1);
    assert!(!summary.skipped);

    let store = ingestor.store();
    let report = store.get_report(42).await.unwrap().unwrap();
    assert_eq!(report.primary_country, "Kenya");
    assert_eq!(report.country_lat, -1.3);
    assert_eq!(report.country_long, 36.8);
    assert_eq!(report.disaster_type.as_deref(), Some("Flood"));
    assert_eq!(
        store.get_geom(42).await.unwrap().as_deref(),
        Some("SRID=4326;POINT(36.8 -1.3)")
    );
}

#[tokio::test]
async fn test_reingest_overwrites_in_place() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = db::connect(&config).await.unwrap();

    ingestor(
        pool.clone(),
        vec![kenya_record(42, "Kenya: Floods", "2024-05-02T09:15:00+00:00")],
    )
    .run_scheduled()
    .await
    .unwrap();
    let second = ingestor(
        pool.clone(),
        vec![kenya_record(42, "Kenya: Floods (revised)", "2024-05-02T09:15:00+00:00")],
    );
    second.run_scheduled().await.unwrap();

    let store = second.store();
    assert_eq!(store.count().await.unwrap(), 1);
    let report = store.get_report(42).await.unwrap().unwrap();
    assert_eq!(report.headline_title.as_deref(), Some("Kenya: Floods (revised)"));
}

#[tokio::test]
async fn test_last_updated_and_recent_events() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = db::connect(&config).await.unwrap();

    let recent = (Utc::now() - Duration::days(1)).to_rfc3339();
    let ingestor = ingestor(
        pool,
        vec![
            kenya_record(1, "Kenya: recent", &recent),
            kenya_record(2, "Kenya: old", "2020-01-01T00:00:00+00:00"),
        ],
    );
    ingestor.run_scheduled().await.unwrap();
    let store = ingestor.store();

    let newest = store.last_updated().await.unwrap().unwrap();
    assert!(newest > Utc::now() - Duration::days(2));

    let groups = store
        .recent_events(Utc::now() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!((groups[0].lat, groups[0].long), (-1.3, 36.8));
    let ids: Vec<i64> = groups[0].reports.iter().map(|r| r.report_id).collect();
    assert_eq!(ids, vec![1]);
}

// ============ Query gateway ============

#[tokio::test]
async fn test_query_returns_stored_report() {
    let fx = fixture(
        reply(
            "SELECT report_id, country_lat, country_long, primary_country FROM reports WHERE report_id = 42",
            "disaster_status = 'ongoing'",
        ),
        500,
    )
    .await;

    let response = fx.gateway.handle("floods in Kenya", "203.0.113.7", false).await.unwrap();
    assert_eq!(response.results.len(), 1);
    let row = &response.results[0];
    assert_eq!(row["report_id"], json!(42));
    assert_eq!(row["country_lat"], json!(-1.3));
    assert_eq!(row["country_long"], json!(36.8));
    assert_eq!(row["primary_country"], json!("Kenya"));
    assert_eq!(response.highlight_condition, "disaster_status = 'ongoing'");
    assert_eq!(response.remaining, Some(3));
    assert!(!response.truncated);
}

#[tokio::test]
async fn test_double_percent_is_collapsed() {
    let fx = fixture(
        reply(
            "SELECT report_id FROM reports WHERE headline_title LIKE '%%No. 3%%'",
            "1 = 1",
        ),
        500,
    )
    .await;

    let response = fx.gateway.handle("update number 3", "a", false).await.unwrap();
    assert_eq!(response.generated_query, "SELECT report_id FROM reports WHERE headline_title LIKE '%No. 3%'");
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn test_authenticated_caller_skips_quota() {
    let fx = fixture(reply("SELECT report_id FROM reports", "1 = 1"), 500).await;

    for _ in 0..6 {
        let response = fx.gateway.handle("all reports", "user-17", true).await.unwrap();
        assert_eq!(response.remaining, None);
        let body = serde_json::to_value(&response).unwrap();
        assert!(body.get("remaining").is_none());
    }
    assert_eq!(fx.quota_calls.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fifth_anonymous_query_is_rate_limited() {
    let fx = fixture(reply("SELECT report_id FROM reports", "1 = 1"), 500).await;

    let mut remaining = Vec::new();
    for _ in 0..4 {
        let response = fx.gateway.handle("all reports", "203.0.113.9", false).await.unwrap();
        remaining.push(response.remaining.unwrap());
    }
    assert_eq!(remaining, vec![3, 2, 1, 0]);

    let err = fx
        .gateway
        .handle("all reports", "203.0.113.9", false)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited { remaining: 0 }));

    // A different identity is unaffected.
    assert!(fx.gateway.handle("all reports", "198.51.100.1", false).await.is_ok());
}

#[tokio::test]
async fn test_unparsable_model_reply_is_generation_error() {
    let fx = fixture("I think you want earthquakes".to_string(), 500).await;
    let err = fx.gateway.handle("earthquakes", "u", true).await.unwrap_err();
    assert!(matches!(err, GatewayError::Generation(GenerationError::Parse(_))));
    assert!(err.query().is_none());
}

#[tokio::test]
async fn test_bad_column_is_execution_error_with_query() {
    let query = "SELECT magnitude FROM reports";
    let fx = fixture(reply(query, "1 = 1"), 500).await;

    let err = fx.gateway.handle("magnitudes", "u", true).await.unwrap_err();
    match &err {
        GatewayError::Execution { query: q, message } => {
            assert_eq!(q, query);
            assert!(message.contains("magnitude"), "message: {}", message);
        }
        other => panic!("expected execution error, got {:?}", other),
    }
    assert_eq!(err.query(), Some(query));
}

#[tokio::test]
async fn test_write_query_is_rejected_and_not_run() {
    let fx = fixture(reply("DELETE FROM reports", "1 = 1"), 500).await;

    let err = fx.gateway.handle("remove everything", "u", true).await.unwrap_err();
    assert!(matches!(err, GatewayError::Rejected { .. }));
    assert_eq!(err.query(), Some("DELETE FROM reports"));

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reports")
        .fetch_one(&fx.writer)
        .await
        .unwrap();
    assert_eq!(remaining, 2);
}

#[tokio::test]
async fn test_rows_beyond_cap_are_truncated() {
    let fx = fixture(reply("SELECT report_id FROM reports ORDER BY report_id", "1 = 1"), 1).await;

    let response = fx.gateway.handle("all reports", "u", true).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0]["report_id"], json!(42));
    assert!(response.truncated);
}
