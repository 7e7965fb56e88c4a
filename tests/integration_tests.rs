//! Integration tests for the complete Optic Pulse pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - DDL override → schema resolution → join plan → summary
//! - Integer source identifiers → string request ids
//! - Optional campaign table → supplied texts and neutral voice
//! - Free-form request → triage → operation
//!
//! Run with: cargo test --test integration_tests

use chrono::{TimeZone, Utc};
use pulse_insight::{
    AggregationEngine, CancelToken, ManualClock, MockClient, MockReply, PulseConfig, PulseRuntime,
};
use pulse_model::{BehaviorWindow, BrandVoiceRequest, InsightKind, InsightResult, VibeReportRequest};
use pulse_storage::{SourceConfig, SourcePool};
use rusqlite::Connection;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const SCHEMA: &str = r#"
CREATE TABLE customers (
    customer_id INTEGER PRIMARY KEY,
    first_name TEXT,
    loyalty_member INTEGER
);
CREATE TABLE transactions (
    transaction_id INTEGER PRIMARY KEY,
    customer_id INTEGER NOT NULL,
    occurred_at TEXT NOT NULL,
    category TEXT NOT NULL,
    unit_price REAL NOT NULL,
    quantity INTEGER,
    discount REAL,
    tags TEXT
);
"#;

const VIBE_REPLY: &str = r#"{
    "persona_label": "Curious Collector",
    "behavioral_metrics": {"engagement": 0.4},
    "purchase_metrics": {},
    "color_palette": ["teal", "amber", "slate"]
}"#;

// ============================================================================
// Fixtures
// ============================================================================

/// Canonical table names, integer ids, no campaign table. The schema is also
/// written to a DDL file so discovery does not read the catalog.
fn source() -> (TempDir, PulseConfig) {
    let dir = tempdir().unwrap();
    let db = dir.path().join("shop.db");
    let ddl = dir.path().join("schema.sql");
    std::fs::write(&ddl, SCHEMA).unwrap();

    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(
        r#"
        INSERT INTO customers VALUES (7, 'Lee', 1), (8, 'Kai', 0);

        INSERT INTO transactions
            (customer_id, occurred_at, category, unit_price, quantity, discount, tags) VALUES
            (7, '2025-02-14', 'electronics', 199.0, 1, 0, 'black'),
            (7, '2025-04-02', 'electronics', 49.5, 2, 0, 'silver'),
            (7, '2025-05-20', 'coffee', 12.0, 1, 0, NULL),
            (8, '2025-03-01', 'stationery', 10.0, 1, 0, NULL),
            (8, '2025-03-15', 'books', 10.0, 1, 0, NULL),
            (8, '2025-04-01', 'pet-supplies', 10.0, 1, 0, NULL);
        "#,
    )
    .unwrap();
    drop(conn);

    let config = PulseConfig {
        source: SourceConfig::new(db).with_ddl(ddl),
        ..PulseConfig::default()
    };
    (dir, config)
}

fn june_first() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

fn runtime(config: PulseConfig, client: Arc<MockClient>) -> PulseRuntime {
    PulseRuntime::start(config, client)
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(june_first())))
}

// ============================================================================
// Storage → aggregation
// ============================================================================

#[tokio::test]
async fn test_summary_from_canonical_source() {
    let (_dir, config) = source();
    let pool = SourcePool::open(&config.source).unwrap();
    assert!(pool.schema().campaigns.is_none());

    let engine = AggregationEngine::new(pool, 20);
    let window = BehaviorWindow::trailing(june_first(), 12).unwrap();
    let summary = engine.behavior_summary("7", window).await.unwrap();

    assert!(!summary.insufficient_data);
    assert_eq!(summary.total_spend_cents, 19_900 + 9_900 + 1_200);
    assert_eq!(summary.categories[0].category, "electronics");
    assert_eq!(summary.persona, "Tech Enthusiast");
    assert_eq!(summary.metrics.recency_days, 12);
}

// ============================================================================
// Vibe report
// ============================================================================

#[tokio::test]
async fn test_integer_ids_resolve_and_rule_persona_wins() {
    let (_dir, config) = source();
    let rt = runtime(config, Arc::new(MockClient::always(VIBE_REPLY)));

    let vibe = rt
        .vibe_report(&VibeReportRequest::new("7"), &CancelToken::new())
        .await
        .unwrap()
        .value;
    assert_eq!(vibe.customer_id, "7");
    assert_eq!(vibe.persona_label, "Tech Enthusiast");
    assert_eq!(vibe.color_palette, vec!["silver", "black", "teal"]);
    assert_eq!(vibe.behavioral_metrics["engagement"], 0.4);
}

#[tokio::test]
async fn test_scattered_spend_keeps_model_persona() {
    let (_dir, config) = source();
    let rt = runtime(config, Arc::new(MockClient::always(VIBE_REPLY)));

    let vibe = rt
        .vibe_report(&VibeReportRequest::new("8"), &CancelToken::new())
        .await
        .unwrap()
        .value;
    assert_eq!(vibe.persona_label, "Curious Collector");
    assert_eq!(vibe.color_palette, vec!["teal", "amber", "slate"]);
    assert!(vibe.vibe_card_path.is_none());
}

// ============================================================================
// Brand voice without a campaign table
// ============================================================================

#[tokio::test]
async fn test_missing_campaign_table_degrades_to_neutral_voice() {
    let (_dir, config) = source();
    let client = Arc::new(MockClient::always(
        r#"{"generated_body": "Fresh gear just landed", "predicted_success_score": "70"}"#,
    ));
    let rt = runtime(config, client);

    let cloned = rt
        .brand_voice(&BrandVoiceRequest::new("acme"), &CancelToken::new())
        .await
        .unwrap()
        .value;
    assert_eq!(cloned.campaigns_analyzed, 0);
    assert_eq!(cloned.success_prior, 50.0);
    assert_eq!(cloned.predicted_success_score, 70);
}

#[tokio::test]
async fn test_process_routes_supplied_texts_to_brand_voice() {
    let (_dir, config) = source();
    let client = Arc::new(MockClient::new(vec![
        MockReply::Text(
            r#"{"agent_type": "brand_voice", "confidence": 0.8,
                "extracted_params": {"brand": 42}}"#
                .into(),
        ),
        MockReply::Text(
            r#"Sure! {"generated_body": "New arrivals, shop now", "predicted_success_score": 55}"#
                .into(),
        ),
    ]));
    let rt = runtime(config, client.clone());

    let request = serde_json::json!({
        "query": "write our next campaign",
        "campaign_texts": ["Big savings this week. Shop now", "Our spring line is here"]
    });
    let processed = rt.process(&request, &CancelToken::new()).await.unwrap();

    assert_eq!(processed.decision.kind, InsightKind::BrandVoice);
    match processed.result {
        InsightResult::ClonedCampaign(cloned) => {
            assert_eq!(cloned.brand_id, "42");
            assert_eq!(cloned.campaigns_analyzed, 2);
            assert_eq!(cloned.success_prior, 50.0);
            assert_eq!(cloned.predicted_success_score, 55);
        }
        other => panic!("expected cloned campaign, got {other:?}"),
    }
    assert!(client.requests()[1].user.contains("Our spring line is here"));
}
