mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use sea_orm::EntityTrait;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use promo_sync::cache::PromotionCache;
use promo_sync::entities::{sink_item, sink_promotion};
use promo_sync::errors::ServiceError;
use promo_sync::events::{self, SyncEvent};
use promo_sync::matching;
use promo_sync::models::{CatalogItem, FilterSet, Location, Promotion};
use promo_sync::retry::RetryPolicy;
use promo_sync::services::batch_writer::{BatchWriter, BatchWriterConfig};
use promo_sync::services::sync::SyncOrchestrator;
use promo_sync::sink::{
    ItemRecord, LookupOutcome, PromotionRecord, SinkAdapter, StaticLocationProvider, UpsertOutcome,
};
use promo_sync::source::SourceConfig;

use common::{item, location, promotion, sqlite_sink};

/// In-memory adapter that records the order of sink operations, tagging
/// item operations with their location.
#[derive(Default)]
struct RecordingSink {
    items: Mutex<Vec<ItemRecord>>,
    promotions: Mutex<HashMap<String, PromotionRecord>>,
    operations: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn log(&self, op: String) {
        self.operations.lock().unwrap().push(op);
    }

    fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    fn promotion(&self, id: &str) -> Option<PromotionRecord> {
        self.promotions.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl SinkAdapter for RecordingSink {
    async fn delete_items(&self, location_id: &str) -> Result<u64, ServiceError> {
        self.log(format!("delete_items:{location_id}"));
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|row| row.location_id != location_id);
        Ok((before - items.len()) as u64)
    }

    async fn insert_items(&self, rows: &[ItemRecord]) -> Result<(), ServiceError> {
        let location_id = rows
            .first()
            .map(|row| row.location_id.clone())
            .unwrap_or_default();
        self.log(format!("insert_items:{location_id}"));
        self.items.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }

    async fn find_promotion(
        &self,
        promotion_id: &str,
    ) -> Result<LookupOutcome<PromotionRecord>, ServiceError> {
        self.log(format!("find_promotion:{promotion_id}"));
        Ok(match self.promotions.lock().unwrap().get(promotion_id) {
            Some(record) => LookupOutcome::Found(record.clone()),
            None => LookupOutcome::NotFound,
        })
    }

    async fn upsert_promotion(&self, row: &PromotionRecord) -> Result<UpsertOutcome, ServiceError> {
        self.log(format!("upsert_promotion:{}", row.promotion_id));
        let existed = self
            .promotions
            .lock()
            .unwrap()
            .insert(row.promotion_id.clone(), row.clone())
            .is_some();
        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    async fn list_promotions(&self) -> Result<Vec<PromotionRecord>, ServiceError> {
        self.log("list_promotions".into());
        Ok(self.promotions.lock().unwrap().values().cloned().collect())
    }

    async fn delete_promotion(&self, promotion_id: &str) -> Result<(), ServiceError> {
        self.log(format!("delete_promotion:{promotion_id}"));
        self.promotions.lock().unwrap().remove(promotion_id);
        Ok(())
    }

    fn supports_native_upsert(&self) -> bool {
        false
    }
}

fn auth_for(api_key: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{api_key}:")))
}

async fn mount_feeds(
    server: &MockServer,
    api_key: &str,
    inventory: &[CatalogItem],
    promotions: &[Promotion],
) {
    Mock::given(method("GET"))
        .and(path("/reporting/inventory"))
        .and(header("authorization", auth_for(api_key).as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::to_value(inventory).unwrap()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/discounts"))
        .and(header("authorization", auth_for(api_key).as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::to_value(promotions).unwrap()),
        )
        .mount(server)
        .await;
}

fn orchestrator(
    server: &MockServer,
    sink: Arc<dyn SinkAdapter>,
    cache: Arc<PromotionCache>,
    locations: Vec<Location>,
) -> SyncOrchestrator {
    let writer = BatchWriter::new(
        sink,
        RetryPolicy::immediate(1),
        BatchWriterConfig {
            batch_size: 100,
            quantity_floor: 5,
            batch_pause: Duration::ZERO,
        },
    );
    SyncOrchestrator::new(
        Arc::new(StaticLocationProvider::new(locations)),
        writer,
        cache,
        RetryPolicy::immediate(1),
        SourceConfig {
            api_url: server.uri(),
            lookback_hours: 24,
            timeout: Duration::from_secs(5),
        },
        None,
    )
}

#[tokio::test]
async fn full_pass_reconciles_caches_and_reports() {
    let server = MockServer::start().await;

    let mut stocked = item(9001, 10);
    stocked.tags = vec!["sale".into()];
    let low_stock = item(9002, 4);

    let mut category_promo = promotion(77);
    category_promo.product_categories = Some(FilterSet::include(vec![7]));
    let mut exclusion_promo = promotion(88);
    exclusion_promo.product_categories = Some(FilterSet::exclude(vec![9]));

    let items = vec![stocked, low_stock];
    let promotions = vec![category_promo, exclusion_promo];
    mount_feeds(&server, "key-a", &items, &promotions).await;

    let (sink, db) = sqlite_sink().await;
    let cache = Arc::new(PromotionCache::new(Duration::from_secs(86_400)));
    let (event_tx, mut event_rx) = events::channel(32);

    let orchestrator = orchestrator(&server, Arc::new(sink), cache.clone(), vec![location("a")])
        .with_events(event_tx);
    let stats = orchestrator.run_once().await.unwrap();

    assert_eq!(stats.locations_total, 1);
    assert_eq!(stats.locations_synced, 1);
    assert_eq!(stats.items_fetched, 2);
    assert_eq!(stats.promotions_fetched, 2);
    // Both items match both promotions (category 7 included, 9 excluded).
    assert_eq!(stats.matched_pairs, 4);
    assert_eq!(stats.items.created, 1);
    assert_eq!(stats.items.skipped, 1);
    assert_eq!(stats.promotions.created, 2);
    assert_eq!(stats.errors, 0);

    // The low-stock item is absent from the sink but cached for reads.
    let rows = sink_item::Entity::find().all(&db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].item_id, "9001");
    let promo_rows = sink_promotion::Entity::find().all(&db).await.unwrap();
    assert_eq!(promo_rows.len(), 2);

    // Cache invariant: every entry is derivable by reapplying the evaluator
    // to the current item and promotion sets.
    let now = Utc::now();
    let entries = cache.list_by_location("a", now);
    assert_eq!(entries.len(), 2);
    for entry in entries {
        let source_item = items
            .iter()
            .find(|candidate| candidate.item_id == entry.item_id)
            .unwrap();
        let expected: Vec<i64> = matching::applicable_promotions(source_item, &promotions, now)
            .iter()
            .map(|promotion| promotion.promotion_id)
            .collect();
        let cached: Vec<i64> = entry
            .promotions
            .iter()
            .map(|promotion| promotion.promotion_id)
            .collect();
        assert_eq!(cached, expected);
    }

    // The run's lifecycle was announced.
    let mut saw_completion = false;
    while let Ok(event) = event_rx.try_recv() {
        if let SyncEvent::RunCompleted {
            locations_synced,
            matched_pairs,
            ..
        } = event
        {
            assert_eq!(locations_synced, 1);
            assert_eq!(matched_pairs, 4);
            saw_completion = true;
        }
    }
    assert!(saw_completion);
}

#[tokio::test]
async fn locations_are_reconciled_strictly_sequentially() {
    let server = MockServer::start().await;

    // Both locations offer the same promotion.
    let shared = promotion(77);
    mount_feeds(&server, "key-a", &[item(1, 10)], &[shared.clone()]).await;
    mount_feeds(&server, "key-b", &[item(2, 10)], &[shared]).await;

    let sink = Arc::new(RecordingSink::default());
    let cache = Arc::new(PromotionCache::new(Duration::from_secs(86_400)));
    let orchestrator = orchestrator(
        &server,
        sink.clone(),
        cache,
        vec![location("a"), location("b")],
    );

    let stats = orchestrator.run_once().await.unwrap();
    assert_eq!(stats.locations_synced, 2);

    let ops = sink.operations();
    let first_b = ops
        .iter()
        .position(|op| op == "delete_items:b")
        .expect("location b was reconciled");

    // Location a's pass, including its writes to the shared promotion row,
    // completes before any of location b's operations begin.
    assert_eq!(
        ops[..first_b],
        [
            "delete_items:a",
            "insert_items:a",
            "find_promotion:77",
            "upsert_promotion:77"
        ]
    );
    assert!(!ops[first_b..].iter().any(|op| op.ends_with(":a")));
    assert_eq!(ops.last().unwrap(), "list_promotions");

    // The shared promotion's association list is the union of both outlets.
    let record = sink.promotion("77").unwrap();
    let outlets: Vec<&str> = record
        .applies_to_locations
        .iter()
        .map(|l| l.external_id.as_str())
        .collect();
    assert_eq!(outlets, vec!["ret-a", "ret-b"]);
}

#[tokio::test]
async fn locations_without_credentials_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    mount_feeds(&server, "key-a", &[item(1, 10)], &[promotion(77)]).await;

    let mut no_credentials = location("c");
    no_credentials.api_key = String::new();

    let sink = Arc::new(RecordingSink::default());
    let cache = Arc::new(PromotionCache::new(Duration::from_secs(86_400)));
    let orchestrator = orchestrator(
        &server,
        sink,
        cache,
        vec![no_credentials, location("a")],
    );

    let stats = orchestrator.run_once().await.unwrap();
    assert_eq!(stats.locations_skipped, 1);
    assert_eq!(stats.locations_synced, 1);
    assert_eq!(stats.locations_failed, 0);
}

#[tokio::test]
async fn one_failing_location_does_not_stop_the_run() {
    let server = MockServer::start().await;

    // The first location's feed is persistently down.
    Mock::given(method("GET"))
        .and(path("/reporting/inventory"))
        .and(header("authorization", auth_for("key-bad").as_str()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/discounts"))
        .and(header("authorization", auth_for("key-bad").as_str()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_feeds(&server, "key-a", &[item(1, 10)], &[promotion(77)]).await;

    let failing = location("bad");

    let sink = Arc::new(RecordingSink::default());
    let cache = Arc::new(PromotionCache::new(Duration::from_secs(86_400)));
    let orchestrator = orchestrator(
        &server,
        sink.clone(),
        cache,
        vec![failing, location("a")],
    );

    let stats = orchestrator.run_once().await.unwrap();
    assert_eq!(stats.locations_failed, 1);
    assert_eq!(stats.locations_synced, 1);
    assert!(stats.errors >= 1);

    // The failed location shows zero progress in the per-location stats.
    let failed = stats
        .per_location
        .iter()
        .find(|entry| entry.location_id == "bad")
        .unwrap();
    assert_eq!(failed.items_fetched, 0);
    assert_eq!(failed.errors, 1);

    // Only the healthy location touched the sink.
    assert!(sink
        .operations()
        .iter()
        .all(|op| !op.ends_with(":bad")));
}
