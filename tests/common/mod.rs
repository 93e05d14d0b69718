#![allow(dead_code)]

use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use promo_sync::models::{CatalogItem, Location, Promotion};
use promo_sync::sink::relational::RelationalSink;

/// In-memory SQLite sink with the schema contract applied. The connection
/// pool is capped at one so every query sees the same in-memory database.
pub async fn sqlite_sink() -> (RelationalSink, DatabaseConnection) {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options)
        .await
        .expect("in-memory sqlite connection");
    let sink = RelationalSink::new(db.clone());
    sink.ensure_schema().await.expect("sink schema contract");
    (sink, db)
}

pub fn location(id: &str) -> Location {
    Location {
        id: id.into(),
        name: format!("Location {id}"),
        external_id: format!("ret-{id}"),
        api_key: format!("key-{id}"),
        ..Location::default()
    }
}

pub fn item(id: i64, quantity: i64) -> CatalogItem {
    CatalogItem {
        item_id: id,
        product_id: id * 10,
        product_name: format!("Item {id}"),
        category_id: Some(7),
        quantity_available: quantity,
        ..CatalogItem::default()
    }
}

pub fn promotion(id: i64) -> Promotion {
    Promotion {
        promotion_id: id,
        name: format!("Promotion {id}"),
        ..Promotion::default()
    }
}
