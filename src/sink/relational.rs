//! Direct relational write path: location-scoped delete plus batched
//! multi-row insert, with native insert-on-conflict-update for promotion
//! rows. Row shape mirrors the REST collection's field set.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbBackend,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde_json::json;
use tracing::{debug, error, info};

use super::{ItemRecord, LookupOutcome, PromotionRecord, SinkAdapter, UpsertOutcome};
use crate::entities::{sink_item, sink_promotion};
use crate::errors::ServiceError;
use crate::models::FilterSet;

fn filter_to_json<T: serde::Serialize>(
    set: &Option<FilterSet<T>>,
) -> Result<Option<serde_json::Value>, ServiceError> {
    set.as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(Into::into)
}

fn filter_from_json<T: serde::de::DeserializeOwned + Default>(
    value: Option<serde_json::Value>,
) -> Result<Option<FilterSet<T>>, ServiceError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(Into::into)
}

pub struct RelationalSink {
    db: DatabaseConnection,
}

impl RelationalSink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str) -> Result<Self, ServiceError> {
        let db = Database::connect(database_url).await?;
        Ok(Self::new(db))
    }

    /// Negotiates the schema contract once at startup. Tables are created
    /// when absent and otherwise left untouched; nothing is introspected
    /// per batch.
    pub async fn ensure_schema(&self) -> Result<(), ServiceError> {
        let statements = match self.db.get_database_backend() {
            DbBackend::Sqlite => SQLITE_SCHEMA,
            DbBackend::Postgres => POSTGRES_SCHEMA,
            other => {
                return Err(ServiceError::ConfigError(format!(
                    "unsupported sink database backend: {other:?}"
                )))
            }
        };
        for sql in statements {
            self.db.execute_unprepared(sql).await?;
        }
        info!("sink schema contract verified");
        Ok(())
    }

    fn item_active_model(record: &ItemRecord) -> sink_item::ActiveModel {
        sink_item::ActiveModel {
            item_id: Set(record.item_id.clone()),
            location_id: Set(record.location_id.clone()),
            product_id: Set(record.product_id.clone()),
            sku: Set(record.sku.clone()),
            product_name: Set(record.product_name.clone()),
            description: Set(record.description.clone()),
            category_id: Set(record.category_id.clone()),
            category: Set(record.category.clone()),
            image_url: Set(record.image_url.clone()),
            brand_id: Set(record.brand_id.clone()),
            brand_name: Set(record.brand_name.clone()),
            vendor_id: Set(record.vendor_id.clone()),
            vendor: Set(record.vendor.clone()),
            strain_id: Set(record.strain_id.clone()),
            strain: Set(record.strain.clone()),
            tags: Set(json!(record.tags)),
            quantity_available: Set(record.quantity_available),
            unit_price: Set(record.unit_price),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
    }

    fn promotion_active_model(
        record: &PromotionRecord,
    ) -> Result<sink_promotion::ActiveModel, ServiceError> {
        Ok(sink_promotion::ActiveModel {
            promotion_id: Set(record.promotion_id.clone()),
            name: Set(record.name.clone()),
            code: Set(record.code.clone()),
            amount: Set(record.amount),
            discount_type: Set(record.discount_type.map(|t| t.to_string())),
            is_active: Set(record.is_active),
            is_deleted: Set(record.is_deleted),
            valid_from: Set(record.valid_from),
            valid_until: Set(record.valid_until),
            applies_to_locations: Set(serde_json::to_value(&record.applies_to_locations)?),
            products: Set(filter_to_json(&record.products)?),
            product_categories: Set(filter_to_json(&record.product_categories)?),
            brands: Set(filter_to_json(&record.brands)?),
            vendors: Set(filter_to_json(&record.vendors)?),
            strains: Set(filter_to_json(&record.strains)?),
            tags: Set(filter_to_json(&record.tags)?),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
    }

    fn promotion_record(model: sink_promotion::Model) -> Result<PromotionRecord, ServiceError> {
        Ok(PromotionRecord {
            promotion_id: model.promotion_id,
            name: model.name,
            code: model.code,
            amount: model.amount,
            discount_type: model
                .discount_type
                .as_deref()
                .and_then(crate::models::DiscountType::parse),
            is_active: model.is_active,
            is_deleted: model.is_deleted,
            valid_from: model.valid_from,
            valid_until: model.valid_until,
            applies_to_locations: serde_json::from_value(model.applies_to_locations)?,
            products: filter_from_json(model.products)?,
            product_categories: filter_from_json(model.product_categories)?,
            brands: filter_from_json(model.brands)?,
            vendors: filter_from_json(model.vendors)?,
            strains: filter_from_json(model.strains)?,
            tags: filter_from_json(model.tags)?,
        })
    }

    fn item_upsert_conflict() -> OnConflict {
        OnConflict::column(sink_item::Column::ItemId)
            .update_columns([
                sink_item::Column::LocationId,
                sink_item::Column::ProductId,
                sink_item::Column::Sku,
                sink_item::Column::ProductName,
                sink_item::Column::Description,
                sink_item::Column::CategoryId,
                sink_item::Column::Category,
                sink_item::Column::ImageUrl,
                sink_item::Column::BrandId,
                sink_item::Column::BrandName,
                sink_item::Column::VendorId,
                sink_item::Column::Vendor,
                sink_item::Column::StrainId,
                sink_item::Column::Strain,
                sink_item::Column::Tags,
                sink_item::Column::QuantityAvailable,
                sink_item::Column::UnitPrice,
                sink_item::Column::UpdatedAt,
            ])
            .to_owned()
    }

    fn promotion_upsert_conflict() -> OnConflict {
        OnConflict::column(sink_promotion::Column::PromotionId)
            .update_columns([
                sink_promotion::Column::Name,
                sink_promotion::Column::Code,
                sink_promotion::Column::Amount,
                sink_promotion::Column::DiscountType,
                sink_promotion::Column::IsActive,
                sink_promotion::Column::IsDeleted,
                sink_promotion::Column::ValidFrom,
                sink_promotion::Column::ValidUntil,
                sink_promotion::Column::AppliesToLocations,
                sink_promotion::Column::Products,
                sink_promotion::Column::ProductCategories,
                sink_promotion::Column::Brands,
                sink_promotion::Column::Vendors,
                sink_promotion::Column::Strains,
                sink_promotion::Column::Tags,
                sink_promotion::Column::UpdatedAt,
            ])
            .to_owned()
    }
}

#[async_trait::async_trait]
impl SinkAdapter for RelationalSink {
    async fn delete_items(&self, location_id: &str) -> Result<u64, ServiceError> {
        let result = sink_item::Entity::delete_many()
            .filter(sink_item::Column::LocationId.eq(location_id))
            .exec(&self.db)
            .await?;
        debug!(location_id, deleted = result.rows_affected, "cleared item rows");
        Ok(result.rows_affected)
    }

    async fn insert_items(&self, rows: &[ItemRecord]) -> Result<(), ServiceError> {
        if rows.is_empty() {
            return Ok(());
        }
        let models: Vec<sink_item::ActiveModel> =
            rows.iter().map(Self::item_active_model).collect();

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;
        sink_item::Entity::insert_many(models)
            .on_conflict(Self::item_upsert_conflict())
            .exec(&txn)
            .await?;
        txn.commit().await.map_err(|e| {
            error!("Failed to commit batch: {}", e);
            ServiceError::DatabaseError(e)
        })?;
        Ok(())
    }

    async fn find_promotion(
        &self,
        promotion_id: &str,
    ) -> Result<LookupOutcome<PromotionRecord>, ServiceError> {
        let model = sink_promotion::Entity::find()
            .filter(sink_promotion::Column::PromotionId.eq(promotion_id))
            .one(&self.db)
            .await?;
        match model {
            Some(model) => Ok(LookupOutcome::Found(Self::promotion_record(model)?)),
            None => Ok(LookupOutcome::NotFound),
        }
    }

    async fn upsert_promotion(&self, row: &PromotionRecord) -> Result<UpsertOutcome, ServiceError> {
        let existed = matches!(
            self.find_promotion(&row.promotion_id).await?,
            LookupOutcome::Found(_)
        );
        let model = Self::promotion_active_model(row)?;
        sink_promotion::Entity::insert(model)
            .on_conflict(Self::promotion_upsert_conflict())
            .exec(&self.db)
            .await?;
        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    async fn list_promotions(&self) -> Result<Vec<PromotionRecord>, ServiceError> {
        let models = sink_promotion::Entity::find().all(&self.db).await?;
        models.into_iter().map(Self::promotion_record).collect()
    }

    async fn delete_promotion(&self, promotion_id: &str) -> Result<(), ServiceError> {
        sink_promotion::Entity::delete_many()
            .filter(sink_promotion::Column::PromotionId.eq(promotion_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    fn supports_native_upsert(&self) -> bool {
        true
    }
}

const SQLITE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sink_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id TEXT NOT NULL UNIQUE,
        location_id TEXT NOT NULL,
        product_id TEXT NOT NULL,
        sku TEXT,
        product_name TEXT NOT NULL,
        description TEXT,
        category_id TEXT,
        category TEXT,
        image_url TEXT,
        brand_id TEXT,
        brand_name TEXT,
        vendor_id TEXT,
        vendor TEXT,
        strain_id TEXT,
        strain TEXT,
        tags JSON NOT NULL,
        quantity_available BIGINT NOT NULL,
        unit_price NUMERIC,
        updated_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_sink_items_location ON sink_items (location_id)",
    r#"CREATE TABLE IF NOT EXISTS sink_promotions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        promotion_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        code TEXT,
        amount NUMERIC,
        discount_type TEXT,
        is_active BOOLEAN NOT NULL,
        is_deleted BOOLEAN NOT NULL,
        valid_from TEXT,
        valid_until TEXT,
        applies_to_locations JSON NOT NULL,
        products JSON,
        product_categories JSON,
        brands JSON,
        vendors JSON,
        strains JSON,
        tags JSON,
        updated_at TEXT NOT NULL
    )"#,
];

const POSTGRES_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sink_items (
        id BIGSERIAL PRIMARY KEY,
        item_id TEXT NOT NULL UNIQUE,
        location_id TEXT NOT NULL,
        product_id TEXT NOT NULL,
        sku TEXT,
        product_name TEXT NOT NULL,
        description TEXT,
        category_id TEXT,
        category TEXT,
        image_url TEXT,
        brand_id TEXT,
        brand_name TEXT,
        vendor_id TEXT,
        vendor TEXT,
        strain_id TEXT,
        strain TEXT,
        tags JSONB NOT NULL,
        quantity_available BIGINT NOT NULL,
        unit_price NUMERIC,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_sink_items_location ON sink_items (location_id)",
    r#"CREATE TABLE IF NOT EXISTS sink_promotions (
        id BIGSERIAL PRIMARY KEY,
        promotion_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        code TEXT,
        amount NUMERIC,
        discount_type TEXT,
        is_active BOOLEAN NOT NULL,
        is_deleted BOOLEAN NOT NULL,
        valid_from TIMESTAMPTZ,
        valid_until TIMESTAMPTZ,
        applies_to_locations JSONB NOT NULL,
        products JSONB,
        product_categories JSONB,
        brands JSONB,
        vendors JSONB,
        strains JSONB,
        tags JSONB,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
];
