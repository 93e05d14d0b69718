use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One reconciled promotion row. Promotions are global; the
/// `applies_to_locations` JSON column holds the association list, and the
/// filter columns carry the raw inclusion/exclusion sets.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sink_promotions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub promotion_id: String,
    pub name: String,
    pub code: Option<String>,
    pub amount: Option<Decimal>,
    pub discount_type: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub valid_from: Option<DateTimeUtc>,
    pub valid_until: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Json")]
    pub applies_to_locations: Json,
    #[sea_orm(column_type = "Json", nullable)]
    pub products: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub product_categories: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub brands: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub vendors: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub strains: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub tags: Option<Json>,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
