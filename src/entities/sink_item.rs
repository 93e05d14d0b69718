use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One reconciled catalog item row, owned by its location and replaced
/// wholesale every pass.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sink_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub item_id: String,
    pub location_id: String,
    pub product_id: String,
    pub sku: Option<String>,
    pub product_name: String,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub brand_id: Option<String>,
    pub brand_name: Option<String>,
    pub vendor_id: Option<String>,
    pub vendor: Option<String>,
    pub strain_id: Option<String>,
    pub strain: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub tags: Json,
    pub quantity_available: i64,
    pub unit_price: Option<Decimal>,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
