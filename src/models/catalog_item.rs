use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One sellable inventory unit at a single location, as reported by the
/// point-of-sale reporting feed. Items are owned by the location that
/// reports them and replaced wholesale on every sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogItem {
    #[serde(rename = "inventoryId")]
    pub item_id: i64,
    pub product_id: i64,
    pub sku: Option<String>,
    pub product_name: String,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub brand_id: Option<i64>,
    pub brand_name: Option<String>,
    pub vendor_id: Option<i64>,
    pub vendor: Option<String>,
    pub strain_id: Option<i64>,
    pub strain: Option<String>,
    pub strain_type: Option<String>,
    pub tags: Vec<String>,
    pub quantity_available: i64,
    pub unit_price: Option<Decimal>,
    pub unit_weight: Option<Decimal>,
    pub unit_weight_unit: Option<String>,
    /// Whether the item participates in automatically applied promotions.
    #[serde(rename = "allowAutomaticDiscounts")]
    pub allow_automatic_promotions: bool,
    #[serde(rename = "lastModifiedDateUtc")]
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl Default for CatalogItem {
    fn default() -> Self {
        Self {
            item_id: 0,
            product_id: 0,
            sku: None,
            product_name: String::new(),
            description: None,
            category_id: None,
            category: None,
            image_url: None,
            brand_id: None,
            brand_name: None,
            vendor_id: None,
            vendor: None,
            strain_id: None,
            strain: None,
            strain_type: None,
            tags: Vec::new(),
            quantity_available: 0,
            unit_price: None,
            unit_weight: None,
            unit_weight_unit: None,
            allow_automatic_promotions: true,
            last_modified_at: None,
        }
    }
}

impl CatalogItem {
    /// Items below the configured quantity floor are excluded from the sink
    /// entirely.
    pub fn meets_quantity_floor(&self, floor: i64) -> bool {
        self.quantity_available >= floor
    }
}
