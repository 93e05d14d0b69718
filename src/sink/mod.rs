//! Adapters for the downstream store.
//!
//! The sink is consumed strictly as a write target through one trait, with
//! canonical record shapes produced here at the boundary. Lookups return
//! tagged outcomes (`Found | NotFound`) so callers pattern-match instead of
//! treating absence as an error path.

pub mod relational;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::{CatalogItem, DiscountType, FilterSet, Location, Promotion};

/// Outcome of a sink lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome<T> {
    Found(T),
    NotFound,
}

/// Outcome of a promotion upsert. `Skipped` marks the benign race where
/// another writer owns the row and it could not be re-found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Skipped,
}

/// One entry of a promotion's "applies to locations" association list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationRef {
    pub location_id: String,
    pub location_name: String,
    pub external_id: String,
}

impl Default for LocationRef {
    fn default() -> Self {
        Self {
            location_id: String::new(),
            location_name: String::new(),
            external_id: String::new(),
        }
    }
}

impl From<&Location> for LocationRef {
    fn from(location: &Location) -> Self {
        Self {
            location_id: location.id.clone(),
            location_name: location.name.clone(),
            external_id: location.external_id.clone(),
        }
    }
}

/// Canonical item row written to the sink. Identifiers are stringified at
/// this boundary; the sink contract is a string identifier unique per item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemRecord {
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
    pub tags: Vec<String>,
    pub quantity_available: i64,
    pub unit_price: Option<Decimal>,
}

impl ItemRecord {
    pub fn from_item(location: &Location, item: &CatalogItem) -> Self {
        Self {
            item_id: item.item_id.to_string(),
            location_id: location.id.clone(),
            product_id: item.product_id.to_string(),
            sku: item.sku.clone(),
            product_name: item.product_name.clone(),
            description: item.description.clone(),
            category_id: item.category_id.map(|id| id.to_string()),
            category: item.category.clone(),
            image_url: item.image_url.clone(),
            brand_id: item.brand_id.map(|id| id.to_string()),
            brand_name: item.brand_name.clone(),
            vendor_id: item.vendor_id.map(|id| id.to_string()),
            vendor: item.vendor.clone(),
            strain_id: item.strain_id.map(|id| id.to_string()),
            strain: item.strain.clone(),
            tags: item.tags.clone(),
            quantity_available: item.quantity_available,
            unit_price: item.unit_price,
        }
    }

    /// Per-row validity: a malformed row is dropped and counted, never
    /// fatal to its batch.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.item_id.is_empty() || self.item_id == "0" {
            return Err(ServiceError::ValidationError(
                "item row is missing its identifier".into(),
            ));
        }
        if self.product_name.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "item {} is missing a product name",
                self.item_id
            )));
        }
        Ok(())
    }
}

/// Canonical promotion row written to the sink. Promotions are global; the
/// association list is the union of every location currently offering the
/// promotion and is rebuilt each reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromotionRecord {
    pub promotion_id: String,
    pub name: String,
    pub code: Option<String>,
    pub amount: Option<Decimal>,
    pub discount_type: Option<DiscountType>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub applies_to_locations: Vec<LocationRef>,
    pub products: Option<FilterSet<i64>>,
    pub product_categories: Option<FilterSet<i64>>,
    pub brands: Option<FilterSet<i64>>,
    pub vendors: Option<FilterSet<i64>>,
    pub strains: Option<FilterSet<i64>>,
    pub tags: Option<FilterSet<String>>,
}

impl Default for PromotionRecord {
    fn default() -> Self {
        Self {
            promotion_id: String::new(),
            name: String::new(),
            code: None,
            amount: None,
            discount_type: None,
            is_active: true,
            is_deleted: false,
            valid_from: None,
            valid_until: None,
            applies_to_locations: Vec::new(),
            products: None,
            product_categories: None,
            brands: None,
            vendors: None,
            strains: None,
            tags: None,
        }
    }
}

impl PromotionRecord {
    pub fn from_promotion(location: &Location, promotion: &Promotion) -> Self {
        Self {
            promotion_id: promotion.promotion_id.to_string(),
            name: promotion.name.clone(),
            code: promotion.code.clone(),
            amount: promotion.amount,
            discount_type: promotion.discount_type,
            is_active: promotion.is_active,
            is_deleted: promotion.is_deleted,
            valid_from: promotion.valid_from,
            valid_until: promotion.valid_until,
            applies_to_locations: vec![LocationRef::from(location)],
            products: promotion.products.clone(),
            product_categories: promotion.product_categories.clone(),
            brands: promotion.brands.clone(),
            vendors: promotion.vendors.clone(),
            strains: promotion.strains.clone(),
            tags: promotion.tags.clone(),
        }
    }

    /// Unions the sink's known association list with the location being
    /// synced: an existing entry for the same outlet is refreshed in place,
    /// a new outlet is appended.
    pub fn absorb_locations(&mut self, existing: &[LocationRef], current: &Location) {
        let current_ref = LocationRef::from(current);
        let mut merged = existing.to_vec();
        match merged
            .iter_mut()
            .find(|l| l.external_id == current_ref.external_id)
        {
            Some(slot) => *slot = current_ref,
            None => merged.push(current_ref),
        }
        self.applies_to_locations = merged;
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.promotion_id.is_empty() || self.promotion_id == "0" {
            return Err(ServiceError::ValidationError(
                "promotion row is missing its identifier".into(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "promotion {} is missing a name",
                self.promotion_id
            )));
        }
        Ok(())
    }
}

/// Write contract the reconciliation relies on. Implementations own the
/// transport (REST collections or direct relational writes); callers own
/// batching, retries, and accounting.
#[async_trait]
pub trait SinkAdapter: Send + Sync {
    /// Deletes every item row scoped to the location, returning the count.
    async fn delete_items(&self, location_id: &str) -> Result<u64, ServiceError>;

    /// Writes one batch of item rows. Transactional where the sink supports
    /// it; a failure leaves previously committed batches untouched.
    async fn insert_items(&self, rows: &[ItemRecord]) -> Result<(), ServiceError>;

    async fn find_promotion(
        &self,
        promotion_id: &str,
    ) -> Result<LookupOutcome<PromotionRecord>, ServiceError>;

    /// Creates or refreshes one promotion row keyed by its identifier.
    async fn upsert_promotion(&self, row: &PromotionRecord) -> Result<UpsertOutcome, ServiceError>;

    async fn list_promotions(&self) -> Result<Vec<PromotionRecord>, ServiceError>;

    async fn delete_promotion(&self, promotion_id: &str) -> Result<(), ServiceError>;

    /// Whether the sink resolves concurrent creates atomically
    /// (insert-on-conflict-update). Adapters without it fall back to
    /// lookup-then-update.
    fn supports_native_upsert(&self) -> bool;
}

/// Where the orchestrator learns which locations to sync.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Every active location, including ones missing credentials — the
    /// orchestrator skips and counts those.
    async fn active_locations(&self) -> Result<Vec<Location>, ServiceError>;
}

/// Locations declared directly in configuration, for deployments without a
/// locations collection in the sink.
pub struct StaticLocationProvider {
    locations: Vec<Location>,
}

impl StaticLocationProvider {
    pub fn new(locations: Vec<Location>) -> Self {
        Self { locations }
    }
}

#[async_trait]
impl LocationProvider for StaticLocationProvider {
    async fn active_locations(&self) -> Result<Vec<Location>, ServiceError> {
        Ok(self
            .locations
            .iter()
            .filter(|location| location.is_active)
            .cloned()
            .collect())
    }
}
