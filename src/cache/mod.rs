//! In-process TTL store for item → promotion associations.
//!
//! The cache is a memoization layer over the matching phase, never a second
//! source of truth: every entry is derivable by reapplying the evaluator to
//! the location's current item and promotion sets. Entries self-heal by
//! expiring at the latest validity-window end among their promotions, or a
//! default floor when none carries one.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{CatalogItem, DiscountType, Location, Promotion};

/// Denormalized promotion snapshot carried inside a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPromotion {
    pub promotion_id: i64,
    pub name: String,
    pub amount: Option<Decimal>,
    pub discount_type: Option<DiscountType>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl From<&Promotion> for CachedPromotion {
    fn from(promotion: &Promotion) -> Self {
        Self {
            promotion_id: promotion.promotion_id,
            name: promotion.name.clone(),
            amount: promotion.amount,
            discount_type: promotion.discount_type,
            valid_from: promotion.valid_from,
            valid_until: promotion.valid_until,
        }
    }
}

/// Item snapshot plus its currently-applicable promotions, keyed by
/// (location, item).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub location_id: String,
    pub location_name: String,
    pub item_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub unit_price: Option<Decimal>,
    pub promotions: Vec<CachedPromotion>,
    pub last_updated: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub locations: usize,
    pub entries_by_location: HashMap<String, usize>,
}

pub struct PromotionCache {
    entries: DashMap<(String, i64), CacheEntry>,
    default_ttl: Duration,
}

impl PromotionCache {
    pub fn new(default_ttl: std::time::Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: Duration::from_std(default_ttl).unwrap_or_else(|_| Duration::hours(24)),
        }
    }

    /// Stores the item with its matched promotions, fully replacing any
    /// previous entry for the same key.
    pub fn put(
        &self,
        location: &Location,
        item: &CatalogItem,
        promotions: &[&Promotion],
        now: DateTime<Utc>,
    ) {
        let entry = CacheEntry {
            location_id: location.id.clone(),
            location_name: location.name.clone(),
            item_id: item.item_id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            brand: item.brand_name.clone(),
            category: item.category.clone(),
            image_url: item.image_url.clone(),
            unit_price: item.unit_price,
            promotions: promotions.iter().map(|p| CachedPromotion::from(*p)).collect(),
            last_updated: now,
            expires_at: self.expiry_for(promotions, now),
        };
        self.entries
            .insert((location.id.clone(), item.item_id), entry);
    }

    /// Returns the live entry for (location, item); expired entries are
    /// dropped on read rather than served.
    pub fn get(&self, location_id: &str, item_id: i64, now: DateTime<Utc>) -> Option<CacheEntry> {
        let key = (location_id.to_string(), item_id);
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => return Some(entry.clone()),
            None => return None,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    pub fn list_by_location(&self, location_id: &str, now: DateTime<Utc>) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .filter(|kv| kv.key().0 == location_id && !kv.value().is_expired(now))
            .map(|kv| kv.value().clone())
            .collect()
    }

    pub fn list_all(&self, now: DateTime<Utc>) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .filter(|kv| !kv.value().is_expired(now))
            .map(|kv| kv.value().clone())
            .collect()
    }

    /// Removes every entry for a location, returning how many were evicted.
    pub fn evict_location(&self, location_id: &str) -> usize {
        let keys: Vec<(String, i64)> = self
            .entries
            .iter()
            .filter(|kv| kv.key().0 == location_id)
            .map(|kv| kv.key().clone())
            .collect();
        let mut evicted = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        evicted
    }

    /// Drops entries past their expiry, returning how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let keys: Vec<(String, i64)> = self
            .entries
            .iter()
            .filter(|kv| kv.value().is_expired(now))
            .map(|kv| kv.key().clone())
            .collect();
        let mut purged = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                purged += 1;
            }
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let mut entries_by_location: HashMap<String, usize> = HashMap::new();
        for kv in self.entries.iter() {
            *entries_by_location.entry(kv.key().0.clone()).or_default() += 1;
        }
        CacheStats {
            entries: self.entries.len(),
            locations: entries_by_location.len(),
            entries_by_location,
        }
    }

    /// Latest validity-window end across the matched promotions; the
    /// default TTL when none carries one or the latest end is already past.
    fn expiry_for(&self, promotions: &[&Promotion], now: DateTime<Utc>) -> DateTime<Utc> {
        match promotions.iter().filter_map(|p| p.valid_until).max() {
            Some(latest) if latest > now => latest,
            _ => now + self.default_ttl,
        }
    }
}
