use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Inclusion or exclusion membership over one attribute dimension.
///
/// An absent field, an explicit `ids: null`, or an empty `ids` list all
/// mean the dimension is unconstrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct FilterSet<T> {
    #[serde(deserialize_with = "nullable_ids")]
    pub ids: Vec<T>,
    pub is_exclusion: bool,
}

fn nullable_ids<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl<T> FilterSet<T> {
    pub fn include(ids: Vec<T>) -> Self {
        Self {
            ids,
            is_exclusion: false,
        }
    }

    pub fn exclude(ids: Vec<T>) -> Self {
        Self {
            ids,
            is_exclusion: true,
        }
    }

    pub fn is_populated(&self) -> bool {
        !self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    /// Tolerant parse of the spellings seen in upstream feeds. Unknown
    /// spellings map to `None` rather than failing the whole row.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "percent" | "percentage" | "percentoff" => Some(Self::Percentage),
            "amount" | "fixed" | "flat" | "dollar" | "amountoff" => Some(Self::Fixed),
            _ => None,
        }
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percentage => write!(f, "percentage"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

fn de_discount_type<'de, D>(deserializer: D) -> Result<Option<DiscountType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(DiscountType::parse))
}

/// A named discount rule scoped by up to six filter dimensions and a
/// validity window. Promotions are global across the locations that offer
/// them; the association list lives on the sink record and is rebuilt as a
/// union every reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Promotion {
    #[serde(rename = "discountId")]
    pub promotion_id: i64,
    #[serde(rename = "discountName")]
    pub name: String,
    #[serde(rename = "discountCode")]
    pub code: Option<String>,
    pub menu_display_name: Option<String>,
    #[serde(rename = "discountAmount")]
    pub amount: Option<Decimal>,
    #[serde(rename = "discountType", deserialize_with = "de_discount_type")]
    pub discount_type: Option<DiscountType>,
    #[serde(rename = "applicationMethod")]
    pub apply_method: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub is_available_online: bool,
    #[serde(rename = "stackOnOtherDiscounts")]
    pub stacks_with_other_promotions: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub products: Option<FilterSet<i64>>,
    pub product_categories: Option<FilterSet<i64>>,
    pub brands: Option<FilterSet<i64>>,
    pub vendors: Option<FilterSet<i64>>,
    pub strains: Option<FilterSet<i64>>,
    pub tags: Option<FilterSet<String>>,
}

impl Default for Promotion {
    fn default() -> Self {
        Self {
            promotion_id: 0,
            name: String::new(),
            code: None,
            menu_display_name: None,
            amount: None,
            discount_type: None,
            apply_method: None,
            is_active: true,
            is_deleted: false,
            is_available_online: true,
            stacks_with_other_promotions: false,
            valid_from: None,
            valid_until: None,
            products: None,
            product_categories: None,
            brands: None,
            vendors: None,
            strains: None,
            tags: None,
        }
    }
}

static PERCENT_IN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("percent regex"));

impl Promotion {
    /// Whether the promotion can apply to anything at instant `now`:
    /// active, not soft-deleted, and inside its validity window.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && !self.is_deleted
            && self.valid_from.map_or(true, |from| from <= now)
            && self.valid_until.map_or(true, |until| until > now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map_or(false, |until| until <= now)
    }

    /// Percentage magnitude used for display ranking. Prefers the
    /// structured amount when the discount type is declared as a
    /// percentage; falls back to a percent figure embedded in the display
    /// name ("Summer 20% Off"). The name parse is a heuristic carried from
    /// the upstream feed, not authoritative.
    pub fn declared_percentage(&self) -> Option<Decimal> {
        if self.discount_type == Some(DiscountType::Percentage) {
            if let Some(amount) = self.amount {
                return Some(amount);
            }
        }
        PERCENT_IN_NAME
            .captures(&self.name)
            .and_then(|caps| Decimal::from_str(&caps[1]).ok())
    }

    /// Fixed-amount magnitude used to break display-ranking ties.
    pub fn fixed_amount(&self) -> Decimal {
        match self.discount_type {
            Some(DiscountType::Fixed) => self.amount.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn deserializes_discount_feed_row() {
        let row = serde_json::json!({
            "discountId": 77,
            "discountName": "Summer 20% Off",
            "discountAmount": 20.0,
            "discountType": "Percent",
            "isActive": true,
            "validFrom": "2026-06-01T00:00:00Z",
            "validUntil": "2026-09-01T00:00:00Z",
            "productCategories": { "ids": [7, 9], "isExclusion": false },
            "tags": { "ids": ["sale"], "isExclusion": true }
        });

        let promo: Promotion = serde_json::from_value(row).unwrap();
        assert_eq!(promo.promotion_id, 77);
        assert_eq!(promo.discount_type, Some(DiscountType::Percentage));
        assert_eq!(
            promo.product_categories,
            Some(FilterSet::include(vec![7, 9]))
        );
        assert_eq!(promo.tags, Some(FilterSet::exclude(vec!["sale".into()])));
        assert!(!promo.is_deleted);
    }

    #[test]
    fn unknown_discount_type_is_tolerated() {
        let row = serde_json::json!({ "discountId": 1, "discountType": "Tiered" });
        let promo: Promotion = serde_json::from_value(row).unwrap();
        assert_eq!(promo.discount_type, None);
    }

    #[test]
    fn null_filter_ids_mean_unconstrained() {
        let row = serde_json::json!({
            "discountId": 1,
            "brands": { "ids": null, "isExclusion": false }
        });
        let promo: Promotion = serde_json::from_value(row).unwrap();
        let brands = promo.brands.unwrap();
        assert!(!brands.is_populated());
    }

    #[test]
    fn liveness_respects_window_and_flags() {
        let now = Utc::now();
        let mut promo = Promotion::default();
        assert!(promo.is_live(now));

        promo.valid_from = Some(now + Duration::hours(1));
        assert!(!promo.is_live(now));

        promo.valid_from = Some(now - Duration::hours(1));
        promo.valid_until = Some(now - Duration::minutes(1));
        assert!(!promo.is_live(now));
        assert!(promo.is_expired(now));

        promo.valid_until = Some(now + Duration::hours(1));
        assert!(promo.is_live(now));

        promo.is_deleted = true;
        assert!(!promo.is_live(now));

        promo.is_deleted = false;
        promo.is_active = false;
        assert!(!promo.is_live(now));
    }

    #[test]
    fn percentage_prefers_structured_amount() {
        let mut promo = Promotion {
            name: "Summer 30% Off".into(),
            amount: Some(dec!(25)),
            discount_type: Some(DiscountType::Percentage),
            ..Promotion::default()
        };
        assert_eq!(promo.declared_percentage(), Some(dec!(25)));

        promo.discount_type = Some(DiscountType::Fixed);
        assert_eq!(promo.declared_percentage(), Some(dec!(30)));

        promo.name = "Bundle deal".into();
        assert_eq!(promo.declared_percentage(), None);
        assert_eq!(promo.fixed_amount(), dec!(25));
    }

    #[test]
    fn percent_parse_handles_decimals_and_spacing() {
        let promo = Promotion {
            name: "Flash sale 12.5 % today".into(),
            ..Promotion::default()
        };
        assert_eq!(promo.declared_percentage(), Some(dec!(12.5)));
    }
}
