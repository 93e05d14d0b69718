//! Promotion applicability.
//!
//! Pure and total: no I/O, no state, and a missing attribute is simply an
//! unsatisfied inclusion (or a satisfied exclusion), never an error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{CatalogItem, FilterSet, Promotion};

/// Decides whether `promotion` applies to `item` at instant `now`.
///
/// A promotion applies iff it is live, the item participates in automatic
/// promotions, and every populated filter dimension is satisfied. Dimensions
/// are checked in feed order and short-circuit on the first failure; an
/// unpopulated dimension is vacuously satisfied.
pub fn applies(item: &CatalogItem, promotion: &Promotion, now: DateTime<Utc>) -> bool {
    if !promotion.is_live(now) {
        return false;
    }
    if !item.allow_automatic_promotions {
        return false;
    }

    scalar_dimension(Some(item.product_id), promotion.products.as_ref())
        && scalar_dimension(item.category_id, promotion.product_categories.as_ref())
        && scalar_dimension(item.brand_id, promotion.brands.as_ref())
        && scalar_dimension(item.vendor_id, promotion.vendors.as_ref())
        && scalar_dimension(item.strain_id, promotion.strains.as_ref())
        && tag_dimension(&item.tags, promotion.tags.as_ref())
}

/// Single-value membership: inclusion needs the attribute present and
/// listed; exclusion ("all except these") needs it absent or unlisted.
fn scalar_dimension(value: Option<i64>, filter: Option<&FilterSet<i64>>) -> bool {
    let Some(filter) = filter.filter(|f| f.is_populated()) else {
        return true;
    };
    match value {
        Some(v) => filter.ids.contains(&v) != filter.is_exclusion,
        None => filter.is_exclusion,
    }
}

/// Set-intersection membership: inclusion needs at least one shared tag,
/// exclusion needs none.
fn tag_dimension(tags: &[String], filter: Option<&FilterSet<String>>) -> bool {
    let Some(filter) = filter.filter(|f| f.is_populated()) else {
        return true;
    };
    let overlap = tags.iter().any(|tag| filter.ids.contains(tag));
    overlap != filter.is_exclusion
}

/// All promotions applying to `item` — the inner loop of the matching
/// phase, O(items × promotions) per location.
pub fn applicable_promotions<'a>(
    item: &CatalogItem,
    promotions: &'a [Promotion],
    now: DateTime<Utc>,
) -> Vec<&'a Promotion> {
    promotions
        .iter()
        .filter(|promotion| applies(item, promotion, now))
        .collect()
}

/// Orders applicable promotions for display limits: percentage magnitude
/// descending, ties broken by fixed amount descending, truncated to
/// `limit`. Presentation only — this never affects which promotions are
/// considered applicable.
pub fn rank_for_display<'a>(
    mut applicable: Vec<&'a Promotion>,
    limit: usize,
) -> Vec<&'a Promotion> {
    applicable.sort_by(|a, b| {
        let pa = a.declared_percentage().unwrap_or(Decimal::ZERO);
        let pb = b.declared_percentage().unwrap_or(Decimal::ZERO);
        pb.cmp(&pa)
            .then_with(|| b.fixed_amount().cmp(&a.fixed_amount()))
    });
    applicable.truncate(limit);
    applicable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscountType;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(Some(7), vec![7, 9], false, true)]
    #[case(Some(7), vec![7, 9], true, false)]
    #[case(Some(8), vec![7, 9], false, false)]
    #[case(Some(8), vec![7, 9], true, true)]
    #[case(None, vec![7, 9], false, false)]
    #[case(None, vec![7, 9], true, true)]
    fn scalar_dimension_semantics(
        #[case] value: Option<i64>,
        #[case] ids: Vec<i64>,
        #[case] is_exclusion: bool,
        #[case] expected: bool,
    ) {
        let filter = FilterSet { ids, is_exclusion };
        assert_eq!(scalar_dimension(value, Some(&filter)), expected);
    }

    fn item() -> CatalogItem {
        CatalogItem {
            item_id: 1,
            product_id: 100,
            category_id: Some(7),
            brand_id: Some(31),
            vendor_id: Some(12),
            strain_id: None,
            tags: vec!["sale".into(), "new".into()],
            quantity_available: 10,
            ..CatalogItem::default()
        }
    }

    fn promotion() -> Promotion {
        Promotion {
            promotion_id: 77,
            name: "Test promotion".into(),
            ..Promotion::default()
        }
    }

    #[test]
    fn vacuous_truth_applies_to_everything() {
        let now = Utc::now();
        assert!(applies(&item(), &promotion(), now));
    }

    #[test]
    fn category_inclusion_and_exclusion() {
        let now = Utc::now();
        let mut promo = promotion();

        promo.product_categories = Some(FilterSet::include(vec![7, 9]));
        assert!(applies(&item(), &promo, now));

        promo.product_categories = Some(FilterSet::exclude(vec![7, 9]));
        assert!(!applies(&item(), &promo, now));

        promo.product_categories = Some(FilterSet::include(vec![8]));
        assert!(!applies(&item(), &promo, now));
    }

    #[test]
    fn missing_attribute_fails_inclusion_passes_exclusion() {
        let now = Utc::now();
        let mut promo = promotion();

        // The item has no strain id.
        promo.strains = Some(FilterSet::include(vec![5]));
        assert!(!applies(&item(), &promo, now));

        promo.strains = Some(FilterSet::exclude(vec![5]));
        assert!(applies(&item(), &promo, now));
    }

    #[test]
    fn empty_filter_set_is_unconstrained() {
        let now = Utc::now();
        let mut promo = promotion();
        promo.brands = Some(FilterSet::include(Vec::new()));
        assert!(applies(&item(), &promo, now));
    }

    #[test]
    fn tag_dimension_uses_intersection() {
        let now = Utc::now();
        let mut promo = promotion();

        promo.tags = Some(FilterSet::include(vec!["new".into(), "vip".into()]));
        assert!(applies(&item(), &promo, now));

        promo.tags = Some(FilterSet::exclude(vec!["new".into(), "vip".into()]));
        assert!(!applies(&item(), &promo, now));

        promo.tags = Some(FilterSet::include(vec!["vip".into()]));
        assert!(!applies(&item(), &promo, now));

        let mut untagged = item();
        untagged.tags.clear();
        promo.tags = Some(FilterSet::include(vec!["new".into()]));
        assert!(!applies(&untagged, &promo, now));
        promo.tags = Some(FilterSet::exclude(vec!["new".into()]));
        assert!(applies(&untagged, &promo, now));
    }

    #[test]
    fn all_populated_dimensions_must_pass() {
        let now = Utc::now();
        let mut promo = promotion();
        promo.products = Some(FilterSet::include(vec![100]));
        promo.brands = Some(FilterSet::exclude(vec![31]));
        assert!(!applies(&item(), &promo, now));

        promo.brands = Some(FilterSet::exclude(vec![99]));
        assert!(applies(&item(), &promo, now));
    }

    #[test]
    fn lifecycle_gates_precede_filters() {
        let now = Utc::now();
        let mut promo = promotion();
        promo.is_active = false;
        assert!(!applies(&item(), &promo, now));

        let mut promo = promotion();
        promo.is_deleted = true;
        assert!(!applies(&item(), &promo, now));

        let mut promo = promotion();
        promo.valid_until = Some(now - Duration::minutes(1));
        assert!(!applies(&item(), &promo, now));

        let mut ineligible = item();
        ineligible.allow_automatic_promotions = false;
        assert!(!applies(&ineligible, &promotion(), now));
    }

    #[test]
    fn applicable_promotions_collects_matches() {
        let now = Utc::now();
        let mut excluded = promotion();
        excluded.promotion_id = 1;
        excluded.product_categories = Some(FilterSet::exclude(vec![7]));
        let mut included = promotion();
        included.promotion_id = 2;
        included.product_categories = Some(FilterSet::include(vec![7]));
        let everything = promotion();

        let promotions = vec![excluded, included, everything];
        let matched = applicable_promotions(&item(), &promotions, now);
        let ids: Vec<i64> = matched.iter().map(|p| p.promotion_id).collect();
        assert_eq!(ids, vec![2, 77]);
    }

    #[test]
    fn display_ranking_orders_by_magnitude_without_affecting_matches() {
        let now = Utc::now();
        let name_parsed = Promotion {
            promotion_id: 1,
            name: "Spring 30% Off".into(),
            ..Promotion::default()
        };
        let structured = Promotion {
            promotion_id: 2,
            name: "Member discount".into(),
            amount: Some(dec!(20)),
            discount_type: Some(DiscountType::Percentage),
            ..Promotion::default()
        };
        let fixed = Promotion {
            promotion_id: 3,
            name: "Five off".into(),
            amount: Some(dec!(5)),
            discount_type: Some(DiscountType::Fixed),
            ..Promotion::default()
        };

        let promotions = vec![fixed, structured, name_parsed];
        let matched = applicable_promotions(&item(), &promotions, now);
        assert_eq!(matched.len(), 3);

        let ranked = rank_for_display(matched.clone(), 2);
        let ids: Vec<i64> = ranked.iter().map(|p| p.promotion_id).collect();
        assert_eq!(ids, vec![1, 2]);

        // Ranking is presentation only; the applicable set is unchanged.
        assert_eq!(matched.len(), 3);
    }

    #[test]
    fn fixed_amount_breaks_percentage_ties() {
        let a = Promotion {
            promotion_id: 1,
            name: "10% bundle".into(),
            ..Promotion::default()
        };
        let b = Promotion {
            promotion_id: 2,
            name: "10% loyalty".into(),
            amount: Some(dec!(3)),
            discount_type: Some(DiscountType::Fixed),
            ..Promotion::default()
        };
        let ranked = rank_for_display(vec![&a, &b], 2);
        let ids: Vec<i64> = ranked.iter().map(|p| p.promotion_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
