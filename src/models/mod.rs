// Domain models deserialized from the upstream point-of-sale API.

pub mod catalog_item;
pub mod location;
pub mod promotion;

pub use catalog_item::CatalogItem;
pub use location::{Location, SourceCredentials};
pub use promotion::{DiscountType, FilterSet, Promotion};
