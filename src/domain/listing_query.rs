//! Client-side filtering and sorting of cargo and vehicle listings.

use std::cmp::Ordering;

use super::entities::{Listing, ListingKind};

/// Sorting options for listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListingSort {
    #[default]
    Newest,
    Price,
    Weight,
    Title,
}

impl ListingSort {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Newest => "Newest",
            Self::Price => "Price",
            Self::Weight => "Weight",
            Self::Title => "Title",
        }
    }
}

/// Filter options for listings. Text fields match case-insensitive
/// substrings.
#[derive(Clone, Debug, Default)]
pub struct ListingFilter {
    pub kind: Option<ListingKind>,
    pub owner_id: Option<String>,
    /// Hides the user's own listings, which cannot receive their offers.
    pub exclude_owner: Option<String>,
    pub origin_city: Option<String>,
    pub origin_country: Option<String>,
    pub destination_city: Option<String>,
    pub destination_country: Option<String>,
    pub max_weight_kg: Option<f64>,
    pub max_price: Option<f64>,
}

impl ListingFilter {
    pub fn matches(&self, listing: &Listing) -> bool {
        if let Some(kind) = self.kind {
            if listing.kind != kind { return false; }
        }
        if let Some(ref owner) = self.owner_id {
            if &listing.owner_id != owner { return false; }
        }
        if let Some(ref excluded) = self.exclude_owner {
            if &listing.owner_id == excluded { return false; }
        }
        if !text_matches(self.origin_city.as_deref(), listing.origin_city.as_deref()) { return false; }
        if !text_matches(self.origin_country.as_deref(), listing.origin_country.as_deref()) { return false; }
        if !text_matches(self.destination_city.as_deref(), listing.destination_city.as_deref()) { return false; }
        if !text_matches(
            self.destination_country.as_deref(),
            listing.destination_country.as_deref(),
        ) {
            return false;
        }
        if let Some(max) = self.max_weight_kg {
            if listing.weight_kg.map(|w| w > max).unwrap_or(false) { return false; }
        }
        if let Some(max) = self.max_price {
            if listing.price.map(|p| p > max).unwrap_or(false) { return false; }
        }

        true
    }

    pub fn apply<'a>(&self, listings: &'a [Listing]) -> Vec<&'a Listing> {
        listings.iter().filter(|listing| self.matches(listing)).collect()
    }
}

fn text_matches(needle: Option<&str>, haystack: Option<&str>) -> bool {
    let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) else {
        return true;
    };
    haystack
        .map(|value| value.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

/// Sort listings by the given criteria. Listings without the sorted value
/// go last in either direction.
pub fn sort_listings(listings: &mut [&Listing], sort: ListingSort, descending: bool) {
    listings.sort_by(|a, b| {
        let ordered = |ord: Ordering| if descending { ord.reverse() } else { ord };
        match sort {
            ListingSort::Newest => ordered(b.created_date.cmp(&a.created_date)),
            ListingSort::Price => compare_optional(a.price, b.price, ordered),
            ListingSort::Weight => compare_optional(a.weight_kg, b.weight_kg, ordered),
            ListingSort::Title => ordered(a.title.to_lowercase().cmp(&b.title.to_lowercase())),
        }
    });
}

fn compare_optional(
    a: Option<f64>,
    b: Option<f64>,
    ordered: impl Fn(Ordering) -> Ordering,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => ordered(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
