use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use super::entities::{Listing, ListingKind, UserId};
use super::notice::Notices;
use super::store::{OfferStore, Partition};

/// Everything the client knows for one signed-in user. Owned by the session
/// and mutated only through the store operations.
#[derive(Clone, Debug)]
pub struct AppState {
    /// User the auth layer signed in; acts on every transition.
    pub user_id: UserId,
    cargo_offers: OfferStore,
    vehicle_offers: OfferStore,
    listings: HashMap<ListingKind, Vec<Listing>>,
    listings_fetched: HashMap<ListingKind, SystemTime>,
    pub notices: Notices,
}

impl AppState {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            cargo_offers: OfferStore::new(ListingKind::Cargo),
            vehicle_offers: OfferStore::new(ListingKind::Vehicle),
            listings: HashMap::new(),
            listings_fetched: HashMap::new(),
            notices: Notices::default(),
        }
    }

    pub fn offers(&self, kind: ListingKind) -> &OfferStore {
        match kind {
            ListingKind::Cargo => &self.cargo_offers,
            ListingKind::Vehicle => &self.vehicle_offers,
        }
    }

    pub fn offers_mut(&mut self, kind: ListingKind) -> &mut OfferStore {
        match kind {
            ListingKind::Cargo => &mut self.cargo_offers,
            ListingKind::Vehicle => &mut self.vehicle_offers,
        }
    }

    /// Offers the signed-in user received.
    pub fn inbox(&self) -> Partition {
        Partition::ByReceiver(self.user_id.clone())
    }

    /// Offers the signed-in user sent.
    pub fn outbox(&self) -> Partition {
        Partition::BySender(self.user_id.clone())
    }

    pub fn listings(&self, kind: ListingKind) -> &[Listing] {
        self.listings.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn listing(&self, kind: ListingKind, id: &str) -> Option<&Listing> {
        self.listings(kind).iter().find(|listing| listing.id == id)
    }

    pub fn set_listings(&mut self, kind: ListingKind, listings: Vec<Listing>) {
        self.listings.insert(kind, listings);
        self.listings_fetched.insert(kind, SystemTime::now());
    }

    pub fn listings_stale(&self, kind: ListingKind, ttl: Duration) -> bool {
        self.listings_fetched
            .get(&kind)
            .map(|time| time.elapsed().map(|elapsed| elapsed > ttl).unwrap_or(true))
            .unwrap_or(true)
    }

    /// Drops every cached offer and listing, e.g. after sign-out.
    pub fn clear(&mut self) {
        self.cargo_offers.clear();
        self.vehicle_offers.clear();
        self.listings.clear();
        self.listings_fetched.clear();
    }
}
