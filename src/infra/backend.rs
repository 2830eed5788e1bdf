//! Contract the session expects from the listing/offer backend.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Listing, ListingKind, NewOffer, Offer, OfferId, OfferStatus, Partition};

#[derive(Debug, Error)]
pub enum OfferClientError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Remote persistence for offers and listings. The backend is authoritative;
/// the client caches what it returns.
#[async_trait]
pub trait OfferBackend: Send + Sync {
    async fn create_offer(&self, offer: &NewOffer) -> Result<Offer, OfferClientError>;

    async fn update_status(
        &self,
        kind: ListingKind,
        offer_id: OfferId,
        status: OfferStatus,
    ) -> Result<Offer, OfferClientError>;

    async fn list_offers(
        &self,
        kind: ListingKind,
        partition: &Partition,
    ) -> Result<Vec<Offer>, OfferClientError>;

    async fn get_offer(&self, kind: ListingKind, offer_id: OfferId)
        -> Result<Offer, OfferClientError>;

    async fn list_listings(&self, kind: ListingKind) -> Result<Vec<Listing>, OfferClientError>;
}
