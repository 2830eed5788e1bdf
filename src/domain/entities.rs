use std::fmt;

use time::OffsetDateTime;

/// Identifier assigned to offers by the backend.
pub type OfferId = i64;

/// Opaque user identifier supplied by the auth layer.
pub type UserId = String;

/// Identifier of a cargo or vehicle advertisement.
pub type ListingId = String;

/// The two advertisement types offers can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListingKind {
    Cargo,
    Vehicle,
}

impl ListingKind {
    pub const ALL: [ListingKind; 2] = [ListingKind::Cargo, ListingKind::Vehicle];

    pub fn name(&self) -> &'static str {
        match self {
            ListingKind::Cargo => "cargo",
            ListingKind::Vehicle => "vehicle",
        }
    }

    /// Cargo offers carry a price, vehicle offers never do.
    pub fn is_priced(&self) -> bool {
        matches!(self, ListingKind::Cargo)
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OfferStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Expired,
    Completed,
}

impl OfferStatus {
    pub const ALL: [OfferStatus; 6] = [
        OfferStatus::Pending,
        OfferStatus::Accepted,
        OfferStatus::Rejected,
        OfferStatus::Cancelled,
        OfferStatus::Expired,
        OfferStatus::Completed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "Pending",
            OfferStatus::Accepted => "Accepted",
            OfferStatus::Rejected => "Rejected",
            OfferStatus::Cancelled => "Cancelled",
            OfferStatus::Expired => "Expired",
            OfferStatus::Completed => "Completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.name().eq_ignore_ascii_case(raw.trim()))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }

    /// Full transition table, including the backend-owned `Expired` edge.
    /// `Completed` is reached through fulfillment outside this crate.
    pub fn can_transition_to(&self, next: OfferStatus) -> bool {
        matches!(
            (self, next),
            (
                OfferStatus::Pending,
                OfferStatus::Accepted
                    | OfferStatus::Rejected
                    | OfferStatus::Cancelled
                    | OfferStatus::Expired
            )
        )
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A proposal from `sender_id` to the owner of a listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Offer {
    pub id: OfferId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub kind: ListingKind,
    pub listing_id: ListingId,
    /// Denormalized display copy of the listing title.
    pub listing_title: String,
    /// Only cargo offers are priced.
    pub price: Option<f64>,
    pub message: String,
    pub status: OfferStatus,
    pub created_date: OffsetDateTime,
    pub expiry_date: Option<OffsetDateTime>,
}

impl Offer {
    pub fn is_pending(&self) -> bool {
        self.status == OfferStatus::Pending
    }

    /// Still pending although the expiry date has passed. Expiry itself is
    /// applied by the backend; this only flags the offer for display.
    pub fn is_past_expiry(&self, now: OffsetDateTime) -> bool {
        self.is_pending() && self.expiry_date.map(|at| now > at).unwrap_or(false)
    }
}

/// A cargo or vehicle advertisement.
#[derive(Clone, Debug, PartialEq)]
pub struct Listing {
    pub id: ListingId,
    pub kind: ListingKind,
    pub owner_id: UserId,
    pub title: String,
    pub origin_city: Option<String>,
    pub origin_country: Option<String>,
    pub destination_city: Option<String>,
    pub destination_country: Option<String>,
    pub weight_kg: Option<f64>,
    pub price: Option<f64>,
    pub created_date: OffsetDateTime,
}

/// Offer payload before the backend has assigned an id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewOffer {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub kind: ListingKind,
    pub listing_id: ListingId,
    pub listing_title: String,
    pub price: Option<f64>,
    pub message: String,
    pub expiry_date: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OfferValidationError {
    #[error("user {0} cannot make an offer on their own listing")]
    SelfOffer(UserId),
    #[error("cargo offers need a price")]
    MissingPrice,
    #[error("price must be a positive amount, got {0}")]
    InvalidPrice(f64),
    #[error("vehicle offers do not carry a price")]
    UnexpectedPrice,
    #[error("cargo offers need a message")]
    MissingMessage,
}

impl NewOffer {
    /// Builds an offer addressed to the owner of `listing`.
    pub fn for_listing(
        listing: &Listing,
        sender_id: impl Into<UserId>,
        price: Option<f64>,
        message: impl Into<String>,
    ) -> Result<Self, OfferValidationError> {
        let offer = Self {
            sender_id: sender_id.into(),
            receiver_id: listing.owner_id.clone(),
            kind: listing.kind,
            listing_id: listing.id.clone(),
            listing_title: listing.title.clone(),
            price,
            message: message.into(),
            expiry_date: None,
        };
        offer.validate()?;
        Ok(offer)
    }

    pub fn validate(&self) -> Result<(), OfferValidationError> {
        if self.sender_id == self.receiver_id {
            return Err(OfferValidationError::SelfOffer(self.sender_id.clone()));
        }

        match (self.kind.is_priced(), self.price) {
            (true, None) => return Err(OfferValidationError::MissingPrice),
            (true, Some(price)) if !(price.is_finite() && price > 0.0) => {
                return Err(OfferValidationError::InvalidPrice(price));
            }
            (false, Some(_)) => return Err(OfferValidationError::UnexpectedPrice),
            _ => {}
        }

        if self.kind == ListingKind::Cargo && self.message.trim().is_empty() {
            return Err(OfferValidationError::MissingMessage);
        }

        Ok(())
    }
}
