//! Offer lifecycle, offer cache and listing queries live here.

pub mod app_state;
pub mod entities;
pub mod lifecycle;
pub mod listing_query;
pub mod notice;
pub mod store;

pub use app_state::AppState;
pub use entities::{
    Listing, ListingId, ListingKind, NewOffer, Offer, OfferId, OfferStatus, OfferValidationError,
    UserId,
};
pub use lifecycle::{
    available_actions, request_transition, role_of, OfferAction, OfferRole, TransitionError,
};
pub use listing_query::{sort_listings, ListingFilter, ListingSort};
pub use notice::{Notice, NoticeKind, Notices};
pub use store::{LoadOutcome, LoadTicket, OfferStore, Partition};
