//! Remote collaborators: the marketplace REST backend.

pub mod backend;
pub mod client;

pub use backend::{OfferBackend, OfferClientError};
pub use client::OfferApiClient;
