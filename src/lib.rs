//! Client core for a freight marketplace: offer lifecycle rules, a
//! partitioned offer cache and the REST backend they talk to.

pub mod app;
pub mod domain;
pub mod infra;
pub mod util;

pub use app::{OfferSession, SessionError};
