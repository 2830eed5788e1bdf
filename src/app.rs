//! Session wiring: combines the backend, the offer stores and the lifecycle
//! rules for the signed-in user.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    domain::{
        request_transition, AppState, Listing, ListingKind, LoadOutcome, NewOffer, NoticeKind,
        Offer, OfferAction, OfferId, OfferValidationError, Partition, TransitionError,
    },
    infra::{OfferBackend, OfferClientError},
    util::settings::Settings,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Validation(#[from] OfferValidationError),
    #[error("{kind} offer {offer_id} is not loaded")]
    OfferNotFound { kind: ListingKind, offer_id: OfferId },
    #[error("{kind} listing {listing_id} is not loaded")]
    ListingNotFound { kind: ListingKind, listing_id: String },
    #[error("remote call failed: {0}")]
    RemoteFailure(#[from] OfferClientError),
}

impl SessionError {
    /// Usage errors are reported but never worth retrying.
    pub fn is_usage_error(&self) -> bool {
        !matches!(self, SessionError::RemoteFailure(_))
    }
}

/// Owns the application state for one user and funnels every mutation
/// through the offer stores.
pub struct OfferSession<B> {
    backend: Arc<B>,
    state: Arc<Mutex<AppState>>,
    cache_ttl: Duration,
    refetch_after_mutation: bool,
}

impl<B> Clone for OfferSession<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            cache_ttl: self.cache_ttl,
            refetch_after_mutation: self.refetch_after_mutation,
        }
    }
}

impl<B: OfferBackend> OfferSession<B> {
    pub fn new(backend: B, settings: &Settings) -> Self {
        Self {
            backend: Arc::new(backend),
            state: Arc::new(Mutex::new(AppState::new(settings.user_id.clone()))),
            cache_ttl: settings.cache_ttl(),
            refetch_after_mutation: settings.refetch_after_mutation,
        }
    }

    /// Read access to the cached state. Do not hold the guard across awaits
    /// on this session.
    pub async fn state(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().await
    }

    /// Drops every cached offer and listing. Loads still in flight
    /// are discarded when they resolve.
    pub async fn clear_cache(&self) {
        self.state.lock().await.clear();
        tracing::info!("offer cache cleared");
    }

    /// Fetches `partition` and replaces its cached contents. A response that
    /// arrives after a newer one for the same partition is discarded.
    pub async fn load(
        &self,
        kind: ListingKind,
        partition: Partition,
    ) -> Result<LoadOutcome, SessionError> {
        let ticket = self.state.lock().await.offers_mut(kind).begin_load(partition.clone());
        tracing::debug!(%kind, %partition, seq = ticket.seq(), "offer load issued");

        match self.backend.list_offers(kind, &partition).await {
            Ok(offers) => {
                let outcome = self.state.lock().await.offers_mut(kind).complete_load(ticket, offers);
                if outcome == LoadOutcome::Stale {
                    tracing::info!(%kind, %partition, "discarded superseded offer load");
                }
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(%kind, %partition, error = %err, "offer load failed");
                let mut state = self.state.lock().await;
                if state.offers(kind).is_current(&ticket) {
                    state
                        .notices
                        .push(NoticeKind::Error, format!("Failed to load {kind} offers: {err}"));
                }
                Err(err.into())
            }
        }
    }

    /// Loads `partition` only when it was never loaded or is older than the
    /// cache TTL. Returns `None` when the cached copy was still fresh.
    pub async fn load_if_stale(
        &self,
        kind: ListingKind,
        partition: Partition,
    ) -> Result<Option<LoadOutcome>, SessionError> {
        let stale = self.state.lock().await.offers(kind).is_stale(&partition, self.cache_ttl);
        if !stale {
            return Ok(None);
        }
        self.load(kind, partition).await.map(Some)
    }

    /// Discards every in-flight load of `partition`, e.g. when the view
    /// showing it goes away.
    pub async fn abandon_loads(&self, kind: ListingKind, partition: &Partition) {
        self.state.lock().await.offers_mut(kind).abandon_loads(partition);
    }

    /// Offers the signed-in user received and sent, for both listing kinds.
    pub async fn load_own_offers(&self) -> Result<(), SessionError> {
        let (inbox, outbox) = {
            let state = self.state.lock().await;
            (state.inbox(), state.outbox())
        };
        for kind in ListingKind::ALL {
            self.load(kind, inbox.clone()).await?;
            self.load(kind, outbox.clone()).await?;
        }
        Ok(())
    }

    pub async fn offers(&self, kind: ListingKind, partition: &Partition) -> Vec<Offer> {
        self.state
            .lock()
            .await
            .offers(kind)
            .offers(partition)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Sends a new offer from the signed-in user and caches the backend's copy.
    pub async fn create_offer(&self, offer: NewOffer) -> Result<Offer, SessionError> {
        offer.validate()?;
        let kind = offer.kind;

        let created = match self.backend.create_offer(&offer).await {
            Ok(created) => created,
            Err(err) => {
                tracing::warn!(%kind, listing_id = %offer.listing_id, error = %err, "offer creation failed");
                self.notify(NoticeKind::Error, format!("Failed to send offer: {err}"))
                    .await;
                return Err(err.into());
            }
        };

        tracing::info!(%kind, offer_id = created.id, listing_id = %created.listing_id, "offer created");
        let mut state = self.state.lock().await;
        state.offers_mut(kind).insert(created.clone());
        state
            .notices
            .push(NoticeKind::Success, format!("Offer sent for {}", created.listing_title));
        Ok(created)
    }

    /// Builds and sends an offer on a cached listing.
    pub async fn make_offer(
        &self,
        kind: ListingKind,
        listing_id: &str,
        price: Option<f64>,
        message: impl Into<String>,
    ) -> Result<Offer, SessionError> {
        let offer = {
            let state = self.state.lock().await;
            let listing = state.listing(kind, listing_id).ok_or_else(|| {
                SessionError::ListingNotFound {
                    kind,
                    listing_id: listing_id.to_string(),
                }
            })?;
            NewOffer::for_listing(listing, state.user_id.clone(), price, message)?
        };
        self.create_offer(offer).await
    }

    /// Validates `action` for the signed-in user, persists the new status and
    /// applies the backend's confirmed status to every cached partition.
    pub async fn transition(
        &self,
        kind: ListingKind,
        offer_id: OfferId,
        action: OfferAction,
    ) -> Result<Offer, SessionError> {
        let requested = {
            let state = self.state.lock().await;
            let offer = state
                .offers(kind)
                .get(offer_id)
                .ok_or(SessionError::OfferNotFound { kind, offer_id })?;
            request_transition(offer, &state.user_id, action).map_err(|err| {
                tracing::info!(%kind, offer_id, %action, error = %err, "offer transition refused");
                err
            })?
        };

        let confirmed = match self
            .backend
            .update_status(kind, offer_id, requested.status)
            .await
        {
            Ok(confirmed) => confirmed,
            Err(err) => {
                tracing::warn!(%kind, offer_id, %action, error = %err, "offer status update failed");
                self.notify(NoticeKind::Error, format!("Failed to {action} offer: {err}"))
                    .await;
                return Err(err.into());
            }
        };

        let partitions = {
            let mut state = self.state.lock().await;
            let store = state.offers_mut(kind);
            store.apply_status_update(offer_id, confirmed.status);
            let partitions: Vec<Partition> =
                store.partitions_containing(offer_id).into_iter().cloned().collect();
            state.notices.push(
                NoticeKind::Success,
                format!("Offer for {} is now {}", confirmed.listing_title, confirmed.status),
            );
            partitions
        };
        tracing::info!(%kind, offer_id, status = %confirmed.status, "offer status changed");

        if self.refetch_after_mutation {
            self.refresh(kind, partitions).await;
        }
        Ok(confirmed)
    }

    pub async fn accept(&self, kind: ListingKind, offer_id: OfferId) -> Result<Offer, SessionError> {
        self.transition(kind, offer_id, OfferAction::Accept).await
    }

    pub async fn reject(&self, kind: ListingKind, offer_id: OfferId) -> Result<Offer, SessionError> {
        self.transition(kind, offer_id, OfferAction::Reject).await
    }

    pub async fn cancel(&self, kind: ListingKind, offer_id: OfferId) -> Result<Offer, SessionError> {
        self.transition(kind, offer_id, OfferAction::Cancel).await
    }

    /// Fetches one offer and folds its status into the cache.
    pub async fn refresh_offer(
        &self,
        kind: ListingKind,
        offer_id: OfferId,
    ) -> Result<Offer, SessionError> {
        let offer = match self.backend.get_offer(kind, offer_id).await {
            Ok(offer) => offer,
            Err(err) => {
                tracing::warn!(%kind, offer_id, error = %err, "offer refresh failed");
                self.notify(
                    NoticeKind::Error,
                    format!("Failed to refresh {kind} offer {offer_id}: {err}"),
                )
                .await;
                return Err(err.into());
            }
        };
        self.state
            .lock()
            .await
            .offers_mut(kind)
            .apply_status_update(offer.id, offer.status);
        Ok(offer)
    }

    pub async fn load_listings(&self, kind: ListingKind) -> Result<Vec<Listing>, SessionError> {
        match self.backend.list_listings(kind).await {
            Ok(listings) => {
                tracing::debug!(%kind, count = listings.len(), "listings loaded");
                self.state.lock().await.set_listings(kind, listings.clone());
                Ok(listings)
            }
            Err(err) => {
                tracing::warn!(%kind, error = %err, "listing load failed");
                let mut state = self.state.lock().await;
                let cached = !state.listings(kind).is_empty();
                if cached {
                    state.notices.push(
                        NoticeKind::Warning,
                        format!("Showing cached {kind} listings; data might be stale."),
                    );
                } else {
                    state
                        .notices
                        .push(NoticeKind::Error, format!("Failed to load {kind} listings: {err}"));
                }
                Err(err.into())
            }
        }
    }

    /// Fetches listings only when the cached copy is missing or older than
    /// the cache TTL. Returns `None` when the cache was still fresh.
    pub async fn load_listings_if_stale(
        &self,
        kind: ListingKind,
    ) -> Result<Option<Vec<Listing>>, SessionError> {
        let stale = self.state.lock().await.listings_stale(kind, self.cache_ttl);
        if !stale {
            return Ok(None);
        }
        self.load_listings(kind).await.map(Some)
    }

    /// Re-fetches after a mutation. Failures only produce a notice; the
    /// mutation itself already succeeded.
    async fn refresh(&self, kind: ListingKind, partitions: Vec<Partition>) {
        for partition in partitions {
            if let Err(err) = self.load(kind, partition.clone()).await {
                tracing::warn!(%kind, %partition, error = %err, "refresh after mutation failed");
            }
        }
    }

    async fn notify(&self, kind: NoticeKind, text: String) {
        self.state.lock().await.notices.push(kind, text);
    }
}
