use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use freight_offers::{
    domain::{
        Listing, ListingKind, LoadOutcome, NewOffer, NoticeKind, Offer, OfferAction, OfferId,
        OfferRole, OfferStatus, Partition, TransitionError,
    },
    infra::{OfferBackend, OfferClientError},
    util::settings::Settings,
    OfferSession, SessionError,
};
use time::{macros::datetime, OffsetDateTime};
use tokio::sync::oneshot;

#[derive(Default)]
struct Inner {
    offers: Vec<Offer>,
    listings: Vec<Listing>,
    next_id: OfferId,
    fail: bool,
    list_calls: usize,
    listing_calls: usize,
    update_calls: usize,
    hold: Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>,
}

/// In-memory stand-in for the REST backend. Clones share state so several
/// sessions can talk to the same "server".
#[derive(Clone, Default)]
struct FakeBackend {
    inner: Arc<Mutex<Inner>>,
}

impl FakeBackend {
    fn with_offers(offers: Vec<Offer>) -> Self {
        let backend = Self::default();
        {
            let mut inner = backend.inner.lock().unwrap();
            inner.offers = offers;
            inner.next_id = 100;
        }
        backend
    }

    fn add_listing(&self, listing: Listing) {
        self.inner.lock().unwrap().listings.push(listing);
    }

    fn set_failing(&self, fail: bool) {
        self.inner.lock().unwrap().fail = fail;
    }

    fn set_status(&self, offer_id: OfferId, status: OfferStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(offer) = inner.offers.iter_mut().find(|o| o.id == offer_id) {
            offer.status = status;
        }
    }

    fn status(&self, offer_id: OfferId) -> Option<OfferStatus> {
        let inner = self.inner.lock().unwrap();
        inner.offers.iter().find(|o| o.id == offer_id).map(|o| o.status)
    }

    fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    fn listing_calls(&self) -> usize {
        self.inner.lock().unwrap().listing_calls
    }

    fn update_calls(&self) -> usize {
        self.inner.lock().unwrap().update_calls
    }

    /// The next `list_offers` call takes its snapshot, reports it on the
    /// returned receiver and then waits until the returned sender fires.
    /// Failing the backend while it waits makes that call fail.
    fn hold_next_list(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.inner.lock().unwrap().hold = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    fn unavailable() -> OfferClientError {
        OfferClientError::Status {
            status: 503,
            message: "backend unavailable".into(),
        }
    }
}

#[async_trait]
impl OfferBackend for FakeBackend {
    async fn create_offer(&self, offer: &NewOffer) -> Result<Offer, OfferClientError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail {
            return Err(Self::unavailable());
        }
        inner.next_id += 1;
        let created = Offer {
            id: inner.next_id,
            sender_id: offer.sender_id.clone(),
            receiver_id: offer.receiver_id.clone(),
            kind: offer.kind,
            listing_id: offer.listing_id.clone(),
            listing_title: offer.listing_title.clone(),
            price: offer.price,
            message: offer.message.clone(),
            status: OfferStatus::Pending,
            created_date: OffsetDateTime::now_utc(),
            expiry_date: offer.expiry_date,
        };
        inner.offers.push(created.clone());
        Ok(created)
    }

    async fn update_status(
        &self,
        kind: ListingKind,
        offer_id: OfferId,
        status: OfferStatus,
    ) -> Result<Offer, OfferClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.update_calls += 1;
        if inner.fail {
            return Err(Self::unavailable());
        }
        let offer = inner
            .offers
            .iter_mut()
            .find(|o| o.kind == kind && o.id == offer_id)
            .ok_or(OfferClientError::Status {
                status: 404,
                message: "no such offer".into(),
            })?;
        offer.status = status;
        Ok(offer.clone())
    }

    async fn list_offers(
        &self,
        kind: ListingKind,
        partition: &Partition,
    ) -> Result<Vec<Offer>, OfferClientError> {
        let (snapshot, hold) = {
            let mut inner = self.inner.lock().unwrap();
            inner.list_calls += 1;
            if inner.fail {
                return Err(Self::unavailable());
            }
            let snapshot: Vec<Offer> = inner
                .offers
                .iter()
                .filter(|o| o.kind == kind)
                .filter(|o| match partition {
                    Partition::BySender(id) => &o.sender_id == id,
                    Partition::ByReceiver(id) => &o.receiver_id == id,
                    Partition::ByListing(id) => &o.listing_id == id,
                })
                .cloned()
                .collect();
            (snapshot, inner.hold.take())
        };

        if let Some((entered, release)) = hold {
            let _ = entered.send(());
            let _ = release.await;
            if self.inner.lock().unwrap().fail {
                return Err(Self::unavailable());
            }
        }
        Ok(snapshot)
    }

    async fn get_offer(
        &self,
        kind: ListingKind,
        offer_id: OfferId,
    ) -> Result<Offer, OfferClientError> {
        let inner = self.inner.lock().unwrap();
        inner
            .offers
            .iter()
            .find(|o| o.kind == kind && o.id == offer_id)
            .cloned()
            .ok_or(OfferClientError::Status {
                status: 404,
                message: "no such offer".into(),
            })
    }

    async fn list_listings(&self, kind: ListingKind) -> Result<Vec<Listing>, OfferClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.listing_calls += 1;
        if inner.fail {
            return Err(Self::unavailable());
        }
        Ok(inner
            .listings
            .iter()
            .filter(|l| l.kind == kind)
            .cloned()
            .collect())
    }
}

fn offer(id: OfferId, sender: &str, receiver: &str, listing: &str) -> Offer {
    Offer {
        id,
        sender_id: sender.into(),
        receiver_id: receiver.into(),
        kind: ListingKind::Cargo,
        listing_id: listing.into(),
        listing_title: format!("Cargo {listing}"),
        price: Some(1000.0),
        message: "Can pick up tomorrow".into(),
        status: OfferStatus::Pending,
        created_date: datetime!(2024-07-01 12:00 UTC),
        expiry_date: None,
    }
}

fn cargo_listing(id: &str, owner: &str) -> Listing {
    Listing {
        id: id.into(),
        kind: ListingKind::Cargo,
        owner_id: owner.into(),
        title: format!("Cargo {id}"),
        origin_city: Some("Lyon".into()),
        origin_country: Some("France".into()),
        destination_city: Some("Milan".into()),
        destination_country: Some("Italy".into()),
        weight_kg: Some(8000.0),
        price: Some(1200.0),
        created_date: datetime!(2024-07-01 08:00 UTC),
    }
}

fn settings(user: &str) -> Settings {
    Settings {
        user_id: user.into(),
        refetch_after_mutation: false,
        ..Settings::default()
    }
}

fn status_in(offers: &[Offer], id: OfferId) -> Option<OfferStatus> {
    offers.iter().find(|o| o.id == id).map(|o| o.status)
}

#[tokio::test]
async fn receiver_rejects_offer_in_every_partition() {
    let backend = FakeBackend::with_offers(vec![
        offer(1, "A", "B", "c-1"),
        offer(2, "C", "B", "c-1"),
    ]);
    let session = OfferSession::new(backend.clone(), &settings("B"));
    let inbox = Partition::ByReceiver("B".into());
    let by_listing = Partition::ByListing("c-1".into());

    session.load(ListingKind::Cargo, inbox.clone()).await.unwrap();
    session.load(ListingKind::Cargo, by_listing.clone()).await.unwrap();

    let rejected = session.reject(ListingKind::Cargo, 1).await.unwrap();
    assert_eq!(rejected.status, OfferStatus::Rejected);
    assert_eq!(backend.status(1), Some(OfferStatus::Rejected));

    for partition in [&inbox, &by_listing] {
        let offers = session.offers(ListingKind::Cargo, partition).await;
        assert_eq!(status_in(&offers, 1), Some(OfferStatus::Rejected));
        assert_eq!(status_in(&offers, 2), Some(OfferStatus::Pending));
    }

    let state = session.state().await;
    assert_eq!(state.notices.latest().map(|n| n.kind), Some(NoticeKind::Success));
}

#[tokio::test]
async fn accepted_offer_cannot_be_cancelled() {
    let backend = FakeBackend::with_offers(vec![offer(1, "A", "B", "c-1")]);
    let receiver = OfferSession::new(backend.clone(), &settings("B"));
    let sender = OfferSession::new(backend.clone(), &settings("A"));

    receiver.load_own_offers().await.unwrap();
    let accepted = receiver.accept(ListingKind::Cargo, 1).await.unwrap();
    assert_eq!(accepted.status, OfferStatus::Accepted);

    sender.load_own_offers().await.unwrap();
    let updates_before = backend.update_calls();
    let err = sender.cancel(ListingKind::Cargo, 1).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Transition(TransitionError::InvalidTransition {
            offer_id: 1,
            from: OfferStatus::Accepted,
            action: OfferAction::Cancel,
        })
    ));
    assert!(err.is_usage_error());
    assert_eq!(backend.update_calls(), updates_before);
    assert_eq!(backend.status(1), Some(OfferStatus::Accepted));
}

#[tokio::test]
async fn sender_cannot_accept_own_offer() {
    let backend = FakeBackend::with_offers(vec![offer(2, "A", "B", "c-2")]);
    let sender = OfferSession::new(backend.clone(), &settings("A"));
    sender.load_own_offers().await.unwrap();

    let err = sender.accept(ListingKind::Cargo, 2).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Transition(TransitionError::Unauthorized {
            required: OfferRole::Receiver,
            ..
        })
    ));
    assert_eq!(backend.update_calls(), 0);
    assert_eq!(backend.status(2), Some(OfferStatus::Pending));
}

#[tokio::test]
async fn remote_failure_is_reported_and_not_applied() {
    let backend = FakeBackend::with_offers(vec![offer(3, "A", "B", "c-3")]);
    let session = OfferSession::new(backend.clone(), &settings("B"));
    session.load_own_offers().await.unwrap();

    backend.set_failing(true);
    let err = session.accept(ListingKind::Cargo, 3).await.unwrap_err();
    assert!(matches!(err, SessionError::RemoteFailure(_)));
    assert!(!err.is_usage_error());
    assert_eq!(backend.update_calls(), 1, "no automatic retry");

    let state = session.state().await;
    let notice = state.notices.latest().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert!(notice.text.contains("accept"));
    assert_eq!(
        state.offers(ListingKind::Cargo).get(3).map(|o| o.status),
        Some(OfferStatus::Pending)
    );
}

#[tokio::test]
async fn failed_load_keeps_previous_partition() {
    let backend = FakeBackend::with_offers(vec![offer(4, "A", "B", "c-4")]);
    let session = OfferSession::new(backend.clone(), &settings("B"));
    let inbox = Partition::ByReceiver("B".into());
    session.load(ListingKind::Cargo, inbox.clone()).await.unwrap();

    backend.set_failing(true);
    let err = session.load(ListingKind::Cargo, inbox.clone()).await.unwrap_err();
    assert!(matches!(err, SessionError::RemoteFailure(_)));
    assert_eq!(session.offers(ListingKind::Cargo, &inbox).await.len(), 1);
}

#[tokio::test]
async fn superseded_load_response_is_discarded() {
    let backend = FakeBackend::with_offers(vec![offer(5, "A", "B", "c-5")]);
    let session = OfferSession::new(backend.clone(), &settings("B"));
    let inbox = Partition::ByReceiver("B".into());

    let (entered, release) = backend.hold_next_list();
    let slow = {
        let session = session.clone();
        let inbox = inbox.clone();
        tokio::spawn(async move { session.load(ListingKind::Cargo, inbox).await })
    };
    entered.await.unwrap();

    backend.set_status(5, OfferStatus::Expired);
    let fast = session.load(ListingKind::Cargo, inbox.clone()).await.unwrap();
    assert_eq!(fast, LoadOutcome::Applied);

    release.send(()).unwrap();
    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow, LoadOutcome::Stale);

    let offers = session.offers(ListingKind::Cargo, &inbox).await;
    assert_eq!(status_in(&offers, 5), Some(OfferStatus::Expired));
}

#[tokio::test]
async fn abandoned_load_is_discarded() {
    let backend = FakeBackend::with_offers(vec![offer(6, "A", "B", "c-6")]);
    let session = OfferSession::new(backend.clone(), &settings("B"));
    let by_listing = Partition::ByListing("c-6".into());

    let (entered, release) = backend.hold_next_list();
    let pending = {
        let session = session.clone();
        let partition = by_listing.clone();
        tokio::spawn(async move { session.load(ListingKind::Cargo, partition).await })
    };
    entered.await.unwrap();
    session.abandon_loads(ListingKind::Cargo, &by_listing).await;
    release.send(()).unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), LoadOutcome::Stale);
    assert!(session.offers(ListingKind::Cargo, &by_listing).await.is_empty());
}

#[tokio::test]
async fn offer_made_on_listing_lands_in_outbox() {
    let backend = FakeBackend::with_offers(Vec::new());
    backend.add_listing(Listing {
        id: "v-9".into(),
        kind: ListingKind::Vehicle,
        owner_id: "carrier-1".into(),
        title: "Curtainsider, Rotterdam".into(),
        origin_city: Some("Rotterdam".into()),
        origin_country: Some("Netherlands".into()),
        destination_city: None,
        destination_country: None,
        weight_kg: Some(24000.0),
        price: None,
        created_date: datetime!(2024-07-02 06:00 UTC),
    });
    let session = OfferSession::new(backend.clone(), &settings("shipper-1"));

    let missing = session
        .make_offer(ListingKind::Vehicle, "v-9", None, "Need it Friday")
        .await
        .unwrap_err();
    assert!(matches!(missing, SessionError::ListingNotFound { .. }));

    session.load_listings(ListingKind::Vehicle).await.unwrap();
    let created = session
        .make_offer(ListingKind::Vehicle, "v-9", None, "Need it Friday")
        .await
        .unwrap();
    assert_eq!(created.receiver_id, "carrier-1");
    assert_eq!(created.status, OfferStatus::Pending);

    let outbox = Partition::BySender("shipper-1".into());
    let sent = session.offers(ListingKind::Vehicle, &outbox).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, created.id);
    assert!(session.offers(ListingKind::Cargo, &outbox).await.is_empty());
}

#[tokio::test]
async fn invalid_offer_is_rejected_before_the_backend() {
    let backend = FakeBackend::with_offers(Vec::new());
    let session = OfferSession::new(backend.clone(), &settings("A"));
    let bad = NewOffer {
        sender_id: "A".into(),
        receiver_id: "B".into(),
        kind: ListingKind::Cargo,
        listing_id: "c-1".into(),
        listing_title: "Cargo c-1".into(),
        price: Some(-5.0),
        message: "cheap".into(),
        expiry_date: None,
    };
    let err = session.create_offer(bad).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert!(backend.inner.lock().unwrap().offers.is_empty());
}

#[tokio::test]
async fn status_change_refetches_affected_partitions() {
    let backend = FakeBackend::with_offers(vec![offer(7, "A", "B", "c-7")]);
    let session = OfferSession::new(
        backend.clone(),
        &Settings {
            refetch_after_mutation: true,
            ..settings("B")
        },
    );
    let inbox = Partition::ByReceiver("B".into());
    session.load(ListingKind::Cargo, inbox.clone()).await.unwrap();
    let calls = backend.list_calls();

    session.accept(ListingKind::Cargo, 7).await.unwrap();
    assert_eq!(backend.list_calls(), calls + 1);
    let offers = session.offers(ListingKind::Cargo, &inbox).await;
    assert_eq!(status_in(&offers, 7), Some(OfferStatus::Accepted));
}

#[tokio::test]
async fn unknown_offer_is_not_found() {
    let backend = FakeBackend::with_offers(Vec::new());
    let session = OfferSession::new(backend, &settings("B"));
    let err = session.accept(ListingKind::Vehicle, 42).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::OfferNotFound {
            kind: ListingKind::Vehicle,
            offer_id: 42
        }
    ));
}

#[tokio::test]
async fn fresh_partition_is_not_reloaded() {
    let backend = FakeBackend::with_offers(vec![offer(8, "A", "B", "c-8")]);
    let session = OfferSession::new(backend.clone(), &settings("B"));
    let inbox = Partition::ByReceiver("B".into());

    assert_eq!(
        session.load_if_stale(ListingKind::Cargo, inbox.clone()).await.unwrap(),
        Some(LoadOutcome::Applied)
    );
    assert_eq!(
        session.load_if_stale(ListingKind::Cargo, inbox).await.unwrap(),
        None
    );
    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test]
async fn refresh_offer_picks_up_backend_expiry() {
    let backend = FakeBackend::with_offers(vec![offer(9, "A", "B", "c-9")]);
    let session = OfferSession::new(backend.clone(), &settings("A"));
    session.load_own_offers().await.unwrap();

    backend.set_status(9, OfferStatus::Expired);
    let refreshed = session.refresh_offer(ListingKind::Cargo, 9).await.unwrap();
    assert_eq!(refreshed.status, OfferStatus::Expired);

    let outbox = Partition::BySender("A".into());
    let offers = session.offers(ListingKind::Cargo, &outbox).await;
    assert_eq!(status_in(&offers, 9), Some(OfferStatus::Expired));
}

#[tokio::test]
async fn failed_refresh_is_reported() {
    let backend = FakeBackend::with_offers(vec![offer(10, "A", "B", "c-10")]);
    let session = OfferSession::new(backend.clone(), &settings("B"));
    session.load_own_offers().await.unwrap();

    let err = session.refresh_offer(ListingKind::Cargo, 999).await.unwrap_err();
    assert!(matches!(err, SessionError::RemoteFailure(_)));

    let state = session.state().await;
    let notice = state.notices.latest().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert!(notice.text.contains("999"));
}

#[tokio::test]
async fn failure_of_abandoned_load_is_silent() {
    let backend = FakeBackend::with_offers(vec![offer(11, "A", "B", "c-11")]);
    let session = OfferSession::new(backend.clone(), &settings("B"));
    let by_listing = Partition::ByListing("c-11".into());

    let (entered, release) = backend.hold_next_list();
    let pending = {
        let session = session.clone();
        let partition = by_listing.clone();
        tokio::spawn(async move { session.load(ListingKind::Cargo, partition).await })
    };
    entered.await.unwrap();
    session.abandon_loads(ListingKind::Cargo, &by_listing).await;
    backend.set_failing(true);
    release.send(()).unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::RemoteFailure(_)));
    assert!(session.state().await.notices.is_empty());
}

#[tokio::test]
async fn clearing_cache_discards_in_flight_load() {
    let backend = FakeBackend::with_offers(vec![offer(12, "A", "B", "c-12")]);
    backend.add_listing(cargo_listing("c-12", "B"));
    let session = OfferSession::new(backend.clone(), &settings("B"));
    let inbox = Partition::ByReceiver("B".into());
    session.load_listings(ListingKind::Cargo).await.unwrap();

    let (entered, release) = backend.hold_next_list();
    let pending = {
        let session = session.clone();
        let inbox = inbox.clone();
        tokio::spawn(async move { session.load(ListingKind::Cargo, inbox).await })
    };
    entered.await.unwrap();
    session.clear_cache().await;
    release.send(()).unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), LoadOutcome::Stale);
    let state = session.state().await;
    assert!(state.offers(ListingKind::Cargo).is_empty());
    assert!(!state.offers(ListingKind::Cargo).is_loaded(&inbox));
    assert!(state.listings(ListingKind::Cargo).is_empty());
}

#[tokio::test]
async fn fresh_listings_are_not_refetched() {
    let backend = FakeBackend::with_offers(Vec::new());
    backend.add_listing(cargo_listing("c-13", "B"));
    let session = OfferSession::new(backend.clone(), &settings("A"));

    let first = session
        .load_listings_if_stale(ListingKind::Cargo)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(
        session.load_listings_if_stale(ListingKind::Cargo).await.unwrap(),
        None
    );
    assert_eq!(backend.listing_calls(), 1);

    session.clear_cache().await;
    assert!(session
        .load_listings_if_stale(ListingKind::Cargo)
        .await
        .unwrap()
        .is_some());
    assert_eq!(backend.listing_calls(), 2);
}

#[tokio::test]
async fn failed_listing_reload_warns_and_keeps_cache() {
    let backend = FakeBackend::with_offers(Vec::new());
    backend.add_listing(cargo_listing("c-14", "B"));
    let session = OfferSession::new(backend.clone(), &settings("A"));
    session.load_listings(ListingKind::Cargo).await.unwrap();

    backend.set_failing(true);
    let err = session.load_listings(ListingKind::Cargo).await.unwrap_err();
    assert!(matches!(err, SessionError::RemoteFailure(_)));

    let state = session.state().await;
    assert_eq!(state.notices.latest().map(|n| n.kind), Some(NoticeKind::Warning));
    assert_eq!(state.listings(ListingKind::Cargo).len(), 1);
    assert!(state.listing(ListingKind::Cargo, "c-14").is_some());
}

#[tokio::test]
async fn first_listing_load_failure_is_an_error() {
    let backend = FakeBackend::with_offers(Vec::new());
    backend.set_failing(true);
    let session = OfferSession::new(backend.clone(), &settings("A"));

    let err = session.load_listings(ListingKind::Vehicle).await.unwrap_err();
    assert!(matches!(err, SessionError::RemoteFailure(_)));

    let state = session.state().await;
    assert_eq!(state.notices.latest().map(|n| n.kind), Some(NoticeKind::Error));
    assert!(state.listings(ListingKind::Vehicle).is_empty());
}
