//! Client-side cache of offers for one listing kind.
//!
//! Offers are held once in an id-keyed map; partitions only keep ordered id
//! lists. A status update therefore reaches every partition an offer shows
//! up in.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::{Duration, SystemTime},
};

use super::entities::{ListingId, ListingKind, Offer, OfferId, OfferStatus, UserId};

/// Query dimension an offer list was fetched by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    BySender(UserId),
    ByReceiver(UserId),
    ByListing(ListingId),
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::BySender(id) => write!(f, "bySender:{id}"),
            Partition::ByReceiver(id) => write!(f, "byReceiver:{id}"),
            Partition::ByListing(id) => write!(f, "byListing:{id}"),
        }
    }
}

/// Handed out when a partition load is issued; presented again when the
/// response arrives so out-of-order responses can be discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    partition: Partition,
    seq: u64,
}

impl LoadTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer load already landed, or the load was abandoned.
    Stale,
}

#[derive(Clone, Debug, Default)]
struct PartitionEntry {
    ids: Vec<OfferId>,
    fetched_at: Option<SystemTime>,
    /// Responses with a sequence number at or below this are dropped.
    fence: u64,
}

#[derive(Clone, Debug)]
pub struct OfferStore {
    kind: ListingKind,
    offers: HashMap<OfferId, Offer>,
    partitions: HashMap<Partition, PartitionEntry>,
    last_seq: u64,
    /// Tickets up to this sequence number were issued before `clear`.
    cleared_through: u64,
}

impl OfferStore {
    pub fn new(kind: ListingKind) -> Self {
        Self {
            kind,
            offers: HashMap::new(),
            partitions: HashMap::new(),
            last_seq: 0,
            cleared_through: 0,
        }
    }

    pub fn kind(&self) -> ListingKind {
        self.kind
    }

    /// Issues a ticket for a new remote fetch of `partition`.
    pub fn begin_load(&mut self, partition: Partition) -> LoadTicket {
        self.last_seq += 1;
        self.partitions.entry(partition.clone()).or_default();
        LoadTicket {
            partition,
            seq: self.last_seq,
        }
    }

    /// Replaces the partition named by `ticket` with `offers`, unless a newer
    /// response for the same partition was applied in the meantime.
    pub fn complete_load(&mut self, ticket: LoadTicket, offers: Vec<Offer>) -> LoadOutcome {
        let fence = self.fence(&ticket.partition);
        if ticket.seq <= fence {
            tracing::debug!(
                kind = %self.kind,
                partition = %ticket.partition,
                seq = ticket.seq,
                fence,
                "discarding out-of-date offer load"
            );
            return LoadOutcome::Stale;
        }

        let mut ids = Vec::with_capacity(offers.len());
        let mut seen = HashSet::with_capacity(offers.len());
        for offer in offers {
            if offer.kind != self.kind {
                tracing::warn!(
                    store = %self.kind,
                    offer_kind = %offer.kind,
                    offer_id = offer.id,
                    "ignoring offer of another listing kind"
                );
                continue;
            }
            if seen.insert(offer.id) {
                ids.push(offer.id);
            }
            self.offers.insert(offer.id, offer);
        }

        let count = ids.len();
        let entry = self.partitions.entry(ticket.partition.clone()).or_default();
        entry.ids = ids;
        entry.fetched_at = Some(SystemTime::now());
        entry.fence = ticket.seq;
        self.prune();

        tracing::debug!(
            kind = %self.kind,
            partition = %ticket.partition,
            seq = ticket.seq,
            count,
            "offer partition loaded"
        );
        LoadOutcome::Applied
    }

    /// Replaces a partition right away, as if a fetch had just resolved.
    pub fn load(&mut self, partition: Partition, offers: Vec<Offer>) -> LoadOutcome {
        let ticket = self.begin_load(partition);
        self.complete_load(ticket, offers)
    }

    /// Whether a response for `ticket` would still be applied.
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.seq > self.fence(&ticket.partition)
    }

    fn fence(&self, partition: &Partition) -> u64 {
        self.partitions
            .get(partition)
            .map(|entry| entry.fence)
            .unwrap_or(0)
            .max(self.cleared_through)
    }

    /// Drops every load issued for `partition` so far; their responses
    /// will be discarded when they arrive.
    pub fn abandon_loads(&mut self, partition: &Partition) {
        if let Some(entry) = self.partitions.get_mut(partition) {
            entry.fence = self.last_seq;
        }
    }

    /// Sets the status of `offer_id`. Returns `false` when the offer is not
    /// cached.
    pub fn apply_status_update(&mut self, offer_id: OfferId, status: OfferStatus) -> bool {
        match self.offers.get_mut(&offer_id) {
            Some(offer) => {
                offer.status = status;
                true
            }
            None => false,
        }
    }

    /// Adds a freshly created offer to its sender's partition.
    pub fn insert(&mut self, offer: Offer) -> bool {
        if offer.kind != self.kind {
            tracing::warn!(
                store = %self.kind,
                offer_kind = %offer.kind,
                offer_id = offer.id,
                "refusing to insert offer of another listing kind"
            );
            return false;
        }

        let entry = self
            .partitions
            .entry(Partition::BySender(offer.sender_id.clone()))
            .or_default();
        if !entry.ids.contains(&offer.id) {
            entry.ids.push(offer.id);
        }
        self.offers.insert(offer.id, offer);
        true
    }

    pub fn get(&self, offer_id: OfferId) -> Option<&Offer> {
        self.offers.get(&offer_id)
    }

    /// Offers of a partition in fetch order. Empty when never loaded.
    pub fn offers(&self, partition: &Partition) -> Vec<&Offer> {
        self.partitions
            .get(partition)
            .map(|entry| {
                entry
                    .ids
                    .iter()
                    .filter_map(|id| self.offers.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn partitions_containing(&self, offer_id: OfferId) -> Vec<&Partition> {
        self.partitions
            .iter()
            .filter(|(_, entry)| entry.ids.contains(&offer_id))
            .map(|(partition, _)| partition)
            .collect()
    }

    pub fn is_loaded(&self, partition: &Partition) -> bool {
        self.fetched_at(partition).is_some()
    }

    pub fn fetched_at(&self, partition: &Partition) -> Option<SystemTime> {
        self.partitions
            .get(partition)
            .and_then(|entry| entry.fetched_at)
    }

    pub fn is_stale(&self, partition: &Partition, ttl: Duration) -> bool {
        self.fetched_at(partition)
            .map(|time| time.elapsed().map(|elapsed| elapsed > ttl).unwrap_or(true))
            .unwrap_or(true)
    }

    pub fn pending_count(&self, partition: &Partition) -> usize {
        self.offers(partition)
            .into_iter()
            .filter(|offer| offer.is_pending())
            .count()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Empties the cache. Loads issued before this are discarded on arrival.
    pub fn clear(&mut self) {
        self.offers.clear();
        self.partitions.clear();
        self.cleared_through = self.last_seq;
    }

    fn prune(&mut self) {
        let referenced: HashSet<OfferId> = self
            .partitions
            .values()
            .flat_map(|entry| entry.ids.iter().copied())
            .collect();
        self.offers.retain(|id, _| referenced.contains(id));
    }
}
