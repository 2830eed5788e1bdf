//! Offer status transitions and who may request them.
//!
//! Everything here is pure: callers persist the returned offer and feed the
//! confirmed status back into the store.

use std::fmt;

use thiserror::Error;

use super::entities::{Offer, OfferId, OfferStatus, UserId};

/// Status changes a user can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OfferAction {
    Accept,
    Reject,
    Cancel,
}

/// Which side of an offer an action belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferRole {
    Sender,
    Receiver,
}

impl OfferAction {
    pub const ALL: [OfferAction; 3] = [OfferAction::Accept, OfferAction::Reject, OfferAction::Cancel];

    pub fn name(&self) -> &'static str {
        match self {
            OfferAction::Accept => "accept",
            OfferAction::Reject => "reject",
            OfferAction::Cancel => "cancel",
        }
    }

    pub fn required_role(&self) -> OfferRole {
        match self {
            OfferAction::Accept | OfferAction::Reject => OfferRole::Receiver,
            OfferAction::Cancel => OfferRole::Sender,
        }
    }

    pub fn target_status(&self) -> OfferStatus {
        match self {
            OfferAction::Accept => OfferStatus::Accepted,
            OfferAction::Reject => OfferStatus::Rejected,
            OfferAction::Cancel => OfferStatus::Cancelled,
        }
    }
}

impl fmt::Display for OfferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for OfferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferRole::Sender => f.write_str("sender"),
            OfferRole::Receiver => f.write_str("receiver"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("offer {offer_id} is {from} and cannot {action}")]
    InvalidTransition {
        offer_id: OfferId,
        from: OfferStatus,
        action: OfferAction,
    },
    #[error("user {acting_user} is not the {required} of offer {offer_id} and cannot {action}")]
    Unauthorized {
        offer_id: OfferId,
        acting_user: UserId,
        required: OfferRole,
        action: OfferAction,
    },
}

/// Returns the role `user_id` plays on `offer`, if any.
pub fn role_of(offer: &Offer, user_id: &str) -> Option<OfferRole> {
    if offer.sender_id == user_id {
        Some(OfferRole::Sender)
    } else if offer.receiver_id == user_id {
        Some(OfferRole::Receiver)
    } else {
        None
    }
}

/// Validates `action` by `acting_user_id` against `offer` and returns the
/// offer with its new status. The status check runs first, so a settled
/// offer reports `InvalidTransition` no matter who asks.
pub fn request_transition(
    offer: &Offer,
    acting_user_id: &str,
    action: OfferAction,
) -> Result<Offer, TransitionError> {
    let next = action.target_status();
    if !offer.status.can_transition_to(next) {
        return Err(TransitionError::InvalidTransition {
            offer_id: offer.id,
            from: offer.status,
            action,
        });
    }

    let required = action.required_role();
    if role_of(offer, acting_user_id) != Some(required) {
        return Err(TransitionError::Unauthorized {
            offer_id: offer.id,
            acting_user: acting_user_id.to_string(),
            required,
            action,
        });
    }

    tracing::debug!(
        offer_id = offer.id,
        kind = %offer.kind,
        from = %offer.status,
        to = %next,
        "offer transition validated"
    );

    let mut updated = offer.clone();
    updated.status = next;
    Ok(updated)
}

/// Actions `user_id` could currently take on `offer`.
pub fn available_actions(offer: &Offer, user_id: &str) -> Vec<OfferAction> {
    OfferAction::ALL
        .into_iter()
        .filter(|action| request_transition(offer, user_id, *action).is_ok())
        .collect()
}
