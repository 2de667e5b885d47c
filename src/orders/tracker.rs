//! In-flight action tracking.
//!
//! Guarantees that a client order id has at most one outstanding
//! reconciliation action at a time, and remembers when that action started so
//! unconfirmed requests can be re-queried after a timeout.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::types::ClientOrderId;

/// Kind of action outstanding against an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightKind {
    /// Place issued, outcome not yet known
    AwaitingAck,
    Amend,
    /// Cancel accepted, waiting for the order feed to confirm
    Cancel,
}

impl std::fmt::Display for InFlightKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingAck => write!(f, "awaiting_ack"),
            Self::Amend => write!(f, "amend"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InFlight {
    pub kind: InFlightKind,
    pub since: Instant,
    /// Whether the order status has already been re-queried once.
    pub requeried: bool,
}

/// Lock-free registry of outstanding actions keyed by client order id.
#[derive(Debug, Default)]
pub struct InFlightTracker {
    actions: DashMap<ClientOrderId, InFlight>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id` for an action. Returns `false` if another action is outstanding.
    pub fn try_begin(&self, id: &ClientOrderId, kind: InFlightKind) -> bool {
        match self.actions.entry(id.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    cl_ord_id = %id,
                    outstanding = %existing.get().kind,
                    requested = %kind,
                    "Action refused, order already has one in flight"
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    kind,
                    since: Instant::now(),
                    requeried: false,
                });
                true
            }
        }
    }

    /// Replaces an `AwaitingAck` claim with a cancel. Used by cancel-all, where
    /// an unconfirmed placement must still be pulled.
    pub fn escalate_to_cancel(&self, id: &ClientOrderId) -> bool {
        match self.actions.entry(id.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().kind == InFlightKind::AwaitingAck {
                    existing.insert(InFlight {
                        kind: InFlightKind::Cancel,
                        since: Instant::now(),
                        requeried: false,
                    });
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    kind: InFlightKind::Cancel,
                    since: Instant::now(),
                    requeried: false,
                });
                true
            }
        }
    }

    pub fn finish(&self, id: &ClientOrderId) {
        self.actions.remove(id);
    }

    pub fn is_in_flight(&self, id: &ClientOrderId) -> bool {
        self.actions.contains_key(id)
    }

    pub fn get(&self, id: &ClientOrderId) -> Option<InFlight> {
        self.actions.get(id).map(|entry| *entry.value())
    }

    pub fn mark_requeried(&self, id: &ClientOrderId) {
        if let Some(mut entry) = self.actions.get_mut(id) {
            entry.requeried = true;
        }
    }

    /// Actions outstanding for longer than `timeout`.
    pub fn expired(&self, timeout: Duration) -> Vec<(ClientOrderId, InFlight)> {
        let now = Instant::now();
        self.actions
            .iter()
            .filter(|entry| now.duration_since(entry.value().since) > timeout)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn ids(&self) -> Vec<ClientOrderId> {
        self.actions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_action_per_id() {
        let tracker = InFlightTracker::new();
        let id = ClientOrderId::new("mm1");

        assert!(tracker.try_begin(&id, InFlightKind::Amend));
        assert!(!tracker.try_begin(&id, InFlightKind::Cancel));
        assert_eq!(tracker.get(&id).map(|f| f.kind), Some(InFlightKind::Amend));

        tracker.finish(&id);
        assert!(tracker.try_begin(&id, InFlightKind::Cancel));
    }

    #[test]
    fn test_escalate_only_from_awaiting_ack() {
        let tracker = InFlightTracker::new();
        let placed = ClientOrderId::new("mm1");
        let amending = ClientOrderId::new("mm2");

        tracker.try_begin(&placed, InFlightKind::AwaitingAck);
        tracker.try_begin(&amending, InFlightKind::Amend);

        assert!(tracker.escalate_to_cancel(&placed));
        assert!(!tracker.escalate_to_cancel(&amending));
        assert_eq!(tracker.get(&placed).map(|f| f.kind), Some(InFlightKind::Cancel));
    }

    #[tokio::test]
    async fn test_expired_after_timeout() {
        tokio::time::pause();
        let tracker = InFlightTracker::new();
        let id = ClientOrderId::new("mm1");
        tracker.try_begin(&id, InFlightKind::AwaitingAck);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(tracker.expired(Duration::from_secs(5)).is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        let expired = tracker.expired(Duration::from_secs(5));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, id);
    }
}
