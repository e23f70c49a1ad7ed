//! Event subscription management.
//!
//! Two tables live here. The server side tracks which remote clients
//! subscribed to which `(service, event)` pair and drives notification
//! fan-out. The client side tracks our own subscriptions: a subscription
//! made before the service is available stays pending and is replayed
//! when availability arrives; pending subscriptions that never activate
//! expire after a grace period.

use ferrobus_types::ServiceKey;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// State of one of our own subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSubState {
    /// Waiting for the service to become available.
    Pending {
        /// When the subscription was requested; drives grace expiry.
        since: Instant,
    },
    /// Subscribe frame sent, acknowledgement outstanding.
    Requested,
    /// Acknowledged by the remote side.
    Active,
}

/// Subscriber and subscription tables.
pub struct SubscriptionManager {
    /// Server side: remote subscriber client ids per (service, event).
    /// Ordered set so fan-out order is deterministic.
    subscribers: Arc<RwLock<HashMap<(ServiceKey, u16), BTreeSet<u16>>>>,
    /// Client side: our own subscriptions per (service, event).
    local: Arc<RwLock<HashMap<(ServiceKey, u16), LocalSubState>>>,
}

impl SubscriptionManager {
    /// Create empty tables.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            local: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // --- server side -----------------------------------------------------

    /// Record a remote subscriber. Returns `true` if it was new.
    pub fn add_subscriber(&self, key: ServiceKey, event: u16, client: u16) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.entry((key, event)).or_default().insert(client)
    }

    /// Remove a remote subscriber. Returns `true` if it was present.
    pub fn remove_subscriber(&self, key: ServiceKey, event: u16, client: u16) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        match subs.get_mut(&(key, event)) {
            Some(set) => {
                let removed = set.remove(&client);
                if set.is_empty() {
                    subs.remove(&(key, event));
                }
                removed
            }
            None => false,
        }
    }

    /// Snapshot of the subscribers of one event.
    pub fn subscribers_of(&self, key: ServiceKey, event: u16) -> Vec<u16> {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        subs.get(&(key, event))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop every subscriber of a withdrawn service.
    pub fn clear_subscribers_of(&self, key: ServiceKey) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.retain(|(k, _), _| *k != key);
    }

    // --- client side -----------------------------------------------------

    /// Record one of our subscriptions. When `available` is true the
    /// subscription is marked `Requested` and the caller must send the
    /// Subscribe frame; otherwise it stays pending until availability.
    /// Returns whether a frame should be sent now. Re-subscribing to the
    /// same event is a no-op.
    pub fn subscribe_local(&self, key: ServiceKey, event: u16, available: bool) -> bool {
        let mut local = self.local.write().unwrap_or_else(|e| e.into_inner());
        if local.contains_key(&(key, event)) {
            return false;
        }
        if available {
            local.insert((key, event), LocalSubState::Requested);
            true
        } else {
            local.insert(
                (key, event),
                LocalSubState::Pending {
                    since: Instant::now(),
                },
            );
            false
        }
    }

    /// Drop one of our subscriptions. Returns `true` if an Unsubscribe
    /// frame should be sent (the remote side knew about it).
    pub fn unsubscribe_local(&self, key: ServiceKey, event: u16) -> bool {
        let mut local = self.local.write().unwrap_or_else(|e| e.into_inner());
        matches!(
            local.remove(&(key, event)),
            Some(LocalSubState::Requested | LocalSubState::Active)
        )
    }

    /// Mark a subscription acknowledged.
    pub fn acknowledge(&self, key: ServiceKey, event: u16) -> bool {
        let mut local = self.local.write().unwrap_or_else(|e| e.into_inner());
        match local.get_mut(&(key, event)) {
            Some(state) if *state == LocalSubState::Requested => {
                *state = LocalSubState::Active;
                true
            }
            _ => false,
        }
    }

    /// The service became available: move its pending subscriptions to
    /// `Requested` and return the event ids whose Subscribe frames must
    /// be sent now.
    pub fn activate_pending(&self, key: ServiceKey) -> Vec<u16> {
        let mut local = self.local.write().unwrap_or_else(|e| e.into_inner());
        let mut events = Vec::new();
        for ((k, event), state) in local.iter_mut() {
            if *k == key && matches!(state, LocalSubState::Pending { .. }) {
                *state = LocalSubState::Requested;
                events.push(*event);
            }
        }
        events.sort_unstable();
        events
    }

    /// The service became unavailable (or the endpoint was lost): demote
    /// its sent subscriptions back to pending with a fresh grace window,
    /// so they are replayed on the next availability.
    pub fn demote_to_pending(&self, key: ServiceKey) {
        let mut local = self.local.write().unwrap_or_else(|e| e.into_inner());
        for ((k, _), state) in local.iter_mut() {
            if *k == key
                && matches!(state, LocalSubState::Requested | LocalSubState::Active)
            {
                *state = LocalSubState::Pending {
                    since: Instant::now(),
                };
            }
        }
    }

    /// Remove pending subscriptions older than the grace period. Returns
    /// the expired (service, event) pairs.
    pub fn expire_pending(&self, now: Instant, grace: Duration) -> Vec<(ServiceKey, u16)> {
        let mut local = self.local.write().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<(ServiceKey, u16)> = local
            .iter()
            .filter_map(|(&(key, event), state)| match state {
                LocalSubState::Pending { since } if now.duration_since(*since) > grace => {
                    Some((key, event))
                }
                _ => None,
            })
            .collect();
        for pair in &expired {
            local.remove(pair);
        }
        expired
    }

    /// Whether an inbound notification for this event is solicited.
    pub fn is_subscribed(&self, key: ServiceKey, event: u16) -> bool {
        let local = self.local.read().unwrap_or_else(|e| e.into_inner());
        matches!(
            local.get(&(key, event)),
            Some(LocalSubState::Requested | LocalSubState::Active)
        )
    }

    /// Drop every server-side subscriber (endpoint loss: they are gone).
    pub fn clear_all_subscribers(&self) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.clear();
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: u16 = 0x8001;

    fn key() -> ServiceKey {
        ServiceKey::new(0x1234, 0x5678)
    }

    #[test]
    fn test_subscriber_add_remove() {
        let manager = SubscriptionManager::new();
        assert!(manager.add_subscriber(key(), EVENT, 7));
        assert!(!manager.add_subscriber(key(), EVENT, 7));
        assert!(manager.add_subscriber(key(), EVENT, 9));
        assert_eq!(manager.subscribers_of(key(), EVENT), vec![7, 9]);

        assert!(manager.remove_subscriber(key(), EVENT, 7));
        assert!(!manager.remove_subscriber(key(), EVENT, 7));
        assert_eq!(manager.subscribers_of(key(), EVENT), vec![9]);
    }

    #[test]
    fn test_clear_subscribers_of_service() {
        let manager = SubscriptionManager::new();
        let other = ServiceKey::new(0x2222, 0x0001);
        manager.add_subscriber(key(), EVENT, 7);
        manager.add_subscriber(other, EVENT, 7);

        manager.clear_subscribers_of(key());
        assert!(manager.subscribers_of(key(), EVENT).is_empty());
        assert_eq!(manager.subscribers_of(other, EVENT), vec![7]);
    }

    #[test]
    fn test_subscribe_when_available_sends_now() {
        let manager = SubscriptionManager::new();
        assert!(manager.subscribe_local(key(), EVENT, true));
        assert!(manager.is_subscribed(key(), EVENT));
        // Duplicate subscribe is a no-op.
        assert!(!manager.subscribe_local(key(), EVENT, true));
    }

    #[test]
    fn test_subscribe_before_available_queues_and_replays() {
        let manager = SubscriptionManager::new();
        assert!(!manager.subscribe_local(key(), EVENT, false));
        // Not yet solicited: nothing was sent.
        assert!(!manager.is_subscribed(key(), EVENT));

        let events = manager.activate_pending(key());
        assert_eq!(events, vec![EVENT]);
        assert!(manager.is_subscribed(key(), EVENT));
        // Activation happens once.
        assert!(manager.activate_pending(key()).is_empty());
    }

    #[test]
    fn test_acknowledge() {
        let manager = SubscriptionManager::new();
        manager.subscribe_local(key(), EVENT, true);
        assert!(manager.acknowledge(key(), EVENT));
        assert!(!manager.acknowledge(key(), EVENT));
        assert!(manager.is_subscribed(key(), EVENT));
    }

    #[test]
    fn test_grace_expiry_drops_pending_only() {
        let manager = SubscriptionManager::new();
        manager.subscribe_local(key(), EVENT, false);
        manager.subscribe_local(key(), EVENT + 1, true);

        let now = Instant::now();
        assert!(manager.expire_pending(now, Duration::from_secs(5)).is_empty());

        let expired = manager.expire_pending(now + Duration::from_secs(6), Duration::from_secs(5));
        assert_eq!(expired, vec![(key(), EVENT)]);
        // The sent subscription survives.
        assert!(manager.is_subscribed(key(), EVENT + 1));
        // Expired subscription is gone for good.
        assert!(manager
            .expire_pending(now + Duration::from_secs(20), Duration::from_secs(5))
            .is_empty());
    }

    #[test]
    fn test_demote_to_pending_replays_on_next_availability() {
        let manager = SubscriptionManager::new();
        manager.subscribe_local(key(), EVENT, true);
        manager.acknowledge(key(), EVENT);

        manager.demote_to_pending(key());
        assert!(!manager.is_subscribed(key(), EVENT));
        assert_eq!(manager.activate_pending(key()), vec![EVENT]);
    }

    #[test]
    fn test_unsubscribe() {
        let manager = SubscriptionManager::new();
        manager.subscribe_local(key(), EVENT, true);
        assert!(manager.unsubscribe_local(key(), EVENT));

        // A pending subscription was never announced remotely.
        manager.subscribe_local(key(), EVENT, false);
        assert!(!manager.unsubscribe_local(key(), EVENT));
    }
}
