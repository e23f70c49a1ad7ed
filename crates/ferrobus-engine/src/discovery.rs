//! Discovery protocol engine.
//!
//! Drives the announce/find cycle: offered services are announced on
//! offer/withdraw and re-announced every interval; watched services are
//! searched every interval until found. A remote service whose offer is
//! not repeated within [`LIVENESS_MULTIPLIER`] intervals loses liveness
//! and drops back to searching.
//!
//! Remote state cycles `Unknown -> Searching -> Available -> Unavailable
//! -> Searching`; every transition goes through here, and the caller
//! fires the availability callback exactly once per reported transition.

use crate::registry::{ServiceRegistry, ServiceRole};
use ferrobus_types::ServiceKey;
use ferrobus_wire::Message;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A remote service is stale after this many missed announce intervals.
const LIVENESS_MULTIPLIER: u32 = 3;

/// Frames and transitions produced by one periodic tick.
#[derive(Debug, Default)]
pub struct TickOutput {
    /// Announcements and searches to put on the wire.
    pub frames: Vec<Message>,
    /// Remote keys that lost liveness this tick (now Unavailable).
    pub lost: Vec<ServiceKey>,
}

/// The announce/find state machine.
pub struct DiscoveryEngine {
    registry: ServiceRegistry,
    announce_interval: Duration,
}

impl DiscoveryEngine {
    /// Create a discovery engine over the shared registry.
    pub fn new(registry: ServiceRegistry, announce_interval: Duration) -> Self {
        Self {
            registry,
            announce_interval,
        }
    }

    /// Liveness deadline for remote offers.
    fn ttl(&self) -> Duration {
        self.announce_interval * LIVENESS_MULTIPLIER
    }

    /// One periodic tick: expire stale remotes, then collect the
    /// announcements and searches due this cycle.
    pub fn tick(&self, now: Instant) -> TickOutput {
        let mut output = TickOutput::default();

        for key in self.registry.stale_remotes(now, self.ttl()) {
            if self.registry.set_remote_availability(key, false) {
                info!(service = %key, "Remote service lost liveness");
                output.lost.push(key);
            }
        }

        for key in self.registry.offered_keys() {
            output.frames.push(Message::offer(key));
        }
        for key in self.registry.searching_keys() {
            output.frames.push(Message::find(key));
        }

        output
    }

    /// Handle a remote `OfferService`.
    ///
    /// Returns `true` when this is a Searching -> Available transition
    /// for a watched key. Repeated offers only refresh the liveness
    /// timer; offers for keys nobody requested are ignored.
    pub fn on_offer(&self, key: ServiceKey) -> bool {
        if self.registry.set_remote_availability(key, true) {
            info!(service = %key, "Remote service available");
            true
        } else if matches!(self.registry.find(key), Some(r) if r.role == ServiceRole::Remote) {
            self.registry.refresh_announce(key);
            debug!(service = %key, "Repeated offer, liveness refreshed");
            false
        } else {
            debug!(service = %key, "Ignoring offer for unrequested service");
            false
        }
    }

    /// Handle a remote `StopOfferService`. Returns `true` on an
    /// Available -> Unavailable transition.
    pub fn on_stop_offer(&self, key: ServiceKey) -> bool {
        if self.registry.set_remote_availability(key, false) {
            info!(service = %key, "Remote service withdrawn");
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrobus_wire::MessageType;

    fn key() -> ServiceKey {
        ServiceKey::new(0x1234, 0x5678)
    }

    fn engine() -> DiscoveryEngine {
        DiscoveryEngine::new(ServiceRegistry::new(), Duration::from_secs(1))
    }

    #[test]
    fn test_tick_announces_offers_and_finds() {
        let discovery = engine();
        let wanted = ServiceKey::new(0x2222, 0x0001);
        discovery.registry.offer(key());
        discovery.registry.watch(wanted);

        let output = discovery.tick(Instant::now());
        assert!(output.lost.is_empty());
        let kinds: Vec<(MessageType, ServiceKey)> =
            output.frames.iter().map(|m| (m.kind, m.key)).collect();
        assert!(kinds.contains(&(MessageType::OfferService, key())));
        assert!(kinds.contains(&(MessageType::FindService, wanted)));
    }

    #[test]
    fn test_found_service_is_not_searched_again() {
        let discovery = engine();
        discovery.registry.watch(key());
        assert!(discovery.on_offer(key()));

        let output = discovery.tick(Instant::now());
        assert!(output
            .frames
            .iter()
            .all(|m| m.kind != MessageType::FindService));
    }

    #[test]
    fn test_offer_transition_fires_once() {
        let discovery = engine();
        discovery.registry.watch(key());

        assert!(discovery.on_offer(key()));
        // Repeated offers refresh liveness without a transition.
        assert!(!discovery.on_offer(key()));
        assert!(!discovery.on_offer(key()));
        assert!(discovery.registry.is_available(key()));
    }

    #[test]
    fn test_unsolicited_offer_is_ignored() {
        let discovery = engine();
        assert!(!discovery.on_offer(key()));
        assert!(!discovery.registry.is_available(key()));
    }

    #[test]
    fn test_liveness_expiry_returns_to_searching() {
        let discovery = engine();
        discovery.registry.watch(key());
        discovery.on_offer(key());

        // Within 3 intervals nothing expires.
        let output = discovery.tick(Instant::now() + Duration::from_secs(2));
        assert!(output.lost.is_empty());

        let output = discovery.tick(Instant::now() + Duration::from_secs(4));
        assert_eq!(output.lost, vec![key()]);
        // The key is searched again on the same tick.
        assert!(output
            .frames
            .iter()
            .any(|m| m.kind == MessageType::FindService && m.key == key()));

        // A fresh offer brings it back exactly once.
        assert!(discovery.on_offer(key()));
    }

    #[test]
    fn test_stop_offer_transition() {
        let discovery = engine();
        discovery.registry.watch(key());
        discovery.on_offer(key());

        assert!(discovery.on_stop_offer(key()));
        assert!(!discovery.on_stop_offer(key()));
        assert!(!discovery.registry.is_available(key()));
    }
}
