//! Service registry — tracks offered and remotely known services.
//!
//! The [`ServiceRegistry`] is a thread-safe map from [`ServiceKey`] to
//! [`ServiceRecord`]. It records which services this endpoint offers and
//! which remote services have been requested, together with their
//! availability state. Remote availability transitions happen only
//! through the discovery engine; the registry itself never fires
//! callbacks, it only reports whether a mutation was a real transition.

use chrono::{DateTime, Utc};
use ferrobus_types::ServiceKey;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Whether a record describes a local offer or a remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    /// Offered by this endpoint.
    Offered,
    /// Requested from (and possibly announced by) the remote endpoint.
    Remote,
}

/// One tracked service instance.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    /// The service this record describes.
    pub key: ServiceKey,
    /// Local offer or remote service.
    pub role: ServiceRole,
    /// Current availability. Offered services are available by
    /// definition; remote services become available on a matching offer.
    pub available: bool,
    /// When the last announcement for this service was seen (remote) or
    /// sent (offered). Drives remote liveness expiry.
    pub last_announce: Instant,
    /// When the record was created.
    pub since: DateTime<Utc>,
}

/// Thread-safe registry of all known services.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<ServiceKey, ServiceRecord>>>,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a local offer. Idempotent: returns `true` only when the
    /// key was not already offered.
    pub fn offer(&self, key: ServiceKey) -> bool {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        match services.get(&key) {
            Some(record) if record.role == ServiceRole::Offered => false,
            _ => {
                services.insert(
                    key,
                    ServiceRecord {
                        key,
                        role: ServiceRole::Offered,
                        available: true,
                        last_announce: Instant::now(),
                        since: Utc::now(),
                    },
                );
                true
            }
        }
    }

    /// Withdraw a local offer. Returns `true` if the key was offered.
    pub fn stop_offer(&self, key: ServiceKey) -> bool {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        match services.get(&key) {
            Some(record) if record.role == ServiceRole::Offered => {
                services.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Start tracking a remote service the application requested.
    /// Returns `true` if the key was not already watched.
    pub fn watch(&self, key: ServiceKey) -> bool {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        if services.contains_key(&key) {
            return false;
        }
        services.insert(
            key,
            ServiceRecord {
                key,
                role: ServiceRole::Remote,
                available: false,
                last_announce: Instant::now(),
                since: Utc::now(),
            },
        );
        true
    }

    /// Set the availability of a watched remote service. Returns `true`
    /// only on an actual transition. Called by the discovery engine only.
    pub(crate) fn set_remote_availability(&self, key: ServiceKey, available: bool) -> bool {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        match services.get_mut(&key) {
            Some(record) if record.role == ServiceRole::Remote => {
                if record.available == available {
                    return false;
                }
                record.available = available;
                if available {
                    record.last_announce = Instant::now();
                }
                true
            }
            _ => false,
        }
    }

    /// Reset the liveness timer of a remote service after a repeated
    /// announcement.
    pub(crate) fn refresh_announce(&self, key: ServiceKey) {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = services.get_mut(&key) {
            record.last_announce = Instant::now();
        }
    }

    /// Whether a key is currently available (offered locally, or remote
    /// and announced).
    pub fn is_available(&self, key: ServiceKey) -> bool {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services.get(&key).map(|r| r.available).unwrap_or(false)
    }

    /// Whether a key is offered by this endpoint.
    pub fn is_offered(&self, key: ServiceKey) -> bool {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        matches!(services.get(&key), Some(r) if r.role == ServiceRole::Offered)
    }

    /// Get a snapshot of a record.
    pub fn find(&self, key: ServiceKey) -> Option<ServiceRecord> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services.get(&key).cloned()
    }

    /// All locally offered keys.
    pub fn offered_keys(&self) -> Vec<ServiceKey> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services
            .values()
            .filter(|r| r.role == ServiceRole::Offered)
            .map(|r| r.key)
            .collect()
    }

    /// All watched remote keys that are not currently available.
    pub fn searching_keys(&self) -> Vec<ServiceKey> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services
            .values()
            .filter(|r| r.role == ServiceRole::Remote && !r.available)
            .map(|r| r.key)
            .collect()
    }

    /// Remote keys whose last announcement is older than `ttl`.
    pub(crate) fn stale_remotes(&self, now: Instant, ttl: Duration) -> Vec<ServiceKey> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services
            .values()
            .filter(|r| {
                r.role == ServiceRole::Remote
                    && r.available
                    && now.duration_since(r.last_announce) > ttl
            })
            .map(|r| r.key)
            .collect()
    }

    /// Mark every available remote service unavailable (endpoint loss).
    /// Returns the keys that actually transitioned.
    pub(crate) fn degrade_all_remotes(&self) -> Vec<ServiceKey> {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        let mut degraded = Vec::new();
        for record in services.values_mut() {
            if record.role == ServiceRole::Remote && record.available {
                record.available = false;
                degraded.push(record.key);
            }
        }
        degraded
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ServiceKey {
        ServiceKey::new(0x1234, 0x5678)
    }

    #[test]
    fn test_offer_is_idempotent() {
        let registry = ServiceRegistry::new();
        assert!(registry.offer(key()));
        assert!(!registry.offer(key()));
        assert!(!registry.offer(key()));
        assert_eq!(registry.offered_keys(), vec![key()]);
        assert!(registry.is_available(key()));
        assert!(registry.is_offered(key()));
    }

    #[test]
    fn test_stop_offer() {
        let registry = ServiceRegistry::new();
        registry.offer(key());
        assert!(registry.stop_offer(key()));
        assert!(!registry.stop_offer(key()));
        assert!(!registry.is_available(key()));
        assert!(registry.find(key()).is_none());
    }

    #[test]
    fn test_watch_and_remote_transitions() {
        let registry = ServiceRegistry::new();
        assert!(registry.watch(key()));
        assert!(!registry.watch(key()));
        assert!(!registry.is_available(key()));

        // Only the first transition reports a change.
        assert!(registry.set_remote_availability(key(), true));
        assert!(!registry.set_remote_availability(key(), true));
        assert!(registry.is_available(key()));

        assert!(registry.set_remote_availability(key(), false));
        assert!(!registry.set_remote_availability(key(), false));
        assert_eq!(registry.searching_keys(), vec![key()]);
    }

    #[test]
    fn test_remote_transitions_do_not_touch_offers() {
        let registry = ServiceRegistry::new();
        registry.offer(key());
        assert!(!registry.set_remote_availability(key(), false));
        assert!(registry.is_available(key()));
    }

    #[test]
    fn test_stale_remotes() {
        let registry = ServiceRegistry::new();
        registry.watch(key());
        registry.set_remote_availability(key(), true);

        let now = Instant::now();
        assert!(registry.stale_remotes(now, Duration::from_secs(3)).is_empty());
        let later = now + Duration::from_secs(4);
        assert_eq!(
            registry.stale_remotes(later, Duration::from_secs(3)),
            vec![key()]
        );
    }

    #[test]
    fn test_degrade_all_remotes() {
        let registry = ServiceRegistry::new();
        let other = ServiceKey::new(0x2222, 0x0001);
        registry.watch(key());
        registry.watch(other);
        registry.set_remote_availability(key(), true);

        let mut degraded = registry.degrade_all_remotes();
        degraded.sort_by_key(|k| k.service);
        assert_eq!(degraded, vec![key()]);
        assert!(!registry.is_available(key()));
        // A second pass has nothing left to degrade.
        assert!(registry.degrade_all_remotes().is_empty());
    }
}
