//! Request/response correlation.
//!
//! Outgoing requests are stamped with a session id and tracked in a
//! pending table until the matching response arrives, the deadline
//! passes, or the caller cancels. Whichever happens first wins: the
//! completion channel fires at most once, and a session id is recycled
//! only after its entry is removed.

use bytes::Bytes;
use dashmap::DashMap;
use ferrobus_types::{EngineError, ServiceKey};
use ferrobus_wire::{Message, MessageType, ReturnCode};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// How a pending request resolved.
pub type RequestOutcome = Result<Bytes, EngineError>;

/// A request awaiting its response.
struct PendingRequest {
    key: ServiceKey,
    method: u16,
    deadline: Instant,
    timeout: Duration,
    tx: oneshot::Sender<RequestOutcome>,
}

/// Pending-request table plus the session id allocator.
pub struct Correlator {
    pending: DashMap<u16, PendingRequest>,
    next_session: AtomicU16,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_session: AtomicU16::new(1),
        }
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Allocate a session id that is neither zero nor in flight.
    fn allocate(&self) -> Option<u16> {
        for _ in 0..=u16::MAX as u32 {
            let id = self.next_session.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !self.pending.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    /// Register a new pending request. Returns the allocated session id
    /// and the completion channel it resolves through.
    pub fn register(
        &self,
        key: ServiceKey,
        method: u16,
        timeout: Duration,
    ) -> Result<(u16, oneshot::Receiver<RequestOutcome>), EngineError> {
        let session = self.allocate().ok_or(EngineError::SessionsExhausted)?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            session,
            PendingRequest {
                key,
                method,
                deadline: Instant::now() + timeout,
                timeout,
                tx,
            },
        );
        Ok((session, rx))
    }

    /// Resolve a pending request from an inbound response.
    ///
    /// Returns `false` for a session id with no pending entry (late,
    /// duplicate, or unknown) — the caller reports it as stale, nothing
    /// else happens.
    pub fn resolve(&self, response: &Message) -> bool {
        let Some((_, pending)) = self.pending.remove(&response.session) else {
            return false;
        };
        let outcome = if response.kind == MessageType::Error
            || response.return_code != ReturnCode::Ok
        {
            Err(EngineError::Remote {
                code: response.return_code.to_byte(),
            })
        } else {
            Ok(response.payload.clone())
        };
        let _ = pending.tx.send(outcome);
        true
    }

    /// Cancel an in-flight request before its deadline. Removing the
    /// entry also suppresses any late response for this session.
    pub fn cancel(&self, session: u16) -> bool {
        let Some((_, pending)) = self.pending.remove(&session) else {
            return false;
        };
        debug!(session, key = %pending.key, "Request cancelled");
        let _ = pending.tx.send(Err(EngineError::Cancelled));
        true
    }

    /// Fail every request whose deadline has passed. Returns the expired
    /// session ids.
    pub fn sweep(&self, now: Instant) -> Vec<u16> {
        let expired: Vec<u16> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut swept = Vec::with_capacity(expired.len());
        for session in expired {
            if let Some((_, pending)) = self.pending.remove(&session) {
                debug!(
                    session,
                    key = %pending.key,
                    method = pending.method,
                    "Request timed out"
                );
                let _ = pending.tx.send(Err(EngineError::Timeout(pending.timeout)));
                swept.push(session);
            }
        }
        swept
    }

    /// Fail every in-flight request with `EndpointLost`.
    pub fn fail_all(&self) -> usize {
        let sessions: Vec<u16> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for session in sessions {
            if let Some((_, pending)) = self.pending.remove(&session) {
                let _ = pending.tx.send(Err(EngineError::EndpointLost));
                failed += 1;
            }
        }
        failed
    }
}

impl Default for Correlator {
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

    fn response_for(session: u16) -> Message {
        let request = Message::request(key(), 0x0421, 1, session, Bytes::new());
        Message::response(&request, Bytes::from_static(b"pong"))
    }

    #[test]
    fn test_register_and_resolve() {
        let correlator = Correlator::new();
        let (session, rx) = correlator
            .register(key(), 0x0421, Duration::from_secs(5))
            .unwrap();
        assert_eq!(correlator.in_flight(), 1);

        assert!(correlator.resolve(&response_for(session)));
        assert_eq!(correlator.in_flight(), 0);
        assert_eq!(rx.blocking_recv().unwrap().unwrap(), Bytes::from_static(b"pong"));
    }

    #[test]
    fn test_unknown_session_is_stale() {
        let correlator = Correlator::new();
        assert!(!correlator.resolve(&response_for(0x7777)));
    }

    #[test]
    fn test_session_ids_are_unique_while_pending() {
        let correlator = Correlator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let (session, _rx) = correlator
                .register(key(), 1, Duration::from_secs(60))
                .unwrap();
            assert_ne!(session, 0);
            assert!(seen.insert(session), "session {session} reused while pending");
        }
    }

    #[test]
    fn test_allocator_skips_in_flight_ids() {
        let correlator = Correlator::new();
        let (first, _rx) = correlator
            .register(key(), 1, Duration::from_secs(60))
            .unwrap();
        // Force the counter to revisit the in-flight id.
        correlator.next_session.store(first, Ordering::Relaxed);
        let (second, _rx2) = correlator
            .register(key(), 1, Duration::from_secs(60))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_sweep_times_out_expired_only() {
        let correlator = Correlator::new();
        let (short, short_rx) = correlator
            .register(key(), 1, Duration::from_millis(10))
            .unwrap();
        let (_long, mut long_rx) = correlator
            .register(key(), 2, Duration::from_secs(60))
            .unwrap();

        let swept = correlator.sweep(Instant::now() + Duration::from_millis(20));
        assert_eq!(swept, vec![short]);
        assert_eq!(correlator.in_flight(), 1);

        assert!(matches!(
            short_rx.blocking_recv().unwrap(),
            Err(EngineError::Timeout(_))
        ));
        // The long request is still pending and unresolved.
        assert!(long_rx.try_recv().is_err());
    }

    #[test]
    fn test_first_resolution_wins() {
        let correlator = Correlator::new();
        let (session, rx) = correlator
            .register(key(), 1, Duration::from_millis(10))
            .unwrap();

        // Timeout fires first...
        let swept = correlator.sweep(Instant::now() + Duration::from_secs(1));
        assert_eq!(swept, vec![session]);
        // ...so the late response is stale and resolves nothing.
        assert!(!correlator.resolve(&response_for(session)));
        assert!(matches!(
            rx.blocking_recv().unwrap(),
            Err(EngineError::Timeout(_))
        ));
    }

    #[test]
    fn test_cancel_suppresses_late_response() {
        let correlator = Correlator::new();
        let (session, rx) = correlator
            .register(key(), 1, Duration::from_secs(60))
            .unwrap();

        assert!(correlator.cancel(session));
        assert!(!correlator.cancel(session));
        assert!(!correlator.resolve(&response_for(session)));
        assert!(matches!(
            rx.blocking_recv().unwrap(),
            Err(EngineError::Cancelled)
        ));
    }

    #[test]
    fn test_error_response_carries_return_code() {
        let correlator = Correlator::new();
        let (session, rx) = correlator
            .register(key(), 1, Duration::from_secs(5))
            .unwrap();

        let request = Message::request(key(), 1, 1, session, Bytes::new());
        let error = Message::error_response(&request, ReturnCode::UnknownMethod);
        assert!(correlator.resolve(&error));
        assert!(matches!(
            rx.blocking_recv().unwrap(),
            Err(EngineError::Remote { code: 0x03 })
        ));
    }

    #[test]
    fn test_fail_all_on_endpoint_loss() {
        let correlator = Correlator::new();
        let (_s1, rx1) = correlator.register(key(), 1, Duration::from_secs(5)).unwrap();
        let (_s2, rx2) = correlator.register(key(), 2, Duration::from_secs(5)).unwrap();

        assert_eq!(correlator.fail_all(), 2);
        assert_eq!(correlator.in_flight(), 0);
        assert!(matches!(rx1.blocking_recv().unwrap(), Err(EngineError::EndpointLost)));
        assert!(matches!(rx2.blocking_recv().unwrap(), Err(EngineError::EndpointLost)));
    }
}
