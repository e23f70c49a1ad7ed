//! Shared error types for the Ferrobus engine.

use crate::ServiceKey;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type surfaced by the engine facade.
///
/// None of these are fatal to the engine itself: request failures are
/// delivered to the originator, transport loss degrades the affected
/// endpoint, and everything else is rejected synchronously at the call
/// site.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A zero or reserved service/instance id was passed to the facade.
    #[error("Invalid service key: {0}")]
    InvalidServiceKey(ServiceKey),

    /// A request ran past its deadline without a response.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The transport endpoint was lost; every request routed through it
    /// fails with this error.
    #[error("Endpoint lost")]
    EndpointLost,

    /// The target service is not currently available.
    #[error("Service {0} is not reachable")]
    NotReachable(ServiceKey),

    /// The remote side answered with an error return code.
    #[error("Remote error (return code {code:#04x})")]
    Remote {
        /// Raw return code byte from the response header.
        code: u8,
    },

    /// The request was cancelled by the caller before it resolved.
    #[error("Request cancelled")]
    Cancelled,

    /// The engine is shutting down.
    #[error("Shutdown in progress")]
    ShuttingDown,

    /// Every 16-bit session id is in flight; no request can be issued.
    #[error("No free session id")]
    SessionsExhausted,
}
