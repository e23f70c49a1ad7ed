//! Engine lifecycle event types.

use serde::{Deserialize, Serialize};

/// Local registration lifecycle of an engine instance.
///
/// Reported through the application's state-change callback: `Registered`
/// once the worker tasks are running, `Deregistered` when the engine
/// shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    /// The engine is up and its services may be offered/requested.
    Registered,
    /// The engine has shut down; local offers were withdrawn.
    Deregistered,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::Registered => write!(f, "registered"),
            RegistrationState::Deregistered => write!(f, "deregistered"),
        }
    }
}
