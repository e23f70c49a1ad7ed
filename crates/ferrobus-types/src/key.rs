//! Service identification.

use serde::{Deserialize, Serialize};

/// Identifies one service instance: a `(service, instance)` id pair.
///
/// Used as a map key throughout the engine. The all-zero and all-ones
/// values of either field are reserved by the protocol and never name a
/// real service; [`ServiceKey::validate`] rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    /// Service id.
    pub service: u16,
    /// Instance id.
    pub instance: u16,
}

/// Reserved wildcard / invalid id value.
pub const RESERVED_ID: u16 = 0xFFFF;

impl ServiceKey {
    /// Create a key without validating it.
    pub const fn new(service: u16, instance: u16) -> Self {
        Self { service, instance }
    }

    /// Whether both ids are in the usable range (non-zero, non-reserved).
    pub fn is_valid(&self) -> bool {
        self.service != 0
            && self.instance != 0
            && self.service != RESERVED_ID
            && self.instance != RESERVED_ID
    }

    /// Validate the key, returning it for chaining.
    pub fn validate(self) -> Result<Self, crate::EngineError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(crate::EngineError::InvalidServiceKey(self))
        }
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}:{:#06x}", self.service, self.instance)
    }
}
