//! Core types for the Ferrobus service-oriented RPC engine.
//!
//! This crate defines the shared data structures used across the wire
//! protocol, the engine, and the demo binaries. It contains no I/O and no
//! business logic.

pub mod config;
pub mod error;
pub mod event;
pub mod key;

pub use config::EngineConfig;
pub use error::EngineError;
pub use event::RegistrationState;
pub use key::ServiceKey;
