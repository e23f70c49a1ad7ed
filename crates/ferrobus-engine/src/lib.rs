//! Ferrobus engine — a service-oriented RPC and event-notification core.
//!
//! An [`Engine`] instance owns all protocol state: the service registry,
//! the discovery announce/find cycle, the request/response correlator,
//! and the event subscription tables. It is explicitly constructed (no
//! process-wide singleton) and bound to one transport endpoint at a
//! time. The application implements [`EngineHandler`] to receive
//! callbacks; callbacks run on a dedicated dispatch task, never on the
//! I/O worker.

pub mod config;
pub mod correlator;
pub mod discovery;
pub mod engine;
pub mod registry;
pub mod subscription;

pub use config::load_config;
pub use engine::{Engine, EngineHandler};
pub use registry::{ServiceRecord, ServiceRegistry, ServiceRole};
