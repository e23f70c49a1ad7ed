//! CLI subcommands.

pub mod client;
pub mod server;
