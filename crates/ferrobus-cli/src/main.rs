//! Ferrobus CLI — demo client and server for the Ferrobus engine.
//!
//! `ferrobus server` offers the demo service, answers its one method,
//! and publishes a periodic event. `ferrobus client` finds the service,
//! subscribes to the event, and sends a request once the service is
//! available.

mod cmd;

use clap::{Parser, Subcommand};
use ferrobus_types::ServiceKey;
use std::path::PathBuf;

/// The demo service instance, shared by both sides.
pub(crate) const DEMO_SERVICE: ServiceKey = ServiceKey::new(0x1234, 0x5678);
/// The one method the demo server answers.
pub(crate) const DEMO_METHOD: u16 = 0x0421;
/// The event the demo server publishes.
pub(crate) const DEMO_EVENT: u16 = 0x8001;

#[derive(Parser)]
#[command(name = "ferrobus", about = "Service-oriented RPC demo", version)]
struct Cli {
    /// Optional TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Offer the demo service and publish its event.
    Server(cmd::server::ServerArgs),
    /// Find the demo service, subscribe, and send a request.
    Client(cmd::client::ClientArgs),
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ferrobus_engine::load_config(cli.config.as_deref());

    match cli.command {
        Command::Server(args) => cmd::server::run(args, config).await,
        Command::Client(args) => cmd::client::run(args, config).await,
    }
}
