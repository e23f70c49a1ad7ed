//! The demo client: finds the service, subscribes to its event, and
//! sends one request when the service becomes available.
//!
//! Engine callbacks are forwarded into a channel consumed by the command
//! loop below, so the application never re-enters the engine from inside
//! a callback.

use crate::{DEMO_EVENT, DEMO_METHOD, DEMO_SERVICE};
use async_trait::async_trait;
use bytes::Bytes;
use clap::Args;
use ferrobus_engine::{Engine, EngineHandler};
use ferrobus_types::{EngineConfig, RegistrationState, ServiceKey};
use ferrobus_wire::transport::tcp;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Args)]
pub struct ClientArgs {
    /// Server address to connect to.
    #[arg(long, default_value = "127.0.0.1:30509")]
    connect: String,

    /// Service name to request (resolved through the config), if set.
    #[arg(long)]
    service: Option<String>,
}

/// Callback events forwarded to the command loop.
enum ClientEvent {
    Availability(ServiceKey, bool),
    Notification(u16, Bytes),
}

struct ClientHandler {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

#[async_trait]
impl EngineHandler for ClientHandler {
    async fn on_state(&self, state: RegistrationState) {
        info!(%state, "Engine state changed");
    }

    async fn on_availability(&self, key: ServiceKey, available: bool) {
        let _ = self.tx.send(ClientEvent::Availability(key, available));
    }

    async fn on_notification(&self, _key: ServiceKey, event: u16, payload: Bytes) {
        let _ = self.tx.send(ClientEvent::Notification(event, payload));
    }
}

pub async fn run(args: ClientArgs, config: EngineConfig) -> anyhow::Result<()> {
    let service = args
        .service
        .as_deref()
        .and_then(|n| config.resolve(n))
        .unwrap_or(DEMO_SERVICE);

    let (tx, mut events) = mpsc::unbounded_channel();
    let engine = Engine::start(config, Arc::new(ClientHandler { tx }));

    let (transport, inbound) = tcp::connect(&args.connect).await?;
    engine.attach(Arc::new(transport), inbound)?;
    info!(addr = %args.connect, service = %service, "Connected");

    engine.request_service(service)?;
    engine.subscribe(service, DEMO_EVENT)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ClientEvent::Availability(key, true)) => {
                    info!(service = %key, "Service available, sending request");
                    match engine
                        .call(key, DEMO_METHOD, Bytes::from_static(b"ping"), None)
                        .await
                    {
                        Ok(payload) => info!(
                            payload = %String::from_utf8_lossy(&payload),
                            "Received response"
                        ),
                        Err(e) => warn!(error = %e, "Request failed"),
                    }
                }
                Some(ClientEvent::Availability(key, false)) => {
                    info!(service = %key, "Service unavailable");
                }
                Some(ClientEvent::Notification(event, payload)) => {
                    info!(
                        event,
                        payload = %String::from_utf8_lossy(&payload),
                        "Received notification"
                    );
                }
                None => break,
            }
        }
    }

    info!("Shutting down");
    engine.shutdown();
    Ok(())
}
