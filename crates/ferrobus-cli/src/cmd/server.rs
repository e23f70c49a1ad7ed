//! The demo server: offers one service, answers one method, publishes a
//! periodic event on a cancellable timer.

use crate::{DEMO_EVENT, DEMO_METHOD, DEMO_SERVICE};
use async_trait::async_trait;
use bytes::Bytes;
use clap::Args;
use ferrobus_engine::{Engine, EngineHandler};
use ferrobus_types::{EngineConfig, RegistrationState, ServiceKey};
use ferrobus_wire::transport::tcp;
use ferrobus_wire::{Message, ReturnCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Args)]
pub struct ServerArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:30509")]
    bind: String,

    /// Service name to offer (resolved through the config), if set.
    #[arg(long)]
    service: Option<String>,

    /// Event publish cadence in milliseconds.
    #[arg(long, default_value_t = 5000)]
    notify_interval_ms: u64,
}

struct ServerHandler;

#[async_trait]
impl EngineHandler for ServerHandler {
    async fn on_state(&self, state: RegistrationState) {
        info!(%state, "Engine state changed");
    }

    async fn on_request(&self, request: &Message) -> Result<Bytes, ReturnCode> {
        if request.method != DEMO_METHOD {
            return Err(ReturnCode::UnknownMethod);
        }
        info!(
            session = request.session,
            payload = %String::from_utf8_lossy(&request.payload),
            "Received request"
        );
        Ok(Bytes::from_static(b"pong"))
    }
}

fn resolve_service(config: &EngineConfig, name: Option<&str>) -> ServiceKey {
    name.and_then(|n| config.resolve(n)).unwrap_or(DEMO_SERVICE)
}

pub async fn run(args: ServerArgs, config: EngineConfig) -> anyhow::Result<()> {
    let service = resolve_service(&config, args.service.as_deref());
    let engine = Engine::start(config, Arc::new(ServerHandler));
    engine.offer_service(service)?;

    let listener = TcpListener::bind(&args.bind).await?;
    info!(addr = %listener.local_addr()?, service = %service, "Server listening");

    // Publish the event on a timer until Ctrl+C.
    let publisher = {
        let engine = Arc::clone(&engine);
        let interval = Duration::from_millis(args.notify_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut seq: u64 = 0;
            loop {
                ticker.tick().await;
                let payload = Bytes::from(format!("tick {seq}"));
                if let Err(e) = engine.notify(service, DEMO_EVENT, payload) {
                    warn!(error = %e, "Notify failed");
                }
                seq += 1;
            }
        })
    };

    // One peer endpoint at a time; a new connection replaces a lost one.
    let accept = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        info!(%addr, "Client connected");
                        let (transport, inbound) = tcp::from_stream(stream);
                        if engine.attach(Arc::new(transport), inbound).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    publisher.abort();
    accept.abort();
    engine.shutdown();
    // Give the withdrawal frames a moment to flush.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
