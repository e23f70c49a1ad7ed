//! Application facade and worker wiring.
//!
//! [`Engine::start`] builds one engine instance and spawns its worker
//! tasks: a callback dispatch task (runs every [`EngineHandler`]
//! callback), a sender task (serialises outbound frames), and a periodic
//! timer task (discovery announcements, timeout and grace sweeps). A
//! transport endpoint is bound with [`Engine::attach`], which adds the
//! I/O task feeding inbound chunks through the frame decoder.
//!
//! The facade owns no protocol logic: it validates arguments and
//! composes the registry, discovery engine, correlator, and subscription
//! manager. No table lock is ever held across a callback or a send.

use crate::correlator::Correlator;
use crate::discovery::DiscoveryEngine;
use crate::registry::ServiceRegistry;
use crate::subscription::SubscriptionManager;
use async_trait::async_trait;
use bytes::Bytes;
use ferrobus_types::{EngineConfig, EngineError, RegistrationState, ServiceKey};
use ferrobus_wire::{
    codec, ChunkReceiver, FrameDecoder, Message, MessageType, ReturnCode, Transport,
};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Cadence of the request-timeout and subscription-grace sweep.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Callbacks the application implements.
///
/// All methods run on the engine's dispatch task, never on the I/O
/// worker, so a slow callback cannot stall frame decoding. Defaults are
/// no-ops; a pure client does not need `on_request`.
#[async_trait]
pub trait EngineHandler: Send + Sync + 'static {
    /// Local registration lifecycle.
    async fn on_state(&self, _state: RegistrationState) {}

    /// A watched remote service changed availability. Fired exactly once
    /// per transition.
    async fn on_availability(&self, _key: ServiceKey, _available: bool) {}

    /// Server side: answer a request for an offered service. The error
    /// code is returned to the caller in an Error-kind response.
    async fn on_request(&self, _request: &Message) -> Result<Bytes, ReturnCode> {
        Err(ReturnCode::UnknownMethod)
    }

    /// An asynchronous request (sent with [`Engine::send_request`])
    /// resolved: response payload, timeout, cancellation, or loss.
    async fn on_response(&self, _session: u16, _result: Result<Bytes, EngineError>) {}

    /// A notification arrived for one of our subscriptions.
    async fn on_notification(&self, _key: ServiceKey, _event: u16, _payload: Bytes) {}
}

/// Work items for the dispatch task.
enum EngineEvent {
    State(RegistrationState),
    Availability(ServiceKey, bool),
    Request(Message),
    RequestNoReturn(Message),
    Notification(Message),
    ResponseResult {
        session: u16,
        result: Result<Bytes, EngineError>,
    },
}

/// One service-oriented RPC engine instance.
///
/// Explicitly constructed — there is no process-wide singleton. All
/// shared state lives behind per-table locks held only for single
/// lookups/mutations. Worker tasks keep the instance alive until
/// [`Engine::shutdown`] is called.
pub struct Engine {
    config: EngineConfig,
    client_id: u16,
    registry: ServiceRegistry,
    correlator: Correlator,
    subscriptions: SubscriptionManager,
    discovery: DiscoveryEngine,
    outbound: Mutex<Option<Arc<dyn Transport>>>,
    outbox: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<EngineEvent>,
    shutdown: watch::Sender<bool>,
    stopping: AtomicBool,
}

impl Engine {
    /// Build an engine and spawn its worker tasks. The returned engine
    /// has no endpoint yet; bind one with [`Engine::attach`].
    pub fn start(config: EngineConfig, handler: Arc<dyn EngineHandler>) -> Arc<Self> {
        let client_id = config
            .client_id
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..u16::MAX));
        let registry = ServiceRegistry::new();
        let discovery = DiscoveryEngine::new(registry.clone(), config.announce_interval);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let engine = Arc::new(Self {
            config,
            client_id,
            registry,
            correlator: Correlator::new(),
            subscriptions: SubscriptionManager::new(),
            discovery,
            outbound: Mutex::new(None),
            outbox: outbox_tx,
            events: events_tx,
            shutdown: shutdown_tx,
            stopping: AtomicBool::new(false),
        });

        engine.spawn_dispatch(handler, events_rx);
        engine.spawn_sender(outbox_rx);
        engine.spawn_timer();
        engine.emit(EngineEvent::State(RegistrationState::Registered));
        info!(client_id, "Engine started");
        engine
    }

    /// The client id stamped on outgoing requests.
    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    /// The configuration this engine runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a service is currently available.
    pub fn is_available(&self, key: ServiceKey) -> bool {
        self.registry.is_available(key)
    }

    /// Bind a transport endpoint and start decoding its inbound stream.
    /// Offered services are announced and watched services searched
    /// immediately.
    pub fn attach(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        inbound: ChunkReceiver,
    ) -> Result<(), EngineError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(transport);
        self.spawn_io(inbound);
        self.discovery_tick();
        info!("Endpoint attached");
        Ok(())
    }

    /// Offer a service. Idempotent; the announcement goes out at once
    /// and is repeated every announce interval.
    pub fn offer_service(&self, key: ServiceKey) -> Result<(), EngineError> {
        let key = key.validate()?;
        if self.registry.offer(key) {
            info!(service = %key, "Service offered");
            self.emit_frame(Message::offer(key));
        }
        Ok(())
    }

    /// Withdraw an offered service and drop its subscribers.
    pub fn stop_offer(&self, key: ServiceKey) -> Result<(), EngineError> {
        let key = key.validate()?;
        if self.registry.stop_offer(key) {
            info!(service = %key, "Service withdrawn");
            self.subscriptions.clear_subscribers_of(key);
            self.emit_frame(Message::stop_offer(key));
        }
        Ok(())
    }

    /// Request a remote service: starts the find cycle. The current
    /// (unavailable) state is reported once right away; every later
    /// transition is reported through
    /// [`EngineHandler::on_availability`].
    pub fn request_service(&self, key: ServiceKey) -> Result<(), EngineError> {
        let key = key.validate()?;
        if self.registry.watch(key) {
            info!(service = %key, "Searching for service");
            self.emit(EngineEvent::Availability(key, false));
            self.emit_frame(Message::find(key));
        }
        Ok(())
    }

    /// Send a request and deliver the outcome to
    /// [`EngineHandler::on_response`]. Returns the allocated session id.
    /// `timeout` defaults to the configured request timeout.
    pub fn send_request(
        self: &Arc<Self>,
        key: ServiceKey,
        method: u16,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<u16, EngineError> {
        let (session, rx) = self.begin_request(key, method, payload, timeout)?;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = rx.await.unwrap_or(Err(EngineError::ShuttingDown));
            engine.emit(EngineEvent::ResponseResult { session, result });
        });
        Ok(session)
    }

    /// Send a fire-and-forget request: no session is allocated and no
    /// response ever arrives.
    pub fn send_request_no_return(
        &self,
        key: ServiceKey,
        method: u16,
        payload: Bytes,
    ) -> Result<(), EngineError> {
        let key = key.validate()?;
        if !self.registry.is_available(key) {
            return Err(EngineError::NotReachable(key));
        }
        self.emit_frame(Message::request_no_return(key, method, self.client_id, payload));
        Ok(())
    }

    /// Synchronous variant of [`Engine::send_request`]: suspends the
    /// caller until response, timeout, or cancellation. The I/O worker
    /// is never blocked; completion flows through a one-shot signal.
    pub async fn call(
        &self,
        key: ServiceKey,
        method: u16,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<Bytes, EngineError> {
        let (_session, rx) = self.begin_request(key, method, payload, timeout)?;
        rx.await.unwrap_or(Err(EngineError::ShuttingDown))
    }

    /// Cancel an in-flight request by session id. Returns `false` when
    /// the request already resolved. Any late response is suppressed.
    pub fn cancel(&self, session: u16) -> bool {
        self.correlator.cancel(session)
    }

    /// Subscribe to an event. If the service is not yet available the
    /// subscription stays pending and is replayed once it is; a pending
    /// subscription expires after the configured grace period.
    pub fn subscribe(&self, key: ServiceKey, event: u16) -> Result<(), EngineError> {
        let key = key.validate()?;
        let available = self.registry.is_available(key);
        if self.subscriptions.subscribe_local(key, event, available) {
            self.emit_frame(Message::subscribe(key, event, self.client_id));
        } else if !available {
            debug!(service = %key, event, "Subscription queued until service is available");
        }
        Ok(())
    }

    /// Withdraw a subscription.
    pub fn unsubscribe(&self, key: ServiceKey, event: u16) -> Result<(), EngineError> {
        let key = key.validate()?;
        if self.subscriptions.unsubscribe_local(key, event) {
            self.emit_frame(Message::unsubscribe(key, event, self.client_id));
        }
        Ok(())
    }

    /// Publish an event to every current subscriber, one notification
    /// per subscriber, in per-subscriber send order. The service must be
    /// offered here.
    pub fn notify(&self, key: ServiceKey, event: u16, payload: Bytes) -> Result<(), EngineError> {
        let key = key.validate()?;
        if !self.registry.is_offered(key) {
            return Err(EngineError::NotReachable(key));
        }
        for client in self.subscriptions.subscribers_of(key, event) {
            self.emit_frame(Message::notification(key, event, client, payload.clone()));
        }
        Ok(())
    }

    /// Shut the engine down: withdraw local offers, fire the
    /// `Deregistered` state callback, stop all worker tasks.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Engine shutting down");
        for key in self.registry.offered_keys() {
            self.emit_frame(Message::stop_offer(key));
        }
        self.emit(EngineEvent::State(RegistrationState::Deregistered));
        let _ = self.shutdown.send(true);
    }

    // --- internals -------------------------------------------------------

    fn begin_request(
        &self,
        key: ServiceKey,
        method: u16,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<(u16, oneshot::Receiver<Result<Bytes, EngineError>>), EngineError> {
        let key = key.validate()?;
        if !self.registry.is_available(key) {
            return Err(EngineError::NotReachable(key));
        }
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let (session, rx) = self.correlator.register(key, method, timeout)?;
        self.emit_frame(Message::request(key, method, self.client_id, session, payload));
        debug!(service = %key, method, session, "Request sent");
        Ok((session, rx))
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn emit_frame(&self, msg: Message) {
        let _ = self.outbox.send(msg);
    }

    /// Route one decoded inbound message. Runs on the I/O task; anything
    /// that reaches the application is forwarded to the dispatch task.
    fn route(&self, msg: Message) {
        match msg.kind {
            MessageType::Request => {
                if self.registry.is_offered(msg.key) {
                    self.emit(EngineEvent::Request(msg));
                } else {
                    debug!(service = %msg.key, "Request for a service not offered here");
                    self.emit_frame(Message::error_response(&msg, ReturnCode::UnknownService));
                }
            }
            MessageType::RequestNoReturn => {
                if self.registry.is_offered(msg.key) {
                    self.emit(EngineEvent::RequestNoReturn(msg));
                }
            }
            MessageType::Response | MessageType::Error => {
                if !self.correlator.resolve(&msg) {
                    // Late, duplicate, or unknown: observability only.
                    debug!(session = msg.session, "Stale response dropped");
                }
            }
            MessageType::Notification => {
                if self.subscriptions.is_subscribed(msg.key, msg.method) {
                    self.emit(EngineEvent::Notification(msg));
                } else {
                    debug!(
                        service = %msg.key,
                        event = msg.method,
                        "Unsolicited notification dropped"
                    );
                }
            }
            MessageType::Subscribe => {
                if self.registry.is_offered(msg.key) {
                    self.subscriptions.add_subscriber(msg.key, msg.method, msg.client);
                    debug!(
                        service = %msg.key,
                        event = msg.method,
                        client = msg.client,
                        "Subscriber added"
                    );
                    self.emit_frame(Message::subscribe_ack(&msg));
                } else {
                    debug!(service = %msg.key, "Subscribe for a service not offered here");
                }
            }
            MessageType::Unsubscribe => {
                self.subscriptions
                    .remove_subscriber(msg.key, msg.method, msg.client);
            }
            MessageType::SubscribeAck => {
                self.subscriptions.acknowledge(msg.key, msg.method);
            }
            MessageType::OfferService => {
                if self.discovery.on_offer(msg.key) {
                    self.emit(EngineEvent::Availability(msg.key, true));
                    for event in self.subscriptions.activate_pending(msg.key) {
                        self.emit_frame(Message::subscribe(msg.key, event, self.client_id));
                    }
                }
            }
            MessageType::StopOfferService => {
                if self.discovery.on_stop_offer(msg.key) {
                    self.subscriptions.demote_to_pending(msg.key);
                    self.emit(EngineEvent::Availability(msg.key, false));
                }
            }
            MessageType::FindService => {
                if self.registry.is_offered(msg.key) {
                    self.emit_frame(Message::offer(msg.key));
                }
            }
        }
    }

    /// One discovery cycle: expire stale remotes, announce, search.
    fn discovery_tick(&self) {
        let output = self.discovery.tick(Instant::now());
        for key in output.lost {
            self.subscriptions.demote_to_pending(key);
            self.emit(EngineEvent::Availability(key, false));
        }
        for frame in output.frames {
            self.emit_frame(frame);
        }
    }

    /// Fail requests past their deadline and expire stale pending
    /// subscriptions.
    fn sweep_tick(&self) {
        let now = Instant::now();
        self.correlator.sweep(now);
        for (key, event) in self
            .subscriptions
            .expire_pending(now, self.config.subscription_grace)
        {
            warn!(
                service = %key,
                event,
                "Subscription expired before the service became available"
            );
        }
    }

    /// The endpoint's inbound stream closed or its framing broke down.
    fn on_endpoint_lost(&self) {
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let failed = self.correlator.fail_all();
        if failed > 0 {
            warn!(failed, "Endpoint lost, failed in-flight requests");
        } else {
            info!("Endpoint lost");
        }
        self.subscriptions.clear_all_subscribers();
        for key in self.registry.degrade_all_remotes() {
            self.subscriptions.demote_to_pending(key);
            self.emit(EngineEvent::Availability(key, false));
        }
    }

    async fn transmit(&self, msg: &Message) {
        let transport = self
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match transport {
            Some(transport) => {
                if let Err(e) = transport.send(codec::encode(msg)).await {
                    debug!(error = %e, kind = ?msg.kind, "Send failed");
                }
            }
            None => debug!(kind = ?msg.kind, "Dropping frame, no endpoint attached"),
        }
    }

    async fn dispatch(&self, handler: &dyn EngineHandler, event: EngineEvent) {
        match event {
            EngineEvent::State(state) => handler.on_state(state).await,
            EngineEvent::Availability(key, available) => {
                handler.on_availability(key, available).await
            }
            EngineEvent::Request(msg) => {
                let reply = match handler.on_request(&msg).await {
                    Ok(payload) => Message::response(&msg, payload),
                    Err(code) => Message::error_response(&msg, code),
                };
                self.emit_frame(reply);
            }
            EngineEvent::RequestNoReturn(msg) => {
                let _ = handler.on_request(&msg).await;
            }
            EngineEvent::Notification(msg) => {
                handler.on_notification(msg.key, msg.method, msg.payload).await
            }
            EngineEvent::ResponseResult { session, result } => {
                handler.on_response(session, result).await
            }
        }
    }

    fn spawn_dispatch(
        self: &Arc<Self>,
        handler: Arc<dyn EngineHandler>,
        mut rx: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => engine.dispatch(&*handler, event).await,
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        // Deliver what is already queued, then stop.
                        while let Ok(event) = rx.try_recv() {
                            engine.dispatch(&*handler, event).await;
                        }
                        break;
                    }
                }
            }
            debug!("Dispatch task stopped");
        });
    }

    fn spawn_sender(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<Message>) {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(msg) => engine.transmit(&msg).await,
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        // Flush queued frames (withdrawals among them).
                        while let Ok(msg) = rx.try_recv() {
                            engine.transmit(&msg).await;
                        }
                        break;
                    }
                }
            }
            debug!("Sender task stopped");
        });
    }

    fn spawn_timer(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut announce = tokio::time::interval(engine.config.announce_interval);
            let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = announce.tick() => engine.discovery_tick(),
                    _ = sweep.tick() => engine.sweep_tick(),
                }
            }
            debug!("Timer task stopped");
        });
    }

    fn spawn_io(self: &Arc<Self>, mut inbound: ChunkReceiver) {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    chunk = inbound.recv() => match chunk {
                        None => {
                            engine.on_endpoint_lost();
                            break;
                        }
                        Some(chunk) => match decoder.feed(&chunk) {
                            Ok(messages) => {
                                for msg in messages {
                                    engine.route(msg);
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Unrecoverable framing error, dropping endpoint");
                                engine.on_endpoint_lost();
                                break;
                            }
                        },
                    }
                }
            }
            debug!("I/O task stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    #[async_trait]
    impl EngineHandler for NullHandler {}

    fn test_config() -> EngineConfig {
        EngineConfig {
            client_id: Some(7),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_facade_rejects_reserved_keys() {
        let engine = Engine::start(test_config(), Arc::new(NullHandler));
        let bad = ServiceKey::new(0, 0);

        assert!(matches!(
            engine.offer_service(bad),
            Err(EngineError::InvalidServiceKey(_))
        ));
        assert!(matches!(
            engine.request_service(bad),
            Err(EngineError::InvalidServiceKey(_))
        ));
        assert!(matches!(
            engine.subscribe(bad, 1),
            Err(EngineError::InvalidServiceKey(_))
        ));
        assert!(matches!(
            engine.notify(bad, 1, Bytes::new()),
            Err(EngineError::InvalidServiceKey(_))
        ));
        assert!(matches!(
            engine.send_request(bad, 1, Bytes::new(), None),
            Err(EngineError::InvalidServiceKey(_))
        ));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_send_request_requires_availability() {
        let engine = Engine::start(test_config(), Arc::new(NullHandler));
        let key = ServiceKey::new(0x1234, 0x5678);
        assert!(matches!(
            engine.send_request(key, 1, Bytes::new(), None),
            Err(EngineError::NotReachable(_))
        ));
        assert!(matches!(
            engine.send_request_no_return(key, 1, Bytes::new()),
            Err(EngineError::NotReachable(_))
        ));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_notify_requires_local_offer() {
        let engine = Engine::start(test_config(), Arc::new(NullHandler));
        let key = ServiceKey::new(0x1234, 0x5678);
        assert!(matches!(
            engine.notify(key, 0x8001, Bytes::new()),
            Err(EngineError::NotReachable(_))
        ));

        engine.offer_service(key).unwrap();
        // No subscribers yet: a no-op, not an error.
        assert!(engine.notify(key, 0x8001, Bytes::new()).is_ok());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_cancel_unknown_session() {
        let engine = Engine::start(test_config(), Arc::new(NullHandler));
        assert!(!engine.cancel(0x4242));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_attach_after_shutdown_fails() {
        let engine = Engine::start(test_config(), Arc::new(NullHandler));
        engine.shutdown();

        let ((transport, inbound), _peer) = ferrobus_wire::transport::memory::pair();
        assert!(matches!(
            engine.attach(Arc::new(transport), inbound),
            Err(EngineError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_client_id_from_config() {
        let engine = Engine::start(test_config(), Arc::new(NullHandler));
        assert_eq!(engine.client_id(), 7);
        engine.shutdown();
    }
}
