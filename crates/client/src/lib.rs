//! Lattice Client Edge
//!
//! The client edge owns everything between the transport and the world
//! state:
//! - Connection establishment with a primary/fallback endpoint strategy
//! - Routing inbound envelopes to the built-in engines and to subscribers
//! - Reconciliation of authoritative snapshots into the entity registry
//! - Local prediction of the controlled entity and its per-tick report
//! - Collectible sequence sync
//!
//! # Execution Model
//!
//! A [`ClientSession`] is driven from one execution context. Transport
//! events, timer polls and ticks are separate calls that each run to
//! completion; no registry is ever mutated concurrently. Transports that use
//! threads (see [`tcp`]) hand their events back through a queue that the
//! owner drains into [`ClientSession::handle_transport_event`].

#![deny(unsafe_code)]

pub mod bus;
pub mod collectibles;
pub mod config;
pub mod error;
pub mod prediction;
pub mod reconciliation;
pub mod scripted;
pub mod tcp;
pub mod transport;

use lattice_wire::{Envelope, Inbound, JoinProto, MoveProto, events};
use lattice_world::{
    Collectible, CollectibleRegistry, EntityId, EntityRegistry, LocalEntity, MotionModel,
};
use prost::Message;
use tracing::{debug, error, info, trace, warn};

pub use bus::MessageBus;
pub use config::{ClientConfig, ConfigError};
pub use error::{Severity, SyncError};
pub use prediction::{InputState, LocalPredictor};
pub use reconciliation::{ReconciliationEngine, ReconciliationReport};
pub use transport::{
    AttemptId, ConnectParams, EndpointKind, JoinParams, LinkAction, LinkMachine, LinkState,
    Transport, TransportError, TransportEvent,
};

// ============================================================================
// Session Notices
// ============================================================================

/// Non-error outcome of a session call, for the embedding application.
#[derive(Debug)]
pub enum SessionNotice {
    /// Committed to a connection; the local entity now carries `local_id`.
    ///
    /// `join_sent` is false when the transport refused the join message. The
    /// connection stays committed and the next reconnect sends join again.
    Connected {
        endpoint: EndpointKind,
        local_id: EntityId,
        resumed: bool,
        join_sent: bool,
    },
    /// The primary did not connect within the grace period.
    FallbackEngaged,
    /// The connection dropped; reconnect attempt `attempt` is in flight.
    Reconnecting { attempt: u32 },
    Snapshot(ReconciliationReport),
    CollectiblesReplaced { len: usize },
    CollectibleRemoved(Collectible),
}

impl SessionNotice {
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Self::Reconnecting { .. } => Some(Severity::Advisory),
            Self::Connected {
                join_sent: false, ..
            } => Some(Severity::Advisory),
            _ => None,
        }
    }
}

// ============================================================================
// Client Session
// ============================================================================

/// Session-scoped state: the transport, both registries and the local
/// entity identifier.
pub struct ClientSession<T: Transport> {
    config: ClientConfig,
    transport: T,
    link: LinkMachine,
    params: Option<ConnectParams>,
    entities: EntityRegistry,
    collectibles: CollectibleRegistry,
    reconciler: ReconciliationEngine,
    predictor: LocalPredictor,
    bus: MessageBus,
}

impl<T: Transport> ClientSession<T> {
    /// Create a session with the given configuration and transport.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self, SyncError> {
        config.validate()?;

        let model = MotionModel::new(config.max_speed, config.velocity_step, config.damping);

        Ok(Self {
            link: LinkMachine::new(config.retry_limit, config.fallback_grace_ms),
            params: None,
            entities: EntityRegistry::new(),
            collectibles: CollectibleRegistry::new(),
            reconciler: ReconciliationEngine::new(config.blend_weight),
            predictor: LocalPredictor::new(model, config.stop_epsilon),
            bus: MessageBus::new(),
            transport,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn collectibles(&self) -> &CollectibleRegistry {
        &self.collectibles
    }

    pub fn local_id(&self) -> Option<&str> {
        self.entities.local_id()
    }

    pub fn local(&self) -> Option<&LocalEntity> {
        self.entities.local()
    }

    /// Mutable access to the local entity, e.g. to apply a speed multiplier.
    pub fn local_mut(&mut self) -> Option<&mut LocalEntity> {
        self.entities.local_mut()
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn predictor(&self) -> &LocalPredictor {
        &self.predictor
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Start connecting. Outcomes arrive through
    /// [`ClientSession::handle_transport_event`].
    ///
    /// Registries are left as they are; call [`ClientSession::teardown`]
    /// first for a clean start. Without an explicit `retry_limit` the
    /// configured one applies.
    pub fn connect(&mut self, params: ConnectParams, now_ms: u64) -> Result<(), SyncError> {
        let retry_limit = params
            .retry_limit
            .unwrap_or_else(|| self.config.effective_retry_limit());
        info!(
            primary = %params.primary,
            fallback = %params.fallback,
            room = %params.join.room,
            retry_limit,
            "connecting"
        );
        let actions = self.link.start(retry_limit, now_ms);
        self.params = Some(params);
        self.run(actions).map(|_| ())
    }

    /// Fire the fallback timer if it is due.
    pub fn poll_timers(&mut self, now_ms: u64) -> Result<Vec<SessionNotice>, SyncError> {
        let actions = self.link.poll(now_ms);
        self.run(actions)
    }

    /// Feed one transport event into the session.
    ///
    /// Returns `Err(SyncError::ConnectionLost)` once every attempt has been
    /// exhausted; the caller should then tear the session down.
    pub fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        now_ms: u64,
    ) -> Result<Vec<SessionNotice>, SyncError> {
        let actions = match event {
            TransportEvent::Opened {
                attempt,
                connection_id,
            } => self.link.opened(attempt, connection_id, now_ms),
            TransportEvent::OpenFailed { attempt, reason } => {
                warn!(attempt, %reason, "connection attempt failed");
                self.link.open_failed(attempt, now_ms)
            }
            TransportEvent::Dropped { attempt } => {
                debug!(attempt, "connection dropped");
                self.link.dropped(attempt, now_ms)
            }
            TransportEvent::Frame { attempt, bytes } => {
                let due = self.link.poll(now_ms);
                let mut notices = self.run(due)?;
                if self.link.live_attempt() == Some(attempt) {
                    notices.extend(self.handle_frame(&bytes));
                } else {
                    trace!(attempt, "dropping frame from superseded attempt");
                }
                return Ok(notices);
            }
        };
        self.run(actions)
    }

    /// Advance the local entity one tick and report it to the server.
    ///
    /// Prediction runs whether or not the session is connected; the report
    /// is only sent while connected. Returns the report, or `None` before
    /// the first join.
    pub fn tick(&mut self, input: &InputState) -> Result<Option<MoveProto>, SyncError> {
        let Some(report) = self.predictor.tick(&mut self.entities, input) else {
            return Ok(None);
        };
        if let Some(attempt) = self.link.live_attempt() {
            self.transport
                .send(attempt, Envelope::wrap(events::MOVE, &report).to_bytes())?;
        }
        Ok(Some(report))
    }

    /// Send a message on the live connection.
    pub fn send<M: Message>(&mut self, event: &str, body: &M) -> Result<(), SyncError> {
        let attempt = self.link.live_attempt().ok_or(SyncError::NotConnected)?;
        self.transport
            .send(attempt, Envelope::wrap(event, body).to_bytes())?;
        Ok(())
    }

    /// Register a handler for inbound `event`. Handlers for the built-in
    /// events run after the engines have applied the message.
    pub fn subscribe<F>(&mut self, event: &str, handler: F)
    where
        F: FnMut(&Envelope) + 'static,
    {
        self.bus.subscribe(event, handler);
    }

    /// Close the transport and clear every registry.
    pub fn teardown(&mut self) {
        for action in self.link.shutdown() {
            if let LinkAction::Close { attempt } = action {
                self.transport.close(attempt);
            }
        }
        self.entities.clear();
        self.collectibles.clear();
        self.params = None;
        info!("session torn down");
    }

    fn run(&mut self, actions: Vec<LinkAction>) -> Result<Vec<SessionNotice>, SyncError> {
        let mut notices = Vec::new();
        let mut lost = false;

        for action in actions {
            match action {
                LinkAction::Open { attempt, endpoint } => {
                    let Some(params) = &self.params else {
                        continue;
                    };
                    let address = params.endpoint(endpoint);
                    info!(attempt, ?endpoint, %address, "opening connection");
                    self.transport.open(attempt, address, &params.join);
                }
                LinkAction::Close { attempt } => {
                    debug!(attempt, "closing connection");
                    self.transport.close(attempt);
                }
                LinkAction::Established {
                    attempt,
                    endpoint,
                    connection_id,
                    resumed,
                } => {
                    notices.push(self.establish(attempt, endpoint, connection_id, resumed));
                }
                LinkAction::FallbackEngaged => {
                    warn!("primary endpoint not connected in time, switching to fallback");
                    notices.push(SessionNotice::FallbackEngaged);
                }
                LinkAction::Reconnecting { attempt } => {
                    warn!(attempt, "reconnecting");
                    notices.push(SessionNotice::Reconnecting { attempt });
                }
                LinkAction::Lost => {
                    error!("connection lost");
                    lost = true;
                }
            }
        }

        if lost {
            return Err(SyncError::ConnectionLost);
        }
        Ok(notices)
    }

    fn establish(
        &mut self,
        attempt: AttemptId,
        endpoint: EndpointKind,
        connection_id: String,
        resumed: bool,
    ) -> SessionNotice {
        if !self.entities.is_local_id(&connection_id) {
            if let Some(previous) = self.entities.local_id() {
                info!(%previous, current = %connection_id, "local entity re-keyed");
            }
            self.entities.spawn_local(&connection_id);
        }

        let join = JoinProto {
            sender: connection_id.clone(),
        };
        let join_sent = match self
            .transport
            .send(attempt, Envelope::wrap(events::JOIN, &join).to_bytes())
        {
            Ok(()) => true,
            Err(err) => {
                warn!(attempt, %err, "failed to send join");
                false
            }
        };

        info!(attempt, ?endpoint, local_id = %connection_id, resumed, join_sent, "connected");
        SessionNotice::Connected {
            endpoint,
            local_id: connection_id,
            resumed,
            join_sent,
        }
    }

    fn handle_frame(&mut self, bytes: &[u8]) -> Option<SessionNotice> {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "dropping undecodable frame");
                return None;
            }
        };
        let inbound = match Inbound::decode(&envelope) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(event = %envelope.event, %err, "dropping undecodable message");
                return None;
            }
        };

        let notice = match inbound {
            Inbound::Snapshot(snapshot) => Some(SessionNotice::Snapshot(
                self.reconciler.apply(&mut self.entities, snapshot),
            )),
            Inbound::CollectibleFull(full) => Some(SessionNotice::CollectiblesReplaced {
                len: collectibles::apply_full(&mut self.collectibles, full),
            }),
            Inbound::CollectibleRemoved(removed) => {
                collectibles::apply_removal_or_log(&mut self.collectibles, removed)
                    .map(SessionNotice::CollectibleRemoved)
            }
            Inbound::Welcome(_) => {
                trace!("ignoring welcome outside handshake");
                None
            }
            Inbound::Other => None,
        };

        let delivered = self.bus.dispatch(&envelope);
        trace!(event = %envelope.event, delivered, "dispatched");
        notice
    }
}

// ============================================================================
// Tests
// ============================================================================
