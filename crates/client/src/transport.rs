//! Transport seam and connection state machine.
//!
//! A [`Transport`] only opens, closes and writes; every outcome comes back
//! later as a [`TransportEvent`] that the session owner feeds in from its
//! single execution context. [`LinkMachine`] decides which endpoint to try
//! and when, without doing any I/O or reading a clock: callers pass `now_ms`.
//!
//! ```text
//! Idle ─start→ Connecting{Primary} ─deadline→ Connecting{Fallback}
//!                    │                              │
//!                    └──────────opened──────────────┴→ Connected
//! Connected ─dropped→ Reconnecting{n} ─opened→ Connected
//!                            └─n == limit, failed→ Lost
//! ```

use thiserror::Error;

// ============================================================================
// Transport Seam
// ============================================================================

/// Identifies one connection attempt. Never reused within a session.
pub type AttemptId = u64;

/// Parameters the server needs to place the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinParams {
    pub room: String,
    pub name: String,
}

/// Which stage of the endpoint strategy an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Primary,
    Fallback,
}

/// Everything `connect` needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub primary: String,
    pub fallback: String,
    pub join: JoinParams,
    /// Attempts per stage; 0 is treated as 1. `None` uses the session's
    /// configured limit.
    pub retry_limit: Option<u32>,
}

impl ConnectParams {
    pub fn endpoint(&self, kind: EndpointKind) -> &str {
        match kind {
            EndpointKind::Primary => &self.primary,
            EndpointKind::Fallback => &self.fallback,
        }
    }
}

/// Asynchronous outcome reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake complete; the server assigned `connection_id`.
    Opened {
        attempt: AttemptId,
        connection_id: String,
    },
    OpenFailed {
        attempt: AttemptId,
        reason: String,
    },
    /// An open connection closed.
    Dropped { attempt: AttemptId },
    /// One inbound envelope, still encoded.
    Frame { attempt: AttemptId, bytes: Vec<u8> },
}

impl TransportEvent {
    pub fn attempt(&self) -> AttemptId {
        match self {
            Self::Opened { attempt, .. }
            | Self::OpenFailed { attempt, .. }
            | Self::Dropped { attempt }
            | Self::Frame { attempt, .. } => *attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no open connection for attempt {0}")]
    UnknownAttempt(AttemptId),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("connection for attempt {0} is closed")]
    Closed(AttemptId),
}

/// Connection provider.
///
/// Implementations must not block. Outcomes of `open` are reported through
/// whatever event queue the implementation exposes.
pub trait Transport {
    fn open(&mut self, attempt: AttemptId, endpoint: &str, join: &JoinParams);

    /// Close an attempt, whether pending or open. Unknown ids are ignored.
    fn close(&mut self, attempt: AttemptId);

    /// Queue one frame. Frames on one attempt are written in call order.
    fn send(&mut self, attempt: AttemptId, frame: Vec<u8>) -> Result<(), TransportError>;
}

// ============================================================================
// Link State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    /// `tries` attempts have been started against `endpoint`.
    Connecting { endpoint: EndpointKind, tries: u32 },
    Connected { endpoint: EndpointKind },
    Reconnecting { endpoint: EndpointKind, attempt: u32 },
    Lost,
    Closed,
}

/// What the owner must do in response to a machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    Open {
        attempt: AttemptId,
        endpoint: EndpointKind,
    },
    Close {
        attempt: AttemptId,
    },
    /// The session is now committed to `attempt`.
    Established {
        attempt: AttemptId,
        endpoint: EndpointKind,
        connection_id: String,
        resumed: bool,
    },
    FallbackEngaged,
    Reconnecting {
        attempt: u32,
    },
    Lost,
}

/// Connection establishment and recovery, driven by transport events and an
/// explicit clock.
#[derive(Debug, Clone)]
pub struct LinkMachine {
    state: LinkState,
    retry_limit: u32,
    grace_ms: u64,
    /// Pending switch to the fallback endpoint.
    deadline_ms: Option<u64>,
    next_attempt: AttemptId,
    in_flight: Option<AttemptId>,
    live: Option<AttemptId>,
}

impl LinkMachine {
    pub fn new(retry_limit: u32, grace_ms: u64) -> Self {
        Self {
            state: LinkState::Idle,
            retry_limit: retry_limit.max(1),
            grace_ms,
            deadline_ms: None,
            next_attempt: 1,
            in_flight: None,
            live: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// The attempt the session is committed to, if connected.
    pub fn live_attempt(&self) -> Option<AttemptId> {
        self.live
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. })
    }

    /// Begin connecting to the primary endpoint. Any existing attempts are
    /// closed first.
    pub fn start(&mut self, retry_limit: u32, now_ms: u64) -> Vec<LinkAction> {
        let mut actions = self.close_all();
        self.retry_limit = retry_limit.max(1);
        self.deadline_ms = Some(now_ms.saturating_add(self.grace_ms));
        self.state = LinkState::Connecting {
            endpoint: EndpointKind::Primary,
            tries: 1,
        };
        actions.push(self.open(EndpointKind::Primary));
        actions
    }

    /// Fire the fallback timer if its deadline has passed.
    pub fn poll(&mut self, now_ms: u64) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        let Some(deadline) = self.deadline_ms else {
            return actions;
        };
        if now_ms < deadline {
            return actions;
        }
        self.deadline_ms = None;

        if let LinkState::Connecting {
            endpoint: EndpointKind::Primary,
            ..
        } = self.state
        {
            if let Some(attempt) = self.in_flight.take() {
                actions.push(LinkAction::Close { attempt });
            }
            self.state = LinkState::Connecting {
                endpoint: EndpointKind::Fallback,
                tries: 1,
            };
            actions.push(LinkAction::FallbackEngaged);
            actions.push(self.open(EndpointKind::Fallback));
        }
        actions
    }

    pub fn opened(
        &mut self,
        attempt: AttemptId,
        connection_id: String,
        now_ms: u64,
    ) -> Vec<LinkAction> {
        let mut actions = self.poll(now_ms);

        if self.in_flight != Some(attempt) {
            // Superseded by the fallback or by teardown.
            actions.push(LinkAction::Close { attempt });
            return actions;
        }

        let (endpoint, resumed) = match self.state {
            LinkState::Connecting { endpoint, .. } => (endpoint, false),
            LinkState::Reconnecting { endpoint, .. } => (endpoint, true),
            _ => {
                actions.push(LinkAction::Close { attempt });
                return actions;
            }
        };

        self.in_flight = None;
        self.live = Some(attempt);
        self.deadline_ms = None;
        self.state = LinkState::Connected { endpoint };
        actions.push(LinkAction::Established {
            attempt,
            endpoint,
            connection_id,
            resumed,
        });
        actions
    }

    pub fn open_failed(&mut self, attempt: AttemptId, now_ms: u64) -> Vec<LinkAction> {
        let mut actions = self.poll(now_ms);
        if self.in_flight != Some(attempt) {
            return actions;
        }
        self.in_flight = None;
        actions.push(LinkAction::Close { attempt });

        match self.state {
            LinkState::Connecting {
                endpoint: EndpointKind::Primary,
                tries,
            } => {
                if tries < self.retry_limit {
                    self.state = LinkState::Connecting {
                        endpoint: EndpointKind::Primary,
                        tries: tries + 1,
                    };
                    actions.push(self.open(EndpointKind::Primary));
                }
                // Otherwise wait for the deadline to engage the fallback.
            }
            LinkState::Connecting {
                endpoint: EndpointKind::Fallback,
                ..
            } => {
                actions.push(self.lose());
            }
            LinkState::Reconnecting { endpoint, attempt } => {
                if attempt < self.retry_limit {
                    self.state = LinkState::Reconnecting {
                        endpoint,
                        attempt: attempt + 1,
                    };
                    actions.push(LinkAction::Reconnecting {
                        attempt: attempt + 1,
                    });
                    actions.push(self.open(endpoint));
                } else {
                    actions.push(self.lose());
                }
            }
            LinkState::Idle
            | LinkState::Connected { .. }
            | LinkState::Lost
            | LinkState::Closed => {}
        }
        actions
    }

    pub fn dropped(&mut self, attempt: AttemptId, now_ms: u64) -> Vec<LinkAction> {
        if self.in_flight == Some(attempt) {
            return self.open_failed(attempt, now_ms);
        }

        let mut actions = self.poll(now_ms);
        if self.live != Some(attempt) {
            return actions;
        }
        self.live = None;
        actions.push(LinkAction::Close { attempt });

        if let LinkState::Connected { endpoint } = self.state {
            self.state = LinkState::Reconnecting {
                endpoint,
                attempt: 1,
            };
            actions.push(LinkAction::Reconnecting { attempt: 1 });
            actions.push(self.open(endpoint));
        }
        actions
    }

    /// Close every attempt and stop. Terminal until the next `start`.
    pub fn shutdown(&mut self) -> Vec<LinkAction> {
        let actions = self.close_all();
        self.state = LinkState::Closed;
        actions
    }

    fn open(&mut self, endpoint: EndpointKind) -> LinkAction {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.in_flight = Some(attempt);
        LinkAction::Open { attempt, endpoint }
    }

    fn lose(&mut self) -> LinkAction {
        self.deadline_ms = None;
        self.state = LinkState::Lost;
        LinkAction::Lost
    }

    fn close_all(&mut self) -> Vec<LinkAction> {
        self.deadline_ms = None;
        [self.in_flight.take(), self.live.take()]
            .into_iter()
            .flatten()
            .map(|attempt| LinkAction::Close { attempt })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
