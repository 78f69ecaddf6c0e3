//! In-memory transport that records calls instead of performing I/O.
//!
//! Outcomes are injected by the owner as [`TransportEvent`]s, which makes
//! every timing interleaving reproducible.
//!
//! [`TransportEvent`]: crate::transport::TransportEvent

use std::collections::HashSet;

use lattice_wire::{Envelope, WireError};

use crate::transport::{AttemptId, JoinParams, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Open {
        attempt: AttemptId,
        endpoint: String,
        join: JoinParams,
    },
    Close {
        attempt: AttemptId,
    },
    Send {
        attempt: AttemptId,
        frame: Vec<u8>,
    },
}

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    calls: Vec<TransportCall>,
    closed: HashSet<AttemptId>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[TransportCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Endpoints passed to `open`, in call order.
    pub fn opened_endpoints(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Open { endpoint, .. } => Some(endpoint.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Attempt id of the most recent `open`.
    pub fn last_opened(&self) -> Option<AttemptId> {
        self.calls.iter().rev().find_map(|c| match c {
            TransportCall::Open { attempt, .. } => Some(*attempt),
            _ => None,
        })
    }

    pub fn was_closed(&self, attempt: AttemptId) -> bool {
        self.closed.contains(&attempt)
    }

    /// Decoded envelopes passed to `send`, in call order.
    pub fn sent(&self) -> Result<Vec<(AttemptId, Envelope)>, WireError> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Send { attempt, frame } => Some((*attempt, frame)),
                _ => None,
            })
            .map(|(attempt, frame)| Envelope::from_bytes(frame).map(|env| (attempt, env)))
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self, attempt: AttemptId, endpoint: &str, join: &JoinParams) {
        self.calls.push(TransportCall::Open {
            attempt,
            endpoint: endpoint.to_string(),
            join: join.clone(),
        });
    }

    fn close(&mut self, attempt: AttemptId) {
        self.closed.insert(attempt);
        self.calls.push(TransportCall::Close { attempt });
    }

    fn send(&mut self, attempt: AttemptId, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.contains(&attempt) {
            return Err(TransportError::Closed(attempt));
        }
        self.calls.push(TransportCall::Send { attempt, frame });
        Ok(())
    }
}
