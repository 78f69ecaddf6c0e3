//! Lattice Wire Protocol Types
//!
//! This crate defines the shared Protobuf message types exchanged between a
//! Lattice client and the authoritative server. Both sides MUST depend on
//! this crate so that event names and message schemas cannot drift.
//!
//! # Framing
//!
//! Every message travels inside an [`Envelope`] naming the event and carrying
//! the prost-encoded body. Transports move opaque envelope bytes; only the
//! session edge looks inside.
//!
//! # Message Categories
//!
//! - **Handshake**: `hello` (client → server), `welcome` (server → client)
//! - **Session**: `join`, `move` (client → server)
//! - **State**: `snapshot`, `collectible-full`, `collectible-removed`
//!   (server → client)

#![deny(unsafe_code)]

use std::collections::HashMap;

use lattice_world::{EntityRecord, LocalEntity, PlayerAttributes, RemoteMotion};
use prost::Message;
use thiserror::Error;

// ============================================================================
// Event Names
// ============================================================================

/// Event names carried in [`Envelope::event`].
pub mod events {
    pub const HELLO: &str = "hello";
    pub const WELCOME: &str = "welcome";
    pub const JOIN: &str = "join";
    pub const MOVE: &str = "move";
    pub const SNAPSHOT: &str = "snapshot";
    pub const COLLECTIBLE_FULL: &str = "collectible-full";
    pub const COLLECTIBLE_REMOVED: &str = "collectible-removed";
}

// ============================================================================
// Errors
// ============================================================================

/// Failure to decode or validate a wire message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("field `{field}` must have exactly 2 elements, got {len}")]
    BadVectorLength { field: &'static str, len: usize },
}

impl WireError {
    fn decode(what: &'static str) -> impl FnOnce(prost::DecodeError) -> WireError {
        move |source| WireError::Decode { what, source }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Named frame wrapping every message on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    /// Event name; see [`events`].
    #[prost(string, tag = "1")]
    pub event: String,

    /// Prost-encoded message body.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap a message body under an event name.
    pub fn wrap<M: Message>(event: &str, body: &M) -> Self {
        Self {
            event: event.to_string(),
            payload: body.encode_to_vec(),
        }
    }

    /// Encode for a transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode a frame received from a transport.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Self::decode(bytes).map_err(WireError::decode("envelope"))
    }
}

// ============================================================================
// Handshake Messages
// ============================================================================

/// Client opens a connection with its join parameters.
#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(string, tag = "1")]
    pub room: String,

    #[prost(string, tag = "2")]
    pub name: String,
}

/// Server acknowledges a connection and assigns its identifier.
#[derive(Clone, PartialEq, Message)]
pub struct ServerWelcome {
    /// Transport-level connection identifier. Becomes the local entity id.
    #[prost(string, tag = "1")]
    pub connection_id: String,
}

// ============================================================================
// Session Messages (client → server)
// ============================================================================

/// Announces the client after a successful (re)connection.
#[derive(Clone, PartialEq, Message)]
pub struct JoinProto {
    /// The local entity identifier.
    #[prost(string, tag = "1")]
    pub sender: String,
}

/// Per-tick report of the local entity's predicted state.
#[derive(Clone, PartialEq, Message)]
pub struct MoveProto {
    #[prost(string, tag = "1")]
    pub id: String,

    /// Position [x, y].
    #[prost(double, repeated, tag = "2")]
    pub position: Vec<f64>,

    /// Velocity [vx, vy].
    #[prost(double, repeated, tag = "3")]
    pub velocity: Vec<f64>,
}

impl From<&LocalEntity> for MoveProto {
    fn from(e: &LocalEntity) -> Self {
        Self {
            id: e.id.clone(),
            position: e.position.to_vec(),
            velocity: e.velocity.to_vec(),
        }
    }
}

impl MoveProto {
    /// Position as a pair, validating length.
    pub fn position_pair(&self) -> Result<[f64; 2], WireError> {
        pair("position", &self.position)
    }

    /// Velocity as a pair, validating length.
    pub fn velocity_pair(&self) -> Result<[f64; 2], WireError> {
        pair("velocity", &self.velocity)
    }
}

fn pair(field: &'static str, v: &[f64]) -> Result<[f64; 2], WireError> {
    match v {
        [x, y] => Ok([*x, *y]),
        _ => Err(WireError::BadVectorLength {
            field,
            len: v.len(),
        }),
    }
}

// ============================================================================
// State Messages (server → client)
// ============================================================================

/// Possibly-partial statement of entity states, keyed by entity id.
///
/// Ids absent from the map are unchanged. An id present with an empty slot
/// is a tombstone.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotProto {
    #[prost(map = "string, message", tag = "1")]
    pub entities: HashMap<String, EntitySlotProto>,
}

/// Snapshot value: a record, or nothing (tombstone).
#[derive(Clone, PartialEq, Message)]
pub struct EntitySlotProto {
    #[prost(message, optional, tag = "1")]
    pub record: Option<EntityRecordProto>,
}

impl EntitySlotProto {
    pub fn tombstone() -> Self {
        Self { record: None }
    }

    pub fn record(record: EntityRecordProto) -> Self {
        Self {
            record: Some(record),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.record.is_none()
    }
}

/// Entity state as sent by the server.
///
/// Every field is `optional` on the wire so that a missing field can be told
/// apart from a zero value; a record missing any field is rejected.
#[derive(Clone, PartialEq, Message)]
pub struct EntityRecordProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,

    #[prost(string, optional, tag = "2")]
    pub room: Option<String>,

    #[prost(string, optional, tag = "3")]
    pub team: Option<String>,

    #[prost(double, optional, tag = "4")]
    pub health: Option<f64>,

    #[prost(double, optional, tag = "5")]
    pub shield: Option<f64>,

    #[prost(double, optional, tag = "6")]
    pub experience: Option<f64>,

    #[prost(double, optional, tag = "7")]
    pub x: Option<f64>,

    #[prost(double, optional, tag = "8")]
    pub y: Option<f64>,

    /// Heading in radians.
    #[prost(double, optional, tag = "9")]
    pub heading: Option<f64>,

    #[prost(double, optional, tag = "10")]
    pub speed: Option<f64>,
}

/// One collectible in the join-time full sequence.
#[derive(Clone, PartialEq, Message)]
pub struct CollectibleSpecProto {
    #[prost(uint32, tag = "1")]
    pub type_tag: u32,
}

/// Full collectible sequence, in server order.
#[derive(Clone, PartialEq, Message)]
pub struct CollectibleFullProto {
    #[prost(message, repeated, tag = "1")]
    pub collectibles: Vec<CollectibleSpecProto>,
}

/// Removal of the collectible currently at `index`.
#[derive(Clone, PartialEq, Message)]
pub struct CollectibleRemovedProto {
    #[prost(uint64, tag = "1")]
    pub index: u64,
}

// ============================================================================
// Inbound Dispatch
// ============================================================================

/// Typed view of an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Welcome(ServerWelcome),
    Snapshot(SnapshotProto),
    CollectibleFull(CollectibleFullProto),
    CollectibleRemoved(CollectibleRemovedProto),
    /// An event the engine does not interpret (chat, ping, lobby, ...).
    Other,
}

impl Inbound {
    /// Decode the body of `envelope` according to its event name.
    pub fn decode(envelope: &Envelope) -> Result<Self, WireError> {
        let body = envelope.payload.as_slice();
        Ok(match envelope.event.as_str() {
            events::WELCOME => Self::Welcome(
                ServerWelcome::decode(body).map_err(WireError::decode("welcome"))?,
            ),
            events::SNAPSHOT => Self::Snapshot(
                SnapshotProto::decode(body).map_err(WireError::decode("snapshot"))?,
            ),
            events::COLLECTIBLE_FULL => Self::CollectibleFull(
                CollectibleFullProto::decode(body)
                    .map_err(WireError::decode("collectible-full"))?,
            ),
            events::COLLECTIBLE_REMOVED => Self::CollectibleRemoved(
                CollectibleRemovedProto::decode(body)
                    .map_err(WireError::decode("collectible-removed"))?,
            ),
            _ => Self::Other,
        })
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

fn required<T>(field: &'static str, value: Option<T>) -> Result<T, WireError> {
    value.ok_or(WireError::MissingField(field))
}

fn finite(field: &'static str, value: Option<f64>) -> Result<f64, WireError> {
    let value = required(field, value)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(WireError::NonFinite(field))
    }
}

impl TryFrom<EntityRecordProto> for EntityRecord {
    type Error = WireError;

    fn try_from(r: EntityRecordProto) -> Result<Self, Self::Error> {
        Ok(Self {
            attributes: PlayerAttributes {
                name: required("name", r.name)?,
                room: required("room", r.room)?,
                team: required("team", r.team)?,
                health: finite("health", r.health)?,
                shield: finite("shield", r.shield)?,
                experience: finite("experience", r.experience)?,
            },
            motion: RemoteMotion {
                position: [finite("x", r.x)?, finite("y", r.y)?],
                heading: finite("heading", r.heading)?,
                speed: finite("speed", r.speed)?,
            },
        })
    }
}

impl From<EntityRecord> for EntityRecordProto {
    fn from(r: EntityRecord) -> Self {
        Self {
            name: Some(r.attributes.name),
            room: Some(r.attributes.room),
            team: Some(r.attributes.team),
            health: Some(r.attributes.health),
            shield: Some(r.attributes.shield),
            experience: Some(r.attributes.experience),
            x: Some(r.motion.position[0]),
            y: Some(r.motion.position[1]),
            heading: Some(r.motion.heading),
            speed: Some(r.motion.speed),
        }
    }
}

impl FromIterator<u32> for CollectibleFullProto {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self {
            collectibles: iter
                .into_iter()
                .map(|type_tag| CollectibleSpecProto { type_tag })
                .collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> EntityRecordProto {
        EntityRecord {
            attributes: PlayerAttributes {
                name: "ada".to_string(),
                room: "r1".to_string(),
                team: "blue".to_string(),
                health: 80.0,
                shield: 5.0,
                experience: 12.0,
            },
            motion: RemoteMotion {
                position: [1.5, -2.5],
                heading: 0.25,
                speed: 3.0,
            },
        }
        .into()
    }

    #[test]
    fn test_envelope_carries_event_and_body() {
        let join = JoinProto {
            sender: "abc".to_string(),
        };
        let bytes = Envelope::wrap(events::JOIN, &join).to_bytes();

        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.event, events::JOIN);
        assert_eq!(JoinProto::decode(envelope.payload.as_slice()).unwrap(), join);
    }

    #[test]
    fn test_snapshot_tombstone_survives_encoding() {
        let mut entities = HashMap::new();
        entities.insert("p1".to_string(), EntitySlotProto::tombstone());
        entities.insert("p2".to_string(), EntitySlotProto::record(full_record()));
        let envelope = Envelope::wrap(events::SNAPSHOT, &SnapshotProto { entities });

        let Inbound::Snapshot(snapshot) = Inbound::decode(&envelope).unwrap() else {
            panic!("expected snapshot");
        };
        assert!(snapshot.entities["p1"].is_tombstone());
        assert!(!snapshot.entities["p2"].is_tombstone());
    }

    #[test]
    fn test_record_conversion_requires_every_field() {
        let record: EntityRecord = full_record().try_into().unwrap();
        assert_eq!(record.motion.position, [1.5, -2.5]);
        assert_eq!(record.attributes.team, "blue");

        let missing_x = EntityRecordProto {
            x: None,
            ..full_record()
        };
        assert_eq!(
            EntityRecord::try_from(missing_x),
            Err(WireError::MissingField("x"))
        );

        let missing_name = EntityRecordProto {
            name: None,
            ..full_record()
        };
        assert_eq!(
            EntityRecord::try_from(missing_name),
            Err(WireError::MissingField("name"))
        );
    }

    #[test]
    fn test_record_conversion_rejects_non_finite() {
        let nan_speed = EntityRecordProto {
            speed: Some(f64::NAN),
            ..full_record()
        };
        assert_eq!(
            EntityRecord::try_from(nan_speed),
            Err(WireError::NonFinite("speed"))
        );

        let inf_y = EntityRecordProto {
            y: Some(f64::INFINITY),
            ..full_record()
        };
        assert_eq!(EntityRecord::try_from(inf_y), Err(WireError::NonFinite("y")));
    }

    #[test]
    fn test_zero_valued_fields_are_present() {
        let zeroes = EntityRecordProto {
            health: Some(0.0),
            x: Some(0.0),
            ..full_record()
        };
        let envelope = Envelope::wrap(events::SNAPSHOT, &SnapshotProto {
            entities: HashMap::from([("p".to_string(), EntitySlotProto::record(zeroes))]),
        });

        let Inbound::Snapshot(snapshot) = Inbound::decode(&envelope).unwrap() else {
            panic!("expected snapshot");
        };
        let record = snapshot.entities["p"].record.clone().unwrap();
        assert!(EntityRecord::try_from(record).is_ok());
    }

    #[test]
    fn test_inbound_decodes_collectible_messages() {
        let full: CollectibleFullProto = [3u32, 1, 2].into_iter().collect();
        let envelope = Envelope::wrap(events::COLLECTIBLE_FULL, &full);
        assert_eq!(Inbound::decode(&envelope).unwrap(), Inbound::CollectibleFull(full));

        let removed = CollectibleRemovedProto { index: 4 };
        let envelope = Envelope::wrap(events::COLLECTIBLE_REMOVED, &removed);
        assert_eq!(
            Inbound::decode(&envelope).unwrap(),
            Inbound::CollectibleRemoved(removed)
        );
    }

    #[test]
    fn test_unknown_event_is_other() {
        let envelope = Envelope {
            event: "chat".to_string(),
            payload: vec![1, 2, 3],
        };
        assert_eq!(Inbound::decode(&envelope).unwrap(), Inbound::Other);
    }

    #[test]
    fn test_garbage_body_is_decode_error() {
        let envelope = Envelope {
            event: events::SNAPSHOT.to_string(),
            payload: vec![0xff, 0xff, 0xff],
        };
        assert!(matches!(
            Inbound::decode(&envelope),
            Err(WireError::Decode {
                what: "snapshot",
                ..
            })
        ));
    }

    #[test]
    fn test_move_from_local_entity() {
        let mut local = LocalEntity::new("me".to_string(), [4.0, 5.0]);
        local.velocity = [0.5, -0.5];

        let msg = MoveProto::from(&local);
        assert_eq!(msg.id, "me");
        assert_eq!(msg.position_pair().unwrap(), [4.0, 5.0]);
        assert_eq!(msg.velocity_pair().unwrap(), [0.5, -0.5]);

        let short = MoveProto {
            velocity: vec![1.0],
            ..msg
        };
        assert_eq!(
            short.velocity_pair(),
            Err(WireError::BadVectorLength {
                field: "velocity",
                len: 1
            })
        );
    }
}
