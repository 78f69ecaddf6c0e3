//! Lattice World State
//!
//! This crate holds the client-side view of a multiplayer session: every
//! entity the server has told us about, the locally-controlled entity, and
//! the ordered sequence of collectibles.
//!
//! # Architecture Constraints
//!
//! The world state MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Log or otherwise observe itself
//!
//! All mutation happens through explicit calls made by the session edge
//! (`lattice-client`), which owns the single execution context that feeds
//! snapshots, removals and ticks into this crate.

#![deny(unsafe_code)]

pub mod collectibles;
pub mod motion;

use std::collections::HashMap;

pub use collectibles::{Collectible, CollectibleRegistry, RemovalError};
pub use motion::{Direction, HeldDirections, MotionModel};

// ============================================================================
// Type Aliases
// ============================================================================

/// Stable identifier of an entity within a session.
///
/// Assigned by the server; for players this is the transport-level
/// connection identifier.
pub type EntityId = String;

/// A pair of world-space coordinates or vector components.
pub type Vec2 = [f64; 2];

// ============================================================================
// Smoothing
// ============================================================================

/// Default weight given to a freshly received value when smoothing remote
/// motion (90% new, 10% previous).
pub const DEFAULT_BLEND_WEIGHT: f64 = 0.9;

/// Convex combination of a newly received value and the previously held one.
///
/// `weight` is the share of `new`; `weight == 1.0` disables smoothing.
/// Blending a value with itself returns it exactly.
pub fn blend(new: f64, prior: f64, weight: f64) -> f64 {
    prior + (new - prior) * weight
}

// ============================================================================
// Core Types
// ============================================================================

/// Server-owned descriptive fields shared by every player entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerAttributes {
    pub name: String,
    pub room: String,
    pub team: String,
    pub health: f64,
    pub shield: f64,
    pub experience: f64,
}

/// Motion fields of a remote entity. These are the fields that get smoothed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RemoteMotion {
    pub position: Vec2,
    /// Heading in radians.
    pub heading: f64,
    pub speed: f64,
}

impl RemoteMotion {
    /// Blend every field of `self` (the new value) with `prior`.
    pub fn blended_with(self, prior: RemoteMotion, weight: f64) -> RemoteMotion {
        RemoteMotion {
            position: [
                blend(self.position[0], prior.position[0], weight),
                blend(self.position[1], prior.position[1], weight),
            ],
            heading: blend(self.heading, prior.heading, weight),
            speed: blend(self.speed, prior.speed, weight),
        }
    }

    /// Euclidean distance between the two positions.
    pub fn distance_to(&self, position: Vec2) -> f64 {
        let dx = self.position[0] - position[0];
        let dy = self.position[1] - position[1];
        (dx * dx + dy * dy).sqrt()
    }
}

/// A fully validated entity-state record taken from a snapshot.
///
/// Records only exist once every field has been checked for presence; a
/// partially filled record never reaches the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub attributes: PlayerAttributes,
    pub motion: RemoteMotion,
}

/// An entity mirrored from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub id: EntityId,
    pub motion: RemoteMotion,
    pub attributes: PlayerAttributes,
}

impl RemoteEntity {
    fn from_record(id: EntityId, record: &EntityRecord) -> Self {
        Self {
            id,
            motion: record.motion,
            attributes: record.attributes.clone(),
        }
    }
}

/// The entity driven by this client's own input.
///
/// Its position and velocity are owned by the local motion model; snapshots
/// only ever touch its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntity {
    pub id: EntityId,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Scales the maximum speed the motion model will accelerate to.
    pub speed_multiplier: f64,
    /// True if at least one direction was applied on the last tick.
    pub is_moving: bool,
    pub attributes: PlayerAttributes,
}

impl LocalEntity {
    /// Create a local entity at rest at `position`.
    pub fn new(id: EntityId, position: Vec2) -> Self {
        Self {
            id,
            position,
            velocity: [0.0, 0.0],
            speed_multiplier: 1.0,
            is_moving: false,
            attributes: PlayerAttributes::default(),
        }
    }

    /// Velocity decays asymptotically, so "stopped" means both components
    /// are within `epsilon` of zero.
    pub fn is_stopped(&self, epsilon: f64) -> bool {
        self.velocity[0].abs() <= epsilon && self.velocity[1].abs() <= epsilon
    }
}

/// Tagged union over the entity variants held by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Remote(RemoteEntity),
    Local(LocalEntity),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Self::Remote(e) => &e.id,
            Self::Local(e) => &e.id,
        }
    }

    pub fn position(&self) -> Vec2 {
        match self {
            Self::Remote(e) => e.motion.position,
            Self::Local(e) => e.position,
        }
    }

    pub fn attributes(&self) -> &PlayerAttributes {
        match self {
            Self::Remote(e) => &e.attributes,
            Self::Local(e) => &e.attributes,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn as_remote(&self) -> Option<&RemoteEntity> {
        match self {
            Self::Remote(e) => Some(e),
            Self::Local(_) => None,
        }
    }

    pub fn as_local(&self) -> Option<&LocalEntity> {
        match self {
            Self::Local(e) => Some(e),
            Self::Remote(_) => None,
        }
    }

    /// Apply an authoritative record by direct assignment.
    ///
    /// Remote entities take every field. The local entity only takes its
    /// attributes; its position and velocity belong to the motion model.
    pub fn apply_snapshot_update(&mut self, record: &EntityRecord) {
        match self {
            Self::Remote(e) => {
                e.motion = record.motion;
                e.attributes = record.attributes.clone();
            }
            Self::Local(e) => {
                e.attributes = record.attributes.clone();
            }
        }
    }
}

// ============================================================================
// Entity Registry
// ============================================================================

/// Outcome of applying one record to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// Mapping from identifier to entity: the single source of truth for what
/// exists on the client right now.
///
/// Invariant: if `local_id()` is set, exactly one entity carries that id
/// and it is an [`Entity::Local`].
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, Entity>,
    local_id: Option<EntityId>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier of the locally-controlled entity, once a session has joined.
    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn is_local_id(&self, id: &str) -> bool {
        self.local_id.as_deref() == Some(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Iterate all entities in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Iterate every entity except the local one.
    pub fn remotes(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values().filter_map(Entity::as_remote)
    }

    pub fn local(&self) -> Option<&LocalEntity> {
        let id = self.local_id.as_deref()?;
        self.entities.get(id).and_then(Entity::as_local)
    }

    pub fn local_mut(&mut self) -> Option<&mut LocalEntity> {
        let id = self.local_id.as_deref()?;
        match self.entities.get_mut(id) {
            Some(Entity::Local(e)) => Some(e),
            _ => None,
        }
    }

    /// Install the local entity under `id`.
    ///
    /// Any previous local entity (under a different id) is dropped. If the
    /// server already described `id` as a remote entity, its position and
    /// attributes seed the new local entity.
    pub fn spawn_local(&mut self, id: &str) -> &mut LocalEntity {
        if let Some(previous) = self.local_id.take()
            && previous != id
        {
            self.entities.remove(&previous);
        }

        let local = match self.entities.remove(id) {
            Some(Entity::Local(existing)) => existing,
            Some(Entity::Remote(remote)) => {
                let mut local = LocalEntity::new(remote.id, remote.motion.position);
                local.attributes = remote.attributes;
                local
            }
            None => LocalEntity::new(id.to_string(), [0.0, 0.0]),
        };

        self.local_id = Some(id.to_string());
        match self
            .entities
            .entry(id.to_string())
            .insert_entry(Entity::Local(local))
            .into_mut()
        {
            Entity::Local(e) => e,
            Entity::Remote(_) => unreachable!("local slot holds a local entity"),
        }
    }

    /// Apply a validated record: update in place if the id exists, otherwise
    /// create a remote entity.
    pub fn upsert(&mut self, id: &str, record: &EntityRecord) -> Upsert {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.apply_snapshot_update(record);
            Upsert::Updated
        } else {
            self.entities.insert(
                id.to_string(),
                Entity::Remote(RemoteEntity::from_record(id.to_string(), record)),
            );
            Upsert::Created
        }
    }

    /// Remove a remote entity. The local entity cannot be removed this way;
    /// use [`EntityRegistry::clear`] on teardown.
    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        if self.is_local_id(id) {
            return None;
        }
        self.entities.remove(id)
    }

    /// Capture the motion of every remote entity.
    pub fn remote_motion(&self) -> HashMap<EntityId, RemoteMotion> {
        self.remotes()
            .map(|e| (e.id.clone(), e.motion))
            .collect()
    }

    /// Smooth each remote entity's current motion against `prior`.
    ///
    /// Entities without a prior entry (newly created) are left as assigned.
    pub fn blend_remotes(&mut self, prior: &HashMap<EntityId, RemoteMotion>, weight: f64) {
        for entity in self.entities.values_mut() {
            if let Entity::Remote(remote) = entity
                && let Some(before) = prior.get(&remote.id)
            {
                remote.motion = remote.motion.blended_with(*before, weight);
            }
        }
    }

    /// Drop every entity and forget the local identifier.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.local_id = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
