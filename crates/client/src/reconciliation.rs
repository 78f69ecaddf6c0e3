//! Reconciliation engine.
//!
//! Applies authoritative snapshots to the [`EntityRegistry`]:
//!
//! 1. Capture the motion of every remote entity.
//! 2. For each snapshot entry: remove on tombstone, assign on record.
//! 3. Blend every remote entity that existed before the snapshot against its
//!    captured motion.
//!
//! The local entity's position and velocity are never touched here; there
//! is no server correction of local motion.

use lattice_wire::SnapshotProto;
use lattice_world::{EntityId, EntityRecord, EntityRegistry, Upsert};
use tracing::{debug, warn};

use crate::error::SyncError;

/// What one snapshot did to the registry.
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub created: Vec<EntityId>,
    pub updated: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    /// Entries skipped because their record failed validation. The prior
    /// state of each is retained.
    pub rejected: Vec<SyncError>,
}

impl ReconciliationReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.rejected.is_empty()
    }
}

/// Exponential smoothing of remote entities against authoritative snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconciliationEngine {
    blend_weight: f64,
}

impl ReconciliationEngine {
    /// # Panics
    /// If `blend_weight` is not in (0, 1].
    pub fn new(blend_weight: f64) -> Self {
        assert!(
            blend_weight > 0.0 && blend_weight <= 1.0,
            "blend_weight must be in (0, 1], got {blend_weight}"
        );
        Self { blend_weight }
    }

    pub fn blend_weight(&self) -> f64 {
        self.blend_weight
    }

    pub fn apply(&self, registry: &mut EntityRegistry, snapshot: SnapshotProto) -> ReconciliationReport {
        let prior = registry.remote_motion();
        let mut report = ReconciliationReport::default();

        for (id, slot) in snapshot.entities {
            let Some(proto) = slot.record else {
                if registry.is_local_id(&id) {
                    warn!(%id, "ignoring tombstone for local entity");
                } else if registry.remove(&id).is_some() {
                    debug!(%id, "entity removed");
                    report.removed.push(id);
                }
                continue;
            };

            let record = match EntityRecord::try_from(proto) {
                Ok(record) => record,
                Err(source) => {
                    let err = SyncError::MalformedSnapshotEntry { id, source };
                    warn!(%err, "skipping snapshot entry");
                    report.rejected.push(err);
                    continue;
                }
            };

            match registry.upsert(&id, &record) {
                Upsert::Created => {
                    debug!(%id, "entity created");
                    report.created.push(id);
                }
                Upsert::Updated => report.updated.push(id),
            }
        }

        registry.blend_remotes(&prior, self.blend_weight);
        report
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(lattice_world::DEFAULT_BLEND_WEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use lattice_wire::{EntityRecordProto, EntitySlotProto};
    use lattice_world::{PlayerAttributes, RemoteMotion};

    use super::*;

    fn record(x: f64, y: f64) -> EntityRecordProto {
        EntityRecord {
            attributes: PlayerAttributes {
                name: "bob".to_string(),
                room: "r".to_string(),
                team: "green".to_string(),
                health: 50.0,
                shield: 1.0,
                experience: 2.0,
            },
            motion: RemoteMotion {
                position: [x, y],
                heading: 1.0,
                speed: 4.0,
            },
        }
        .into()
    }

    fn snapshot(entries: Vec<(&str, Option<EntityRecordProto>)>) -> SnapshotProto {
        SnapshotProto {
            entities: entries
                .into_iter()
                .map(|(id, r)| (id.to_string(), EntitySlotProto { record: r }))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_new_entity_is_not_blended() {
        let engine = ReconciliationEngine::default();
        let mut registry = EntityRegistry::new();

        let report = engine.apply(&mut registry, snapshot(vec![("p1", Some(record(10.0, 20.0)))]));

        assert_eq!(report.created, vec!["p1".to_string()]);
        assert_eq!(registry.get("p1").unwrap().position(), [10.0, 20.0]);
    }

    #[test]
    fn test_repeated_identical_snapshot_is_idempotent() {
        let engine = ReconciliationEngine::default();
        let mut registry = EntityRegistry::new();
        let snap = snapshot(vec![("p1", Some(record(3.0, -4.0)))]);

        engine.apply(&mut registry, snap.clone());
        let once = registry.get("p1").cloned();
        engine.apply(&mut registry, snap);

        assert_eq!(registry.get("p1").cloned(), once);
    }

    #[test]
    fn test_existing_entity_blends_toward_target() {
        let engine = ReconciliationEngine::new(0.9);
        let mut registry = EntityRegistry::new();
        engine.apply(&mut registry, snapshot(vec![("p1", Some(record(0.0, 0.0)))]));

        engine.apply(&mut registry, snapshot(vec![("p1", Some(record(10.0, 0.0)))]));

        let x = registry.get("p1").unwrap().position()[0];
        assert!((x - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_convergence_bound() {
        let weight = 0.9;
        let engine = ReconciliationEngine::new(weight);
        let mut registry = EntityRegistry::new();
        engine.apply(&mut registry, snapshot(vec![("p1", Some(record(0.0, 0.0)))]));

        let target = [30.0, -40.0];
        let initial = 50.0;
        for n in 1..=8 {
            engine.apply(
                &mut registry,
                snapshot(vec![("p1", Some(record(target[0], target[1])))]),
            );
            let remote = registry.get("p1").unwrap().as_remote().unwrap();
            let bound = initial * (1.0 - weight).powi(n);
            assert!(remote.motion.distance_to(target) <= bound + 1e-9);
        }
    }

    #[test]
    fn test_tombstone_removes_entity() {
        let engine = ReconciliationEngine::default();
        let mut registry = EntityRegistry::new();
        engine.apply(&mut registry, snapshot(vec![("p1", Some(record(1.0, 1.0)))]));

        let report = engine.apply(&mut registry, snapshot(vec![("p1", None)]));

        assert_eq!(report.removed, vec!["p1".to_string()]);
        assert!(registry.get("p1").is_none());
    }

    #[test]
    fn test_omitted_ids_are_unchanged() {
        let engine = ReconciliationEngine::default();
        let mut registry = EntityRegistry::new();
        engine.apply(
            &mut registry,
            snapshot(vec![("p1", Some(record(1.0, 1.0))), ("p2", Some(record(2.0, 2.0)))]),
        );

        engine.apply(&mut registry, snapshot(vec![("p2", Some(record(2.0, 2.0)))]));

        assert_eq!(registry.get("p1").unwrap().position(), [1.0, 1.0]);
    }

    #[test]
    fn test_local_entity_position_is_not_touched() {
        let engine = ReconciliationEngine::default();
        let mut registry = EntityRegistry::new();
        registry.spawn_local("me").position = [5.0, 5.0];

        let mut proto = record(-100.0, -100.0);
        proto.health = Some(12.0);
        engine.apply(&mut registry, snapshot(vec![("me", Some(proto))]));

        let local = registry.local().unwrap();
        assert_eq!(local.position, [5.0, 5.0]);
        assert_eq!(local.attributes.health, 12.0);
    }

    #[test]
    fn test_local_tombstone_is_ignored() {
        let engine = ReconciliationEngine::default();
        let mut registry = EntityRegistry::new();
        registry.spawn_local("me");

        let report = engine.apply(&mut registry, snapshot(vec![("me", None)]));

        assert!(report.removed.is_empty());
        assert!(registry.local().is_some());
    }

    #[test]
    fn test_malformed_entry_skipped_rest_applied() {
        let engine = ReconciliationEngine::default();
        let mut registry = EntityRegistry::new();
        engine.apply(&mut registry, snapshot(vec![("p1", Some(record(1.0, 1.0)))]));

        let mut bad = record(50.0, 50.0);
        bad.y = None;
        let report = engine.apply(
            &mut registry,
            snapshot(vec![("p1", Some(bad)), ("p2", Some(record(7.0, 7.0)))]),
        );

        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            &report.rejected[0],
            SyncError::MalformedSnapshotEntry { id, .. } if id == "p1"
        ));
        assert_eq!(registry.get("p1").unwrap().position(), [1.0, 1.0]);
        assert_eq!(registry.get("p2").unwrap().position(), [7.0, 7.0]);
    }

    #[test]
    #[should_panic(expected = "blend_weight must be in (0, 1]")]
    fn test_zero_blend_weight_rejected() {
        ReconciliationEngine::new(0.0);
    }
}
