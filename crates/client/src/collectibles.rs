//! Ephemeral collectible sync.
//!
//! Applies the join-time full sequence and positional removals to a
//! [`CollectibleRegistry`]. Removal indices are not reconciled against any
//! identifier, so a lost or reordered removal silently desynchronizes the
//! sequence from the server's.

use lattice_wire::{CollectibleFullProto, CollectibleRemovedProto};
use lattice_world::{Collectible, CollectibleRegistry};
use tracing::{debug, warn};

use crate::error::SyncError;

/// Replace the whole sequence. Returns the new length.
pub fn apply_full(registry: &mut CollectibleRegistry, full: CollectibleFullProto) -> usize {
    let len = registry.replace_all(full.collectibles.into_iter().map(|c| c.type_tag));
    debug!(len, "collectible sequence replaced");
    len
}

/// Remove the collectible at the message's index.
///
/// An out-of-range index leaves the registry untouched and is returned as
/// [`SyncError::OutOfRangeRemoval`] for the caller to log.
pub fn apply_removal(
    registry: &mut CollectibleRegistry,
    removed: CollectibleRemovedProto,
) -> Result<Collectible, SyncError> {
    let collectible = registry.remove_at(removed.index)?;
    debug!(
        index = removed.index,
        type_tag = collectible.type_tag,
        remaining = registry.len(),
        "collectible removed"
    );
    Ok(collectible)
}

/// [`apply_removal`], logging and dropping an out-of-range index.
pub fn apply_removal_or_log(
    registry: &mut CollectibleRegistry,
    removed: CollectibleRemovedProto,
) -> Option<Collectible> {
    match apply_removal(registry, removed) {
        Ok(c) => Some(c),
        Err(err) => {
            warn!(%err, "dropping collectible removal");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(tags: &[u32]) -> CollectibleFullProto {
        tags.iter().copied().collect()
    }

    #[test]
    fn test_full_then_removals() {
        let mut registry = CollectibleRegistry::new();
        assert_eq!(apply_full(&mut registry, full(&[1, 2, 3])), 3);

        let c = apply_removal(&mut registry, CollectibleRemovedProto { index: 1 }).unwrap();
        assert_eq!(c.type_tag, 2);
        assert_eq!(registry.type_tags(), vec![1, 3]);

        let c = apply_removal(&mut registry, CollectibleRemovedProto { index: 1 }).unwrap();
        assert_eq!(c.type_tag, 3);
        assert_eq!(registry.type_tags(), vec![1]);
    }

    #[test]
    fn test_out_of_range_is_local_error() {
        let mut registry = CollectibleRegistry::new();
        apply_full(&mut registry, full(&[1, 2]));

        let err = apply_removal(&mut registry, CollectibleRemovedProto { index: 5 }).unwrap_err();
        assert!(matches!(err, SyncError::OutOfRangeRemoval(_)));
        assert_eq!(err.severity(), crate::Severity::Local);
        assert_eq!(registry.type_tags(), vec![1, 2]);

        assert!(apply_removal_or_log(&mut registry, CollectibleRemovedProto { index: 2 }).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_second_full_sequence_replaces_first() {
        let mut registry = CollectibleRegistry::new();
        apply_full(&mut registry, full(&[1, 2, 3]));
        apply_removal(&mut registry, CollectibleRemovedProto { index: 0 }).unwrap();

        apply_full(&mut registry, full(&[7, 8]));
        assert_eq!(registry.type_tags(), vec![7, 8]);
        assert_eq!(registry.get(1).unwrap().slot, 1);
    }
}
