//! Ordered collectible sequence.
//!
//! Collectibles are addressed by position, not identifier: the server sends
//! the full sequence once and then removal indices. The client sequence only
//! stays in agreement with the server's if every removal is applied, in
//! order, against the same starting sequence.

use thiserror::Error;

/// A pickup-style world object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collectible {
    /// Server-defined kind of collectible.
    pub type_tag: u32,
    /// Index assigned when the full sequence arrived. The effective index
    /// is the collectible's current position in the registry.
    pub slot: usize,
}

/// Failure to apply a positional removal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemovalError {
    #[error("collectible index {index} out of range for {len} collectibles")]
    OutOfRange { index: u64, len: usize },
}

/// Order-sensitive sequence of collectibles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectibleRegistry {
    items: Vec<Collectible>,
}

impl CollectibleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole sequence, assigning each collectible the slot equal
    /// to its position in `type_tags`. Returns the new length.
    pub fn replace_all<I>(&mut self, type_tags: I) -> usize
    where
        I: IntoIterator<Item = u32>,
    {
        self.items = type_tags
            .into_iter()
            .enumerate()
            .map(|(slot, type_tag)| Collectible { type_tag, slot })
            .collect();
        self.items.len()
    }

    /// Remove the collectible currently at `index`; later collectibles shift
    /// down by one.
    pub fn remove_at(&mut self, index: u64) -> Result<Collectible, RemovalError> {
        let len = self.items.len();
        match usize::try_from(index) {
            Ok(i) if i < len => Ok(self.items.remove(i)),
            _ => Err(RemovalError::OutOfRange { index, len }),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Collectible> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collectible> {
        self.items.iter()
    }

    /// Type tags in sequence order.
    pub fn type_tags(&self) -> Vec<u32> {
        self.items.iter().map(|c| c.type_tag).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
