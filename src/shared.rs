//! Thread-safe handle: one writer at a time, any number of readers.

use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::Result;
use crate::{Config, HexSumTree, Key, Time, Weight};

/// A [`HexSumTree`] behind a read-write lock.
///
/// Each mutation holds the write lock for its whole ancestor propagation, so
/// readers never see a half-applied write.
#[derive(Debug, Default)]
pub struct SharedSumTree {
    inner: RwLock<HexSumTree>,
}

impl SharedSumTree {
    pub fn new() -> Self {
        Self::from_tree(HexSumTree::new())
    }

    pub fn with_config(config: Config) -> Self {
        Self::from_tree(HexSumTree::with_config(config))
    }

    pub fn from_tree(tree: HexSumTree) -> Self {
        Self {
            inner: RwLock::new(tree),
        }
    }

    pub fn into_inner(self) -> HexSumTree {
        self.inner.into_inner()
    }

    /// Read guard for running several queries against one consistent state.
    pub fn read(&self) -> RwLockReadGuard<'_, HexSumTree> {
        self.inner.read()
    }

    pub fn insert(&self, time: Time, weight: Weight) -> Result<Key> {
        self.inner.write().insert(time, weight)
    }

    pub fn update(&self, time: Time, key: Key, weight: Weight) -> Result<()> {
        self.inner.write().update(time, key, weight)
    }

    pub fn set_next_key(&self, time: Time, next_key: Key) -> Result<()> {
        self.inner.write().set_next_key(time, next_key)
    }

    pub fn state(&self) -> (u32, Key) {
        self.inner.read().state()
    }

    pub fn total_sum(&self) -> Weight {
        self.inner.read().total_sum()
    }

    pub fn total_sum_at(&self, time: Time) -> Weight {
        self.inner.read().total_sum_at(time)
    }

    pub fn value_at(&self, level: u32, index: u64, time: Time) -> Weight {
        self.inner.read().value_at(level, index, time)
    }

    pub fn item_at(&self, key: Key, time: Time) -> Weight {
        self.inner.read().item_at(key, time)
    }

    pub fn sortition(&self, offsets: &[Weight], time: Time) -> Result<Vec<Key>> {
        self.inner.read().sortition(offsets, time)
    }
}

impl From<HexSumTree> for SharedSumTree {
    fn from(tree: HexSumTree) -> Self {
        Self::from_tree(tree)
    }
}
