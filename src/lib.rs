//! # hex-sum-tree
//!
//! A checkpointed 16-ary sum tree with point-in-time weighted sortition.
//!
//! Every leaf holds a non-negative weight and every internal node holds the sum
//! of its 16 children. Each node keeps an append-only history of `(time, value)`
//! checkpoints, so the tree can be read as it stood at any past time. Sortition
//! maps offsets in `[0, total)` to the leaf whose cumulative weight range
//! contains them, against any such snapshot.
//!
//! Time is supplied by the caller on every write and every historical read. It
//! must never move backwards for a node: writes that would rewrite the past are
//! rejected, which is what makes past snapshots immutable.
//!
//! ## Example
//!
//! ```rust
//! use hex_sum_tree::HexSumTree;
//!
//! let mut tree = HexSumTree::new();
//! for _ in 0..5 {
//!     tree.insert(0, 10).unwrap();
//! }
//! assert_eq!(tree.total_sum(), 50);
//!
//! tree.update(5, 2, 25).unwrap();
//! assert_eq!(tree.total_sum(), 65);
//! assert_eq!(tree.item_at(2, 4), 10);
//! assert_eq!(tree.item_at(2, 5), 25);
//!
//! // Ranges: [0,10) [10,20) [20,45) [45,55) [55,65)
//! let keys = tree.sortition(&[0, 15, 35, 55], 5).unwrap();
//! assert_eq!(keys, vec![0, 1, 2, 4]);
//! ```

#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod error;
pub mod journal;
pub mod shared;
mod sortition;

pub use checkpoint::{Checkpoint, CheckpointStore, History};
pub use error::{Error, Result};
pub use journal::{Journal, JournalEntry};
pub use shared::SharedSumTree;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Leaf and node magnitude.
pub type Weight = u128;
/// Caller-supplied checkpoint time.
pub type Time = u64;
/// Leaf key, assigned sequentially from zero.
pub type Key = u64;

// =============================================================================
// Configuration
// =============================================================================

pub const CHILDREN: usize = 16;
pub const BITS_PER_LEVEL: u32 = 4;
pub const INITIAL_DEPTH: u32 = 1;
/// Deepest tree reachable with `u64` keys.
pub const MAX_DEPTH: u32 = Key::BITS / BITS_PER_LEVEL;

/// Tuning and limits for a [`HexSumTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest value any node may hold. Writes above it fail with
    /// [`Error::Overflow`].
    pub max_value: Weight,
    /// Initial capacity reserved for a node's history when it is first written.
    pub history_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_value: Weight::MAX,
            history_capacity: 4,
        }
    }
}

// =============================================================================
// Addressing
// =============================================================================

/// Arena address of a node: `level` 0 holds leaves, `level == depth` the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub level: u32,
    pub index: u64,
}

impl NodeId {
    #[inline]
    pub const fn new(level: u32, index: u64) -> Self {
        Self { level, index }
    }

    #[inline]
    pub const fn leaf(key: Key) -> Self {
        Self::new(0, key)
    }

    #[inline]
    pub const fn root(depth: u32) -> Self {
        Self::new(depth, 0)
    }

    /// The node at `level` whose subtree contains leaf `key`.
    #[inline]
    pub fn ancestor_of(key: Key, level: u32) -> Self {
        let index = key.checked_shr(level * BITS_PER_LEVEL).unwrap_or(0);
        Self::new(level, index)
    }

    /// Child in `slot` (`0..CHILDREN`) one level down.
    #[inline]
    pub fn child(self, slot: usize) -> Self {
        debug_assert!(self.level > 0);
        debug_assert!(slot < CHILDREN);
        Self::new(self.level - 1, (self.index << BITS_PER_LEVEL) | slot as u64)
    }
}

/// Number of leaf keys addressable by a tree of `depth` levels.
#[inline]
fn capacity(depth: u32) -> u128 {
    debug_assert!(depth <= MAX_DEPTH);
    1u128 << (depth * BITS_PER_LEVEL)
}

/// Smallest depth that can address every key below `next_key`.
fn depth_for(next_key: Key) -> u32 {
    let mut depth = INITIAL_DEPTH;
    while capacity(depth) < u128::from(next_key) {
        depth += 1;
    }
    depth
}

/// Moves `current` by the difference between `new` and `old`.
#[inline]
fn shift(current: Weight, old: Weight, new: Weight) -> Option<Weight> {
    if new >= old {
        current.checked_add(new - old)
    } else {
        current.checked_sub(old - new)
    }
}

// =============================================================================
// Tree
// =============================================================================

/// Sum tree with branching factor 16, dynamic depth and per-node checkpoints.
///
/// Mutations take `&mut self`, so the borrow checker already enforces a single
/// writer. Wrap the tree in a [`SharedSumTree`] to share it across threads.
#[derive(Clone, Debug)]
pub struct HexSumTree {
    pub(crate) checkpoints: CheckpointStore,
    pub(crate) depth: u32,
    /// Depth in effect over time; the root of a past snapshot is
    /// `(depth_at(time), 0)`.
    pub(crate) depth_history: History<u32>,
    pub(crate) next_key: Key,
    pub(crate) config: Config,
}

impl HexSumTree {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            checkpoints: CheckpointStore::with_history_capacity(config.history_capacity),
            depth: INITIAL_DEPTH,
            depth_history: History::new(),
            next_key: 0,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `(depth, next_key)`.
    #[inline]
    pub fn state(&self) -> (u32, Key) {
        (self.depth, self.next_key)
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn next_key(&self) -> Key {
        self.next_key
    }

    /// Number of keys handed out so far, including any skipped by
    /// [`set_next_key`](Self::set_next_key).
    #[inline]
    pub fn len(&self) -> u64 {
        self.next_key
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.next_key == 0
    }

    #[inline]
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn depth_at(&self, time: Time) -> u32 {
        self.depth_history
            .at_or_before(time)
            .unwrap_or(INITIAL_DEPTH)
    }

    pub fn total_sum(&self) -> Weight {
        self.checkpoints.latest(NodeId::root(self.depth))
    }

    pub fn total_sum_at(&self, time: Time) -> Weight {
        let root = NodeId::root(self.depth_at(time));
        self.checkpoints.value_at_or_before(root, time)
    }

    pub fn value_at(&self, level: u32, index: u64, time: Time) -> Weight {
        self.checkpoints
            .value_at_or_before(NodeId::new(level, index), time)
    }

    /// Current weight of leaf `key`; zero for keys never written.
    pub fn item(&self, key: Key) -> Weight {
        self.checkpoints.latest(NodeId::leaf(key))
    }

    pub fn item_at(&self, key: Key, time: Time) -> Weight {
        self.checkpoints
            .value_at_or_before(NodeId::leaf(key), time)
    }

    /// Appends a leaf holding `weight` and returns its key.
    ///
    /// Adds a root level first when the new key does not fit the current depth.
    pub fn insert(&mut self, time: Time, weight: Weight) -> Result<Key> {
        let key = self.next_key;
        let next_key = key.checked_add(1).ok_or(Error::KeySpaceExhausted)?;
        let target_depth = depth_for(next_key).max(self.depth);

        self.stage_leaf(key, weight, target_depth)
            .and_then(|writes| self.commit(time, &writes, target_depth))
            .inspect_err(|err| warn!(%err, key, time, "insert rejected"))?;
        self.next_key = next_key;

        trace!(key, %weight, time, total = %self.total_sum(), "inserted leaf");
        Ok(key)
    }

    /// Replaces the weight of an assigned leaf.
    pub fn update(&mut self, time: Time, key: Key, weight: Weight) -> Result<()> {
        if key >= self.next_key {
            return Err(Error::InvalidKey {
                key,
                next_key: self.next_key,
            });
        }

        let depth = self.depth;
        self.stage_leaf(key, weight, depth)
            .and_then(|writes| self.commit(time, &writes, depth))
            .inspect_err(|err| warn!(%err, key, time, "update rejected"))?;

        trace!(key, %weight, time, total = %self.total_sum(), "updated leaf");
        Ok(())
    }

    /// Moves the key counter forward to `next_key`, growing the tree at `time`
    /// if the new counter needs more levels. Skipped keys are never assigned.
    pub fn set_next_key(&mut self, time: Time, next_key: Key) -> Result<()> {
        if next_key < self.next_key {
            return Err(Error::KeyRegression {
                requested: next_key,
                next_key: self.next_key,
            });
        }

        let target_depth = depth_for(next_key).max(self.depth);
        let total = self.total_sum();
        let writes: Vec<(NodeId, Weight)> = (self.depth + 1..=target_depth)
            .map(|level| (NodeId::root(level), total))
            .collect();
        self.commit(time, &writes, target_depth)
            .inspect_err(|err| warn!(%err, next_key, time, "key counter jump rejected"))?;

        debug!(from = self.next_key, to = next_key, depth = self.depth, "advanced next key");
        self.next_key = next_key;
        Ok(())
    }

    pub fn shrink_to_fit(&mut self) {
        self.checkpoints.shrink_to_fit();
        self.depth_history.shrink_to_fit();
    }

    /// Computes the new values of leaf `key` and all its ancestors up to
    /// `target_depth` without touching the store.
    ///
    /// Levels above the current depth are roots about to be created; each
    /// starts from the current total.
    fn stage_leaf(
        &self,
        key: Key,
        weight: Weight,
        target_depth: u32,
    ) -> Result<Vec<(NodeId, Weight)>> {
        let max = self.config.max_value;
        let leaf = NodeId::leaf(key);
        if weight > max {
            return Err(overflow(leaf));
        }

        let old = self.checkpoints.latest(leaf);
        let total = self.total_sum();
        let mut writes = Vec::with_capacity(target_depth as usize + 1);
        writes.push((leaf, weight));

        for level in 1..=target_depth {
            let node = NodeId::ancestor_of(key, level);
            let current = if level > self.depth {
                debug_assert_eq!(node.index, 0);
                total
            } else {
                self.checkpoints.latest(node)
            };
            let value = shift(current, old, weight)
                .filter(|v| *v <= max)
                .ok_or_else(|| overflow(node))?;
            writes.push((node, value));
        }
        Ok(writes)
    }

    /// Validates every write against the node clocks, then applies them all.
    ///
    /// Every mutation writes the root in effect, so the current root's clock is
    /// the tree's last write time. A growth step writes only new nodes and must
    /// still be checked against it.
    fn commit(&mut self, time: Time, writes: &[(NodeId, Weight)], new_depth: u32) -> Result<()> {
        for &(node, _) in writes {
            self.checkpoints.check_writable(node, time)?;
        }
        let grows = new_depth > self.depth;
        if grows {
            self.checkpoints
                .check_writable(NodeId::root(self.depth), time)?;
            self.depth_history
                .check_writable(time)
                .map_err(|last| Error::TimeTravel {
                    level: new_depth,
                    index: 0,
                    time,
                    last,
                })?;
        }

        for &(node, value) in writes {
            self.checkpoints.record(node, time, value)?;
        }
        if grows {
            self.depth_history
                .record(time, new_depth)
                .map_err(|last| Error::TimeTravel {
                    level: new_depth,
                    index: 0,
                    time,
                    last,
                })?;
            debug!(from = self.depth, to = new_depth, time, "tree grew");
            self.depth = new_depth;
        }
        Ok(())
    }
}

impl Default for HexSumTree {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn overflow(node: NodeId) -> Error {
    Error::Overflow {
        level: node.level,
        index: node.index,
    }
}


#[cfg(test)]
mod proptests;
