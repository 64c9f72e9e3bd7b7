//! Per-node checkpoint histories.
//!
//! A [`History`] is an append-only sequence of `(time, value)` pairs ordered by
//! strictly increasing time. Reads ask for the value "at or before" a time and
//! are answered with a binary search, so a reader looking at a past time never
//! observes a write issued later.
//!
//! [`CheckpointStore`] maps node addresses to histories. It knows nothing about
//! the tree shape: an address that was never written reads as zero at any time.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::{NodeId, Time, Weight};

/// A single versioned value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint<V> {
    pub time: Time,
    pub value: V,
}

/// Ordered history of one value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct History<V> {
    entries: Vec<Checkpoint<V>>,
}

impl<V: Copy> History<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn last_time(&self) -> Option<Time> {
        self.entries.last().map(|c| c.time)
    }

    /// Most recent value regardless of time.
    #[inline]
    pub fn latest(&self) -> Option<V> {
        self.entries.last().map(|c| c.value)
    }

    /// Value of the latest checkpoint with `checkpoint.time <= time`.
    pub fn at_or_before(&self, time: Time) -> Option<V> {
        // Fast path: most reads target the present.
        match self.entries.last() {
            None => return None,
            Some(last) if last.time <= time => return Some(last.value),
            _ => {}
        }
        let idx = self.entries.partition_point(|c| c.time <= time);
        if idx == 0 {
            None
        } else {
            Some(self.entries[idx - 1].value)
        }
    }

    /// Returns `Err(last)` when `time` is older than the last checkpoint.
    #[inline]
    pub fn check_writable(&self, time: Time) -> std::result::Result<(), Time> {
        match self.last_time() {
            Some(last) if time < last => Err(last),
            _ => Ok(()),
        }
    }

    /// Appends a checkpoint, or overwrites the last one when it has the same
    /// time. On `Err(last)` nothing was written.
    pub fn record(&mut self, time: Time, value: V) -> std::result::Result<(), Time> {
        self.check_writable(time)?;
        match self.entries.last_mut() {
            Some(last) if last.time == time => last.value = value,
            _ => self.entries.push(Checkpoint { time, value }),
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint<V>> + '_ {
        self.entries.iter()
    }

    pub fn shrink_to_fit(&mut self) {
        self.entries.shrink_to_fit();
    }
}

impl<V: Copy> Default for History<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Versioned map from node address to value history.
#[derive(Clone, Debug, Default)]
pub struct CheckpointStore {
    histories: HashMap<NodeId, History<Weight>>,
    history_capacity: usize,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::with_history_capacity(0)
    }

    /// `history_capacity` is reserved up front for every node touched for the
    /// first time.
    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            histories: HashMap::new(),
            history_capacity,
        }
    }

    /// Number of nodes holding at least one checkpoint.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.histories.len()
    }

    /// Total number of checkpoints across all nodes.
    pub fn checkpoint_count(&self) -> usize {
        self.histories.values().map(History::len).sum()
    }

    #[inline]
    pub fn history(&self, node: NodeId) -> Option<&History<Weight>> {
        self.histories.get(&node)
    }

    pub fn histories(&self) -> impl Iterator<Item = (NodeId, &History<Weight>)> + '_ {
        self.histories.iter().map(|(node, h)| (*node, h))
    }

    /// Current value of `node`, zero if it was never written.
    #[inline]
    pub fn latest(&self, node: NodeId) -> Weight {
        self.histories
            .get(&node)
            .and_then(History::latest)
            .unwrap_or(0)
    }

    /// Value of `node` at or before `time`, zero if it had not been written yet.
    #[inline]
    pub fn value_at_or_before(&self, node: NodeId, time: Time) -> Weight {
        self.histories
            .get(&node)
            .and_then(|h| h.at_or_before(time))
            .unwrap_or(0)
    }

    /// Fails if a write to `node` at `time` would move its clock backwards.
    pub fn check_writable(&self, node: NodeId, time: Time) -> Result<()> {
        match self.histories.get(&node) {
            Some(history) => history
                .check_writable(time)
                .map_err(|last| time_travel(node, time, last)),
            None => Ok(()),
        }
    }

    pub fn record(&mut self, node: NodeId, time: Time, value: Weight) -> Result<()> {
        let capacity = self.history_capacity;
        self.histories
            .entry(node)
            .or_insert_with(|| History::with_capacity(capacity))
            .record(time, value)
            .map_err(|last| time_travel(node, time, last))
    }

    pub fn shrink_to_fit(&mut self) {
        self.histories.shrink_to_fit();
        for history in self.histories.values_mut() {
            history.shrink_to_fit();
        }
    }
}

fn time_travel(node: NodeId, time: Time, last: Time) -> Error {
    Error::TimeTravel {
        level: node.level,
        index: node.index,
        time,
        last,
    }
}
