//! Flat, replayable export of a tree.
//!
//! A journal is a header `(depth, next_key)` followed by every checkpoint as a
//! `(level, index, time, value)` record, ordered by time. Replaying the records
//! in order rebuilds the node histories and the depth history exactly. No
//! encoding is imposed: the types derive `serde` traits.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::History;
use crate::error::{Error, Result};
use crate::{
    depth_for, Config, HexSumTree, Key, NodeId, Time, Weight, CHILDREN, INITIAL_DEPTH, MAX_DEPTH,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub level: u32,
    pub index: u64,
    pub time: Time,
    pub value: Weight,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub depth: u32,
    pub next_key: Key,
    pub entries: Vec<JournalEntry>,
}

impl HexSumTree {
    /// Exports every checkpoint, ordered by `(time, level, index)`.
    pub fn journal(&self) -> Journal {
        let mut entries: Vec<JournalEntry> = self
            .checkpoints
            .histories()
            .flat_map(|(node, history)| {
                history.iter().map(move |c| JournalEntry {
                    level: node.level,
                    index: node.index,
                    time: c.time,
                    value: c.value,
                })
            })
            .collect();
        entries.sort_unstable_by_key(|e| (e.time, e.level, e.index));

        Journal {
            depth: self.depth,
            next_key: self.next_key,
            entries,
        }
    }

    /// Rebuilds a tree by replaying `journal`.
    ///
    /// A root level first appearing at time `t` marks the tree growing to that
    /// depth at `t`.
    pub fn from_journal(journal: &Journal, config: Config) -> Result<Self> {
        if journal.depth < INITIAL_DEPTH || journal.depth > MAX_DEPTH {
            return Err(corrupt(format!("depth {} out of bounds", journal.depth)));
        }
        let expected_depth = depth_for(journal.next_key);
        if expected_depth != journal.depth {
            return Err(corrupt(format!(
                "next key {} needs depth {expected_depth}, header says {}",
                journal.next_key, journal.depth
            )));
        }

        let mut tree = HexSumTree::with_config(config);
        let mut depth_history: History<u32> = History::new();
        let mut depth = INITIAL_DEPTH;

        for entry in &journal.entries {
            if entry.level > journal.depth {
                return Err(corrupt(format!(
                    "entry at level {} above depth {}",
                    entry.level, journal.depth
                )));
            }
            if entry.level == 0 && entry.index >= journal.next_key {
                return Err(corrupt(format!(
                    "leaf {} is not below next key {}",
                    entry.index, journal.next_key
                )));
            }
            if entry.value > tree.config.max_value {
                return Err(Error::Overflow {
                    level: entry.level,
                    index: entry.index,
                });
            }

            let node = NodeId::new(entry.level, entry.index);
            tree.checkpoints.record(node, entry.time, entry.value)?;

            if entry.level > depth {
                depth_history
                    .record(entry.time, entry.level)
                    .map_err(|last| {
                        corrupt(format!("depth regressed from time {last} to {}", entry.time))
                    })?;
                depth = entry.level;
            }
        }

        // An empty tree grown by `set_next_key` still records its roots, so
        // the replayed depth only falls short for a journal that lost records.
        if depth != journal.depth {
            return Err(corrupt(format!(
                "header depth {} but records reach depth {depth}",
                journal.depth
            )));
        }

        if let Some((node, time)) = first_unbalanced(&tree) {
            return Err(corrupt(format!(
                "node ({}, {}) at time {time} does not equal the sum of its children",
                node.level, node.index
            )));
        }

        tree.depth = depth;
        tree.depth_history = depth_history;
        tree.next_key = journal.next_key;
        debug!(
            depth,
            next_key = journal.next_key,
            entries = journal.entries.len(),
            "replayed journal"
        );
        Ok(tree)
    }
}

/// First internal checkpoint whose value differs from its children's sum at
/// the same time.
fn first_unbalanced(tree: &HexSumTree) -> Option<(NodeId, Time)> {
    let store = &tree.checkpoints;
    store
        .histories()
        .filter(|(node, _)| node.level > 0)
        .find_map(|(node, history)| {
            history
                .iter()
                .find(|c| {
                    let children = (0..CHILDREN).try_fold(0 as Weight, |acc, slot| {
                        acc.checked_add(store.value_at_or_before(node.child(slot), c.time))
                    });
                    children != Some(c.value)
                })
                .map(|c| (node, c.time))
        })
}

fn corrupt(message: String) -> Error {
    Error::CorruptJournal(message)
}
