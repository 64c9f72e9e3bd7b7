//! Weighted sortition against a past snapshot.
//!
//! Offsets are sorted once and pushed down the tree as contiguous batches: at
//! each internal node the children are scanned left to right with a running
//! prefix sum, and every child receives the slice of offsets that falls inside
//! its `[prefix, prefix + value)` range. One traversal serves the whole batch.

use tracing::trace;

use crate::error::{Error, Result};
use crate::{HexSumTree, Key, NodeId, Time, Weight, CHILDREN};

/// An offset relative to the start of the current subtree, tagged with its
/// position in the caller's input.
#[derive(Clone, Copy, Debug)]
struct Draw {
    offset: Weight,
    slot: usize,
}

impl HexSumTree {
    /// Maps every offset to the key of the leaf whose cumulative range
    /// contains it at `time`. Output order follows input order.
    ///
    /// Every offset must be below [`total_sum_at(time)`](Self::total_sum_at).
    pub fn sortition(&self, offsets: &[Weight], time: Time) -> Result<Vec<Key>> {
        if offsets.is_empty() {
            return Ok(Vec::new());
        }

        let root = NodeId::root(self.depth_at(time));
        let total = self.checkpoints.value_at_or_before(root, time);
        if let Some(&offset) = offsets.iter().find(|&&offset| offset >= total) {
            return Err(Error::OutOfRange { offset, total });
        }

        let mut draws: Vec<Draw> = offsets
            .iter()
            .enumerate()
            .map(|(slot, &offset)| Draw { offset, slot })
            .collect();
        draws.sort_unstable_by_key(|d| d.offset);

        let mut keys: Vec<Key> = vec![0; offsets.len()];
        self.descend(root, time, &mut draws, &mut keys)?;

        trace!(count = offsets.len(), time, %total, "sortition");
        Ok(keys)
    }

    /// Single-offset sortition.
    pub fn select(&self, offset: Weight, time: Time) -> Result<Key> {
        let mut keys = self.sortition(&[offset], time)?;
        keys.pop().ok_or(Error::OutOfRange { offset, total: 0 })
    }

    /// `draws` is sorted by offset, and every offset is relative to `node`.
    fn descend(
        &self,
        node: NodeId,
        time: Time,
        draws: &mut [Draw],
        keys: &mut [Key],
    ) -> Result<()> {
        if node.level == 0 {
            for draw in draws.iter() {
                keys[draw.slot] = node.index;
            }
            return Ok(());
        }

        let mut prefix: Weight = 0;
        let mut start = 0usize;
        for slot in 0..CHILDREN {
            if start == draws.len() {
                return Ok(());
            }
            let child = node.child(slot);
            let value = self.checkpoints.value_at_or_before(child, time);
            if value == 0 {
                continue;
            }
            let end_offset = prefix.checked_add(value).ok_or(Error::Overflow {
                level: node.level,
                index: node.index,
            })?;

            let taken = draws[start..].partition_point(|d| d.offset < end_offset);
            if taken > 0 {
                let batch = &mut draws[start..start + taken];
                for draw in batch.iter_mut() {
                    draw.offset -= prefix;
                }
                self.descend(child, time, batch, keys)?;
                start += taken;
            }
            prefix = end_offset;
        }

        match draws.get(start) {
            None => Ok(()),
            // Children sum to less than this node claims.
            Some(draw) => Err(Error::OutOfRange {
                offset: draw.offset,
                total: prefix,
            }),
        }
    }
}
