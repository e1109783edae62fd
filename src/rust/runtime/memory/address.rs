// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::types::NodeId;
use ::std::{
    fmt,
    ops::Range,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Names one word in the memory segment of some node.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct GlobalAddress {
    node: NodeId,
    offset: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl GlobalAddress {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }

    /// Node that owns the target word.
    pub fn get_node(&self) -> NodeId {
        self.node
    }

    /// Offset of the target word in the segment of its owner.
    pub fn get_offset(&self) -> usize {
        self.offset
    }

    /// Returns the address `words` words past this one, on the same node.
    pub fn add(&self, words: usize) -> Self {
        Self {
            node: self.node,
            offset: self.offset + words,
        }
    }

    /// Address of element `index` of an array of `total` elements block-distributed over `num_nodes` nodes, each node
    /// holding its block at `base_offset`.
    pub fn block_distributed(base_offset: usize, index: i64, total: i64, num_nodes: usize) -> Self {
        let node: NodeId = block_owner(0, total, index, num_nodes);
        let block: Range<i64> = block_dist(0, total, node.into(), num_nodes);
        Self::new(node, base_offset + (index - block.start) as usize)
    }
}

/// Splits `start..end` in `num_ranks` contiguous blocks whose sizes differ by at most one, and returns the block of
/// `rank`. The first `(end - start) % num_ranks` ranks get the larger blocks.
pub fn block_dist(start: i64, end: i64, rank: usize, num_ranks: usize) -> Range<i64> {
    assert!(num_ranks > 0, "block_dist(): no ranks to distribute over");
    assert!(rank < num_ranks, "block_dist(): rank out of range (rank={}, num_ranks={})", rank, num_ranks);
    let total: i64 = (end - start).max(0);
    let ranks: i64 = num_ranks as i64;
    let rank: i64 = rank as i64;
    let (quotient, remainder): (i64, i64) = (total / ranks, total % ranks);

    let first: i64 = start + rank * quotient + rank.min(remainder);
    let len: i64 = quotient + if rank < remainder { 1 } else { 0 };
    first..(first + len)
}

/// Returns the rank whose [block_dist] block holds `index`.
pub fn block_owner(start: i64, end: i64, index: i64, num_ranks: usize) -> NodeId {
    assert!(
        index >= start && index < end,
        "block_owner(): index out of range (index={}, range={}..{})",
        index,
        start,
        end
    );
    let total: i64 = end - start;
    let ranks: i64 = num_ranks as i64;
    let (quotient, remainder): (i64, i64) = (total / ranks, total % ranks);
    let relative: i64 = index - start;

    // Ranks below `remainder` hold `quotient + 1` elements each.
    let boundary: i64 = remainder * (quotient + 1);
    let rank: i64 = if relative < boundary {
        relative / (quotient + 1)
    } else {
        remainder + (relative - boundary) / quotient
    };
    NodeId(rank as u16)
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for GlobalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.node, self.offset)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        block_dist,
        block_owner,
        GlobalAddress,
    };
    use crate::runtime::types::NodeId;
    use ::anyhow::Result;
    use ::std::ops::Range;

    #[test]
    fn block_dist_covers_range_exactly() -> Result<()> {
        for num_ranks in 1..6 {
            for total in 0..20 {
                let mut next: i64 = 3;
                for rank in 0..num_ranks {
                    let block: Range<i64> = block_dist(3, 3 + total, rank, num_ranks);
                    crate::ensure_eq!(block.start, next);
                    next = block.end;
                    for index in block {
                        crate::ensure_eq!(block_owner(3, 3 + total, index, num_ranks), NodeId(rank as u16));
                    }
                }
                crate::ensure_eq!(next, 3 + total);
            }
        }
        Ok(())
    }

    #[test]
    fn block_dist_spreads_remainder_first() -> Result<()> {
        crate::ensure_eq!(block_dist(0, 10, 0, 3), 0..4);
        crate::ensure_eq!(block_dist(0, 10, 1, 3), 4..7);
        crate::ensure_eq!(block_dist(0, 10, 2, 3), 7..10);
        Ok(())
    }

    #[test]
    fn block_distributed_address() -> Result<()> {
        let address: GlobalAddress = GlobalAddress::block_distributed(16, 5, 10, 3);
        crate::ensure_eq!(address.get_node(), NodeId(1));
        crate::ensure_eq!(address.get_offset(), 17);
        crate::ensure_eq!(address.add(2).get_offset(), 19);
        Ok(())
    }
}
