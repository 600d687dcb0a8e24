//! Per-Block Trade Ledger
//!
//! Bounded, block-scoped append log keyed by pool. It is transient detector
//! state: never persisted, rotated by `begin_block`, and only ever appended
//! with operations that actually committed. The previous block is retained so
//! the MEV guard can see sandwiches that straddle a block boundary.

use std::collections::{BTreeMap, VecDeque};

use lib_types::{Address, Amount, BlockHeight, PoolId};

use crate::pool::SwapDirection;

/// What a ledger entry recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    Swap {
        direction: SwapDirection,
        amount_in: Amount,
        amount_out: Amount,
        /// amount_in relative to reserve_in at execution time
        size_bps: u128,
    },
    AddLiquidity {
        shares: u64,
    },
    RemoveLiquidity {
        shares: u64,
    },
}

/// One committed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRecord {
    pub pool_id: PoolId,
    pub trader: Address,
    pub kind: TradeKind,
    pub height: BlockHeight,
    /// Position in the global append order
    pub sequence: u64,
}

impl TradeRecord {
    pub fn swap_direction(&self) -> Option<SwapDirection> {
        match self.kind {
            TradeKind::Swap { direction, .. } => Some(direction),
            _ => None,
        }
    }

    pub fn is_swap(&self) -> bool {
        matches!(self.kind, TradeKind::Swap { .. })
    }
}

/// Ledger for the current and previous block
#[derive(Debug, Clone)]
pub struct BlockTradeLedger {
    height: BlockHeight,
    capacity: usize,
    current: BTreeMap<PoolId, VecDeque<TradeRecord>>,
    previous: BTreeMap<PoolId, VecDeque<TradeRecord>>,
    next_sequence: u64,
}

impl BlockTradeLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            height: 0,
            capacity: capacity.max(1),
            current: BTreeMap::new(),
            previous: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// Change the per-pool bound, trimming the oldest entries of both generations
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        for entries in self.current.values_mut().chain(self.previous.values_mut()) {
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }
    }

    /// Block boundary: the current block becomes the previous one
    ///
    /// Skipped heights leave nothing adjacent, so both generations clear.
    pub fn rotate(&mut self, height: BlockHeight) {
        if height == self.height {
            return;
        }
        if height == self.height + 1 {
            self.previous = std::mem::take(&mut self.current);
        } else {
            self.previous.clear();
            self.current.clear();
        }
        self.height = height;
    }

    /// Next sequence number to hand out to a pending record
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append a committed record, evicting the oldest entry of the pool at capacity
    pub fn append(&mut self, mut record: TradeRecord) {
        record.sequence = self.next_sequence;
        self.next_sequence += 1;
        let entries = self.current.entry(record.pool_id).or_default();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Records for a pool from the previous block, then the current one
    pub fn records(&self, pool_id: &PoolId) -> Vec<TradeRecord> {
        let previous = self.previous.get(pool_id).into_iter().flatten();
        let current = self.current.get(pool_id).into_iter().flatten();
        previous.chain(current).cloned().collect()
    }

    /// Records for a pool in the current block only
    pub fn current_block(&self, pool_id: &PoolId) -> Vec<TradeRecord> {
        self.current
            .get(pool_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.previous.clear();
    }
}
