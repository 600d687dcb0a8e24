//! DEX Storage Layer
//!
//! All persistence goes through the [`PoolStore`] trait. The engine is
//! generic over it and never knows which backend it runs on.
//!
//! # Invariants
//!
//! 1. **Reads are side-effect free.** Every getter takes `&self`.
//! 2. **Writes are batched.** The only mutation is [`PoolStore::apply`], which
//!    receives every write of one transaction and must apply all of them or
//!    none of them.
//! 3. **Iteration is deterministic.** `pool_ids`, `positions_for_pool` and
//!    `commitments` return records in key order on every replica.
//! 4. **Key encoding is protocol.** See [`keys`].

pub mod keys;
pub mod memory_store;
pub mod sled_store;

use lib_types::{Address, BlockHeight, ChannelId, CommitmentHash, PoolId};

use crate::amm::commit_reveal::SwapCommitment;
use crate::errors::StorageResult;
use crate::pool::{LiquidityPosition, Pool};
use crate::security::{CircuitBreakerState, TwapBuffer};

pub use memory_store::MemoryPoolStore;
pub use sled_store::SledPoolStore;

// =============================================================================
// WRITE BATCH
// =============================================================================

/// A single record write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    PutPool(Pool),
    PutPosition(LiquidityPosition),
    DeletePosition { pool_id: PoolId, provider: Address },
    PutBreaker { pool_id: PoolId, state: CircuitBreakerState },
    PutTwap { pool_id: PoolId, buffer: TwapBuffer },
    PutCommitment(SwapCommitment),
    DeleteCommitment(CommitmentHash),
    PutChannelNonce { channel: ChannelId, nonce: u64 },
    PutPoolCreation { creator: Address, height: BlockHeight },
}

/// Every write of one committed transaction, in application order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateBatch {
    ops: Vec<WriteOp>,
}

impl StateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Persistent home of every DEX record
pub trait PoolStore {
    // =========================================================================
    // Pools and positions
    // =========================================================================

    fn get_pool(&self, pool_id: &PoolId) -> StorageResult<Option<Pool>>;

    /// All pool ids in key order
    fn pool_ids(&self) -> StorageResult<Vec<PoolId>>;

    fn get_position(
        &self,
        pool_id: &PoolId,
        provider: &Address,
    ) -> StorageResult<Option<LiquidityPosition>>;

    /// All positions of a pool, ordered by provider
    fn positions_for_pool(&self, pool_id: &PoolId) -> StorageResult<Vec<LiquidityPosition>>;

    // =========================================================================
    // Security state
    // =========================================================================

    fn get_breaker(&self, pool_id: &PoolId) -> StorageResult<Option<CircuitBreakerState>>;

    fn get_twap(&self, pool_id: &PoolId) -> StorageResult<Option<TwapBuffer>>;

    // =========================================================================
    // Commit-reveal and cross-chain
    // =========================================================================

    fn get_commitment(&self, hash: &CommitmentHash) -> StorageResult<Option<SwapCommitment>>;

    /// All commitment records, ordered by hash
    fn commitments(&self) -> StorageResult<Vec<SwapCommitment>>;

    fn get_channel_nonce(&self, channel: &ChannelId) -> StorageResult<Option<u64>>;

    fn get_last_pool_creation(&self, creator: &Address) -> StorageResult<Option<BlockHeight>>;

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply one transaction's writes atomically
    fn apply(&mut self, batch: StateBatch) -> StorageResult<()>;

    /// Make applied batches durable
    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
