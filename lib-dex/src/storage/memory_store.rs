//! In-memory PoolStore
//!
//! BTreeMap-backed so iteration order matches the sled backend's key order.
//! Used by unit tests and simulations.

use std::collections::BTreeMap;

use lib_types::{Address, BlockHeight, ChannelId, CommitmentHash, PoolId};

use super::{PoolStore, StateBatch, WriteOp};
use crate::amm::commit_reveal::SwapCommitment;
use crate::errors::StorageResult;
use crate::pool::{LiquidityPosition, Pool};
use crate::security::{CircuitBreakerState, TwapBuffer};

#[derive(Debug, Clone, Default)]
pub struct MemoryPoolStore {
    pools: BTreeMap<PoolId, Pool>,
    positions: BTreeMap<(PoolId, Address), LiquidityPosition>,
    breakers: BTreeMap<PoolId, CircuitBreakerState>,
    twaps: BTreeMap<PoolId, TwapBuffer>,
    commitments: BTreeMap<CommitmentHash, SwapCommitment>,
    channel_nonces: BTreeMap<ChannelId, u64>,
    pool_creations: BTreeMap<Address, BlockHeight>,
    batches_applied: u64,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches applied so far
    pub fn batches_applied(&self) -> u64 {
        self.batches_applied
    }
}

impl PoolStore for MemoryPoolStore {
    fn get_pool(&self, pool_id: &PoolId) -> StorageResult<Option<Pool>> {
        Ok(self.pools.get(pool_id).cloned())
    }

    fn pool_ids(&self) -> StorageResult<Vec<PoolId>> {
        Ok(self.pools.keys().copied().collect())
    }

    fn get_position(
        &self,
        pool_id: &PoolId,
        provider: &Address,
    ) -> StorageResult<Option<LiquidityPosition>> {
        Ok(self.positions.get(&(*pool_id, *provider)).cloned())
    }

    fn positions_for_pool(&self, pool_id: &PoolId) -> StorageResult<Vec<LiquidityPosition>> {
        Ok(self
            .positions
            .range((*pool_id, Address::zero())..)
            .take_while(|((pool, _), _)| pool == pool_id)
            .map(|(_, position)| position.clone())
            .collect())
    }

    fn get_breaker(&self, pool_id: &PoolId) -> StorageResult<Option<CircuitBreakerState>> {
        Ok(self.breakers.get(pool_id).cloned())
    }

    fn get_twap(&self, pool_id: &PoolId) -> StorageResult<Option<TwapBuffer>> {
        Ok(self.twaps.get(pool_id).cloned())
    }

    fn get_commitment(&self, hash: &CommitmentHash) -> StorageResult<Option<SwapCommitment>> {
        Ok(self.commitments.get(hash).cloned())
    }

    fn commitments(&self) -> StorageResult<Vec<SwapCommitment>> {
        Ok(self.commitments.values().cloned().collect())
    }

    fn get_channel_nonce(&self, channel: &ChannelId) -> StorageResult<Option<u64>> {
        Ok(self.channel_nonces.get(channel).copied())
    }

    fn get_last_pool_creation(&self, creator: &Address) -> StorageResult<Option<BlockHeight>> {
        Ok(self.pool_creations.get(creator).copied())
    }

    fn apply(&mut self, batch: StateBatch) -> StorageResult<()> {
        for op in batch.into_ops() {
            match op {
                WriteOp::PutPool(pool) => {
                    self.pools.insert(pool.id, pool);
                }
                WriteOp::PutPosition(position) => {
                    self.positions
                        .insert((position.pool_id, position.provider), position);
                }
                WriteOp::DeletePosition { pool_id, provider } => {
                    self.positions.remove(&(pool_id, provider));
                }
                WriteOp::PutBreaker { pool_id, state } => {
                    self.breakers.insert(pool_id, state);
                }
                WriteOp::PutTwap { pool_id, buffer } => {
                    self.twaps.insert(pool_id, buffer);
                }
                WriteOp::PutCommitment(commitment) => {
                    self.commitments.insert(commitment.hash, commitment);
                }
                WriteOp::DeleteCommitment(hash) => {
                    self.commitments.remove(&hash);
                }
                WriteOp::PutChannelNonce { channel, nonce } => {
                    self.channel_nonces.insert(channel, nonce);
                }
                WriteOp::PutPoolCreation { creator, height } => {
                    self.pool_creations.insert(creator, height);
                }
            }
        }
        self.batches_applied += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_types::TokenId;

    fn pool(a: u8, b: u8) -> Pool {
        Pool::new(TokenId::new([a; 32]), TokenId::new([b; 32]), 30, 1)
    }

    #[test]
    fn test_apply_and_read_back() {
        let mut store = MemoryPoolStore::new();
        let p = pool(1, 2);
        let mut batch = StateBatch::new();
        batch.push(WriteOp::PutPool(p.clone()));
        batch.push(WriteOp::PutPosition(LiquidityPosition::new(p.id, Address::new([3; 32]), 1)));
        batch.push(WriteOp::PutChannelNonce { channel: ChannelId::new([4; 32]), nonce: 7 });
        store.apply(batch).unwrap();

        assert_eq!(store.get_pool(&p.id).unwrap(), Some(p.clone()));
        assert_eq!(store.positions_for_pool(&p.id).unwrap().len(), 1);
        assert_eq!(store.get_channel_nonce(&ChannelId::new([4; 32])).unwrap(), Some(7));
        assert_eq!(store.batches_applied(), 1);
    }

    #[test]
    fn test_positions_scoped_to_pool() {
        let mut store = MemoryPoolStore::new();
        let first = pool(1, 2);
        let second = pool(1, 3);
        let mut batch = StateBatch::new();
        for provider in [0u8, 5, 9] {
            batch.push(WriteOp::PutPosition(LiquidityPosition::new(first.id, Address::new([provider; 32]), 1)));
        }
        batch.push(WriteOp::PutPosition(LiquidityPosition::new(second.id, Address::new([5; 32]), 1)));
        store.apply(batch).unwrap();

        let positions = store.positions_for_pool(&first.id).unwrap();
        assert_eq!(positions.len(), 3);
        assert!(positions.windows(2).all(|w| w[0].provider < w[1].provider));

        let mut delete = StateBatch::new();
        delete.push(WriteOp::DeletePosition { pool_id: first.id, provider: Address::new([5; 32]) });
        store.apply(delete).unwrap();
        assert_eq!(store.positions_for_pool(&first.id).unwrap().len(), 2);
        assert_eq!(store.positions_for_pool(&second.id).unwrap().len(), 1);
    }
}
