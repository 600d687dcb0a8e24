//! Staged Transaction State
//!
//! Every entry point runs against a [`StagedState`]: a scratch overlay on top
//! of the committed pool store, token ledger and trade ledger.
//!
//! ```text
//!   PoolStore ──read──┐                      ┌──► StateBatch  ──► PoolStore::apply
//!   TokenLedger ──────┼──► StagedState ──────┼──► transfers   ──► TokenLedger
//!   BlockTradeLedger ─┘      (mutations)     ├──► trades      ──► BlockTradeLedger
//!                                            └──► events      ──► EventSink
//! ```
//!
//! Nothing reaches the committed side until [`StagedState::into_commit`] is
//! called on success. Dropping the overlay is the rollback.

use std::collections::BTreeMap;

use lib_types::{Address, Amount, BlockHeight, ChannelId, CommitmentHash, PoolId, Timestamp, TokenId};

use crate::amm::commit_reveal::SwapCommitment;
use crate::bank::{StagedLedger, TokenLedger, Transfer};
use crate::errors::{DexError, DexResult};
use crate::events::DexEvent;
use crate::params::DexParams;
use crate::pool::{LiquidityPosition, Pool};
use crate::security::{BlockTradeLedger, CircuitBreakerState, TradeKind, TradeRecord, TwapBuffer};
use crate::storage::{PoolStore, StateBatch, WriteOp};

/// Height and timestamp of the block being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockContext {
    pub height: BlockHeight,
    pub timestamp: Timestamp,
}

/// Everything a successful transaction hands back to the engine
#[derive(Debug, Default)]
pub struct StagedCommit {
    pub batch: StateBatch,
    pub transfers: Vec<Transfer>,
    pub trades: Vec<TradeRecord>,
    pub events: Vec<DexEvent>,
}

/// Scratch overlay for one transaction
pub struct StagedState<'a, S: PoolStore, L: TokenLedger> {
    store: &'a S,
    ledger: StagedLedger<'a, L>,
    params: &'a DexParams,
    ctx: BlockContext,
    trade_ledger: &'a BlockTradeLedger,

    pools: BTreeMap<PoolId, Pool>,
    positions: BTreeMap<(PoolId, Address), Option<LiquidityPosition>>,
    breakers: BTreeMap<PoolId, CircuitBreakerState>,
    twaps: BTreeMap<PoolId, TwapBuffer>,
    commitments: BTreeMap<CommitmentHash, Option<SwapCommitment>>,
    channel_nonces: BTreeMap<ChannelId, u64>,
    pool_creations: BTreeMap<Address, BlockHeight>,

    pending_trades: Vec<TradeRecord>,
    events: Vec<DexEvent>,
}

impl<'a, S: PoolStore, L: TokenLedger> StagedState<'a, S, L> {
    pub fn new(
        store: &'a S,
        ledger: &'a L,
        params: &'a DexParams,
        ctx: BlockContext,
        trade_ledger: &'a BlockTradeLedger,
    ) -> Self {
        Self {
            store,
            ledger: StagedLedger::new(ledger),
            params,
            ctx,
            trade_ledger,
            pools: BTreeMap::new(),
            positions: BTreeMap::new(),
            breakers: BTreeMap::new(),
            twaps: BTreeMap::new(),
            commitments: BTreeMap::new(),
            channel_nonces: BTreeMap::new(),
            pool_creations: BTreeMap::new(),
            pending_trades: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn params(&self) -> &'a DexParams {
        self.params
    }

    pub fn ctx(&self) -> BlockContext {
        self.ctx
    }

    pub fn height(&self) -> BlockHeight {
        self.ctx.height
    }

    pub fn timestamp(&self) -> Timestamp {
        self.ctx.timestamp
    }

    // =========================================================================
    // Pools and positions
    // =========================================================================

    pub fn pool(&self, pool_id: &PoolId) -> DexResult<Option<Pool>> {
        if let Some(pool) = self.pools.get(pool_id) {
            return Ok(Some(pool.clone()));
        }
        Ok(self.store.get_pool(pool_id)?)
    }

    /// Load a pool or fail with `PoolNotFound`
    pub fn require_pool(&self, pool_id: &PoolId) -> DexResult<Pool> {
        self.pool(pool_id)?.ok_or(DexError::PoolNotFound(*pool_id))
    }

    pub fn put_pool(&mut self, pool: Pool) {
        self.pools.insert(pool.id, pool);
    }

    /// Committed pool ids plus pools created in this transaction
    pub fn pool_ids(&self) -> DexResult<Vec<PoolId>> {
        let mut ids = self.store.pool_ids()?;
        for id in self.pools.keys() {
            if let Err(pos) = ids.binary_search(id) {
                ids.insert(pos, *id);
            }
        }
        Ok(ids)
    }

    pub fn position(
        &self,
        pool_id: &PoolId,
        provider: &Address,
    ) -> DexResult<Option<LiquidityPosition>> {
        if let Some(staged) = self.positions.get(&(*pool_id, *provider)) {
            return Ok(staged.clone());
        }
        Ok(self.store.get_position(pool_id, provider)?)
    }

    pub fn put_position(&mut self, position: LiquidityPosition) {
        self.positions
            .insert((position.pool_id, position.provider), Some(position));
    }

    pub fn delete_position(&mut self, pool_id: &PoolId, provider: &Address) {
        self.positions.insert((*pool_id, *provider), None);
    }

    /// Every position of a pool as the transaction currently sees it
    pub fn positions_for_pool(&self, pool_id: &PoolId) -> DexResult<Vec<LiquidityPosition>> {
        let mut merged: BTreeMap<Address, LiquidityPosition> = self
            .store
            .positions_for_pool(pool_id)?
            .into_iter()
            .map(|p| (p.provider, p))
            .collect();
        for ((pool, provider), staged) in &self.positions {
            if pool != pool_id {
                continue;
            }
            match staged {
                Some(position) => {
                    merged.insert(*provider, position.clone());
                }
                None => {
                    merged.remove(provider);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    // =========================================================================
    // Security state
    // =========================================================================

    /// Breaker state, created empty on first use
    pub fn breaker(&self, pool_id: &PoolId) -> DexResult<CircuitBreakerState> {
        if let Some(state) = self.breakers.get(pool_id) {
            return Ok(state.clone());
        }
        Ok(self.store.get_breaker(pool_id)?.unwrap_or_default())
    }

    pub fn put_breaker(&mut self, pool_id: PoolId, state: CircuitBreakerState) {
        self.breakers.insert(pool_id, state);
    }

    /// TWAP buffer sized to the current parameters
    pub fn twap(&self, pool_id: &PoolId) -> DexResult<TwapBuffer> {
        let capacity = self.params.twap.capacity;
        if let Some(buffer) = self.twaps.get(pool_id) {
            return Ok(buffer.clone());
        }
        let mut buffer = self
            .store
            .get_twap(pool_id)?
            .unwrap_or_else(|| TwapBuffer::new(capacity));
        if buffer.capacity() != capacity {
            buffer.set_capacity(capacity);
        }
        Ok(buffer)
    }

    pub fn put_twap(&mut self, pool_id: PoolId, buffer: TwapBuffer) {
        self.twaps.insert(pool_id, buffer);
    }

    // =========================================================================
    // Commitments, nonces, creation cooldown
    // =========================================================================

    pub fn commitment(&self, hash: &CommitmentHash) -> DexResult<Option<SwapCommitment>> {
        if let Some(staged) = self.commitments.get(hash) {
            return Ok(staged.clone());
        }
        Ok(self.store.get_commitment(hash)?)
    }

    pub fn put_commitment(&mut self, commitment: SwapCommitment) {
        self.commitments.insert(commitment.hash, Some(commitment));
    }

    pub fn delete_commitment(&mut self, hash: &CommitmentHash) {
        self.commitments.insert(*hash, None);
    }

    /// All commitment records as the transaction currently sees them
    pub fn commitments(&self) -> DexResult<Vec<SwapCommitment>> {
        let mut merged: BTreeMap<CommitmentHash, SwapCommitment> = self
            .store
            .commitments()?
            .into_iter()
            .map(|c| (c.hash, c))
            .collect();
        for (hash, staged) in &self.commitments {
            match staged {
                Some(commitment) => {
                    merged.insert(*hash, commitment.clone());
                }
                None => {
                    merged.remove(hash);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    pub fn channel_nonce(&self, channel: &ChannelId) -> DexResult<Option<u64>> {
        if let Some(nonce) = self.channel_nonces.get(channel) {
            return Ok(Some(*nonce));
        }
        Ok(self.store.get_channel_nonce(channel)?)
    }

    pub fn put_channel_nonce(&mut self, channel: ChannelId, nonce: u64) {
        self.channel_nonces.insert(channel, nonce);
    }

    pub fn last_pool_creation(&self, creator: &Address) -> DexResult<Option<BlockHeight>> {
        if let Some(height) = self.pool_creations.get(creator) {
            return Ok(Some(*height));
        }
        Ok(self.store.get_last_pool_creation(creator)?)
    }

    pub fn put_pool_creation(&mut self, creator: Address, height: BlockHeight) {
        self.pool_creations.insert(creator, height);
    }

    // =========================================================================
    // Token movements
    // =========================================================================

    pub fn balance(&self, account: &Address, token: &TokenId) -> Amount {
        self.ledger.balance(account, token)
    }

    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        token: &TokenId,
        amount: Amount,
    ) -> DexResult<()> {
        self.ledger.transfer(from, to, token, amount)?;
        Ok(())
    }

    // =========================================================================
    // Detector history and events
    // =========================================================================

    /// Previous and current block records of a pool, including this
    /// transaction's own pending entries
    pub fn trade_history(&self, pool_id: &PoolId) -> Vec<TradeRecord> {
        let mut records = self.trade_ledger.records(pool_id);
        records.extend(self.pending_for(pool_id));
        records
    }

    /// Current block records of a pool, including pending entries
    pub fn block_history(&self, pool_id: &PoolId) -> Vec<TradeRecord> {
        let mut records = self.trade_ledger.current_block(pool_id);
        records.extend(self.pending_for(pool_id));
        records
    }

    fn pending_for<'s>(&'s self, pool_id: &'s PoolId) -> impl Iterator<Item = TradeRecord> + 's {
        self.pending_trades
            .iter()
            .filter(move |r| r.pool_id == *pool_id)
            .cloned()
    }

    pub fn record_trade(&mut self, pool_id: PoolId, trader: Address, kind: TradeKind) {
        let sequence = self.trade_ledger.next_sequence() + self.pending_trades.len() as u64;
        self.pending_trades.push(TradeRecord {
            pool_id,
            trader,
            kind,
            height: self.ctx.height,
            sequence,
        });
    }

    pub fn emit(&mut self, event: DexEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[DexEvent] {
        &self.events
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Turn the overlay into the writes, transfers, trades and events to apply
    pub fn into_commit(self) -> StagedCommit {
        let mut batch = StateBatch::new();

        for (_, pool) in self.pools {
            batch.push(WriteOp::PutPool(pool));
        }
        for ((pool_id, provider), staged) in self.positions {
            match staged {
                Some(position) => batch.push(WriteOp::PutPosition(position)),
                None => batch.push(WriteOp::DeletePosition { pool_id, provider }),
            }
        }
        for (pool_id, state) in self.breakers {
            batch.push(WriteOp::PutBreaker { pool_id, state });
        }
        for (pool_id, buffer) in self.twaps {
            batch.push(WriteOp::PutTwap { pool_id, buffer });
        }
        for (hash, staged) in self.commitments {
            match staged {
                Some(commitment) => batch.push(WriteOp::PutCommitment(commitment)),
                None => batch.push(WriteOp::DeleteCommitment(hash)),
            }
        }
        for (channel, nonce) in self.channel_nonces {
            batch.push(WriteOp::PutChannelNonce { channel, nonce });
        }
        for (creator, height) in self.pool_creations {
            batch.push(WriteOp::PutPoolCreation { creator, height });
        }

        StagedCommit {
            batch,
            transfers: self.ledger.into_transfers(),
            trades: self.pending_trades,
            events: self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::InMemoryLedger;
    use crate::storage::MemoryPoolStore;

    fn token(id: u8) -> TokenId {
        TokenId::new([id; 32])
    }

    fn ctx() -> BlockContext {
        BlockContext { height: 10, timestamp: 1_000 }
    }

    #[test]
    fn test_overlay_reads_its_own_writes() {
        let store = MemoryPoolStore::new();
        let ledger = InMemoryLedger::new();
        let params = DexParams::default();
        let trades = BlockTradeLedger::new(16);
        let mut staged = StagedState::new(&store, &ledger, &params, ctx(), &trades);

        let pool = Pool::new(token(1), token(2), 30, 10);
        assert!(staged.pool(&pool.id).unwrap().is_none());
        staged.put_pool(pool.clone());
        assert_eq!(staged.require_pool(&pool.id).unwrap(), pool);
        assert_eq!(staged.pool_ids().unwrap(), vec![pool.id]);

        let provider = Address::new([5; 32]);
        staged.put_position(LiquidityPosition::new(pool.id, provider, 10));
        assert_eq!(staged.positions_for_pool(&pool.id).unwrap().len(), 1);
        staged.delete_position(&pool.id, &provider);
        assert!(staged.position(&pool.id, &provider).unwrap().is_none());
        assert!(staged.positions_for_pool(&pool.id).unwrap().is_empty());
    }

    #[test]
    fn test_dropped_overlay_leaves_store_untouched() {
        let store = MemoryPoolStore::new();
        let mut ledger = InMemoryLedger::new();
        ledger.mint(Address::new([1; 32]), token(1), 100);
        let params = DexParams::default();
        let trades = BlockTradeLedger::new(16);

        {
            let mut staged = StagedState::new(&store, &ledger, &params, ctx(), &trades);
            staged.put_pool(Pool::new(token(1), token(2), 30, 10));
            staged
                .transfer(&Address::new([1; 32]), &Address::new([2; 32]), &token(1), 60)
                .unwrap();
        }

        assert!(store.pool_ids().unwrap().is_empty());
        assert_eq!(ledger.balance(&Address::new([1; 32]), &token(1)), 100);
    }

    #[test]
    fn test_into_commit_collects_everything() {
        let store = MemoryPoolStore::new();
        let mut ledger = InMemoryLedger::new();
        ledger.mint(Address::new([1; 32]), token(1), 100);
        let params = DexParams::default();
        let trades = BlockTradeLedger::new(16);
        let mut staged = StagedState::new(&store, &ledger, &params, ctx(), &trades);

        let pool = Pool::new(token(1), token(2), 30, 10);
        staged.put_pool(pool.clone());
        staged.put_channel_nonce(ChannelId::new([3; 32]), 4);
        staged
            .transfer(&Address::new([1; 32]), &Address::new([2; 32]), &token(1), 60)
            .unwrap();
        staged.record_trade(pool.id, Address::new([1; 32]), TradeKind::AddLiquidity { shares: 5 });
        assert_eq!(staged.block_history(&pool.id).len(), 1);

        let commit = staged.into_commit();
        assert_eq!(commit.batch.len(), 2);
        assert_eq!(commit.transfers.len(), 1);
        assert_eq!(commit.trades.len(), 1);
        assert_eq!(commit.trades[0].height, 10);
    }

    #[test]
    fn test_twap_defaults_to_configured_capacity() {
        let store = MemoryPoolStore::new();
        let ledger = InMemoryLedger::new();
        let mut params = DexParams::default();
        params.twap.capacity = 7;
        let trades = BlockTradeLedger::new(16);
        let staged = StagedState::new(&store, &ledger, &params, ctx(), &trades);
        assert_eq!(staged.twap(&PoolId::new([1; 32])).unwrap().capacity(), 7);
    }
}
