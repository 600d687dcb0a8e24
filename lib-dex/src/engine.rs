//! DEX Engine
//!
//! The single entry point for every state change. One call is one
//! transaction:
//!
//! ```text
//!  entry point ──► StagedState ──► Ok  ──► transfers → ledger
//!                                  │       batch     → PoolStore::apply
//!                                  │       trades    → BlockTradeLedger
//!                                  │       events    → EventSink
//!                                  └─► Err ──► overlay dropped
//!                                              security alerts published
//!                                              critical → error! + critical_alert
//! ```
//!
//! # Invariant
//!
//! All state mutations happen through `DexEngine::execute`. Period.

use lib_types::{Address, Amount, Bps, BlockHeight, CommitmentHash, PoolId, Timestamp, TokenId};

use crate::amm::commit_reveal::{self, commitment_hash, RevealedSwap, SwapCommitment};
use crate::amm::cross_chain::{self, RemoteSwapPacket};
use crate::amm::liquidity;
use crate::amm::multihop::{self, Hop, MultiHopOutcome};
use crate::amm::swap::{self, SwapAuthorization, SwapOutcome, SwapQuote, SwapRequest};
use crate::bank::{flush_transfers, revert_transfers, InMemoryLedger, TokenLedger};
use crate::errors::{DexError, DexResult};
use crate::events::{DexEvent, EventSink, InMemoryEventSink};
use crate::params::{DexParams, MAX_FEE_BPS};
use crate::pool::{LiquidityPosition, Pool};
use crate::security::{BlockTradeLedger, CircuitBreakerState, PauseReason, TwapBuffer};
use crate::state::{BlockContext, StagedCommit, StagedState};
use crate::storage::{MemoryPoolStore, PoolStore};

/// What `end_block` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndBlockSummary {
    pub height: BlockHeight,
    pub commitments_forfeited: usize,
    pub commitments_pruned: usize,
    pub breakers_cleared: usize,
}

/// AMM engine over an injected store, token ledger and event sink
pub struct DexEngine<S: PoolStore, L: TokenLedger, E: EventSink> {
    store: S,
    ledger: L,
    events: E,
    params: DexParams,
    ctx: BlockContext,
    started: bool,
    trade_ledger: BlockTradeLedger,
}

impl DexEngine<MemoryPoolStore, InMemoryLedger, InMemoryEventSink> {
    /// Fully in-memory engine for tests and simulations
    pub fn in_memory(params: DexParams) -> DexResult<Self> {
        Self::new(
            MemoryPoolStore::new(),
            InMemoryLedger::new(),
            InMemoryEventSink::new(),
            params,
        )
    }
}

impl<S: PoolStore, L: TokenLedger, E: EventSink> DexEngine<S, L, E> {
    pub fn new(store: S, ledger: L, events: E, params: DexParams) -> DexResult<Self> {
        params.validate()?;
        let trade_ledger = BlockTradeLedger::new(params.flash_loan.ledger_capacity);
        Ok(Self {
            store,
            ledger,
            events,
            params,
            ctx: BlockContext::default(),
            started: false,
            trade_ledger,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Host-side ledger access (genesis balances, bridge credits)
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    pub fn params(&self) -> &DexParams {
        &self.params
    }

    pub fn height(&self) -> BlockHeight {
        self.ctx.height
    }

    pub fn timestamp(&self) -> Timestamp {
        self.ctx.timestamp
    }

    pub fn trade_ledger(&self) -> &BlockTradeLedger {
        &self.trade_ledger
    }

    pub fn into_parts(self) -> (S, L, E) {
        (self.store, self.ledger, self.events)
    }

    pub fn pool(&self, pool_id: &PoolId) -> DexResult<Option<Pool>> {
        Ok(self.store.get_pool(pool_id)?)
    }

    pub fn position(
        &self,
        pool_id: &PoolId,
        provider: &Address,
    ) -> DexResult<Option<LiquidityPosition>> {
        Ok(self.store.get_position(pool_id, provider)?)
    }

    pub fn breaker(&self, pool_id: &PoolId) -> DexResult<CircuitBreakerState> {
        Ok(self.store.get_breaker(pool_id)?.unwrap_or_default())
    }

    pub fn twap(&self, pool_id: &PoolId) -> DexResult<Option<TwapBuffer>> {
        Ok(self.store.get_twap(pool_id)?)
    }

    pub fn commitment(&self, hash: &CommitmentHash) -> DexResult<Option<SwapCommitment>> {
        Ok(self.store.get_commitment(hash)?)
    }

    /// Gate-free preview of a swap against the committed pool
    pub fn quote(
        &self,
        pool_id: &PoolId,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_in: Amount,
    ) -> DexResult<SwapQuote> {
        let pool = self
            .store
            .get_pool(pool_id)?
            .ok_or(DexError::PoolNotFound(*pool_id))?;
        swap::quote(&pool, token_in, token_out, amount_in, &self.params)
    }

    // =========================================================================
    // Transaction plumbing
    // =========================================================================

    /// Run `f` against a fresh overlay and commit it only on success
    fn execute<T, F>(&mut self, operation: &'static str, f: F) -> DexResult<T>
    where
        F: FnOnce(&mut StagedState<'_, S, L>) -> DexResult<T>,
    {
        let mut staged = StagedState::new(
            &self.store,
            &self.ledger,
            &self.params,
            self.ctx,
            &self.trade_ledger,
        );
        let result = f(&mut staged);
        let staged_commit = staged.into_commit();

        match result {
            Ok(value) => {
                if let Err(err) = self.commit(staged_commit) {
                    self.escalate(operation, &err);
                    return Err(err);
                }
                Ok(value)
            }
            Err(err) => {
                for event in staged_commit.events.into_iter().filter(DexEvent::is_alert) {
                    self.events.publish(event);
                }
                if err.is_critical() {
                    self.escalate(operation, &err);
                } else {
                    tracing::debug!("{} rejected at height {}: {}", operation, self.ctx.height, err);
                }
                Err(err)
            }
        }
    }

    fn commit(&mut self, staged: StagedCommit) -> DexResult<()> {
        // Every transfer was checked against the same base balances; a
        // refusal leaves the ledger as it was
        flush_transfers(&mut self.ledger, &staged.transfers)
            .map_err(|e| DexError::critical("ledger_replay", e.to_string()))?;
        if !staged.batch.is_empty() {
            if let Err(e) = self.store.apply(staged.batch) {
                revert_transfers(&mut self.ledger, &staged.transfers);
                return Err(DexError::critical("store_apply", e.to_string()));
            }
        }
        for trade in staged.trades {
            self.trade_ledger.append(trade);
        }
        for event in staged.events {
            self.events.publish(event);
        }
        Ok(())
    }

    fn escalate(&mut self, operation: &str, err: &DexError) {
        tracing::error!(
            "CRITICAL: {} aborted at height {}: {}",
            operation,
            self.ctx.height,
            err
        );
        let (invariant, detail) = match err {
            DexError::CriticalInvariantViolation { invariant, detail } => {
                (invariant.clone(), detail.clone())
            }
            other => ("commit".to_string(), other.to_string()),
        };
        self.events.publish(DexEvent::CriticalAlert {
            operation: operation.to_string(),
            invariant,
            detail,
            block_height: self.ctx.height,
            timestamp: self.ctx.timestamp,
        });
    }

    fn require_authority(&self, caller: &Address) -> DexResult<()> {
        if *caller != self.params.authority {
            return Err(DexError::Unauthorized(*caller));
        }
        Ok(())
    }

    // =========================================================================
    // Block lifecycle
    // =========================================================================

    /// Enter a new block; heights must strictly increase
    pub fn begin_block(&mut self, height: BlockHeight, timestamp: Timestamp) -> DexResult<()> {
        if self.started && height <= self.ctx.height {
            return Err(DexError::InvalidBlock {
                current: self.ctx.height,
                proposed: height,
            });
        }
        self.started = true;
        self.ctx = BlockContext { height, timestamp };
        self.trade_ledger.rotate(height);
        tracing::debug!("DEX block {} begun at {}", height, timestamp);
        Ok(())
    }

    /// Expire commitments, clear elapsed pauses, flush the store
    pub fn end_block(&mut self) -> DexResult<EndBlockSummary> {
        let summary = self.execute("end_block", |staged| {
            let (forfeited, pruned) = commit_reveal::sweep_commitments(staged)?;
            let height = staged.height();
            let mut cleared = 0;
            for pool_id in staged.pool_ids()? {
                let mut breaker = staged.breaker(&pool_id)?;
                if breaker.cooldown_elapsed(height) {
                    breaker.clear();
                    staged.put_breaker(pool_id, breaker);
                    staged.emit(DexEvent::CircuitBreakerCleared {
                        pool_id,
                        by_governance: false,
                        block_height: height,
                        timestamp: staged.timestamp(),
                    });
                    cleared += 1;
                }
            }
            Ok(EndBlockSummary {
                height,
                commitments_forfeited: forfeited,
                commitments_pruned: pruned,
                breakers_cleared: cleared,
            })
        })?;
        self.store.flush()?;
        if summary.commitments_forfeited > 0 || summary.breakers_cleared > 0 {
            tracing::info!(
                "DEX block {} closed: {} commitment(s) forfeited, {} pruned, {} breaker(s) cleared",
                summary.height,
                summary.commitments_forfeited,
                summary.commitments_pruned,
                summary.breakers_cleared
            );
        }
        Ok(summary)
    }

    // =========================================================================
    // Liquidity
    // =========================================================================

    pub fn create_pool(
        &mut self,
        creator: Address,
        token_a: TokenId,
        token_b: TokenId,
        amount_a: Amount,
        amount_b: Amount,
    ) -> DexResult<PoolId> {
        self.execute("create_pool", |staged| {
            liquidity::create_pool(staged, creator, token_a, token_b, amount_a, amount_b)
        })
    }

    pub fn add_liquidity(
        &mut self,
        provider: Address,
        pool_id: PoolId,
        amount_a: Amount,
        amount_b: Amount,
    ) -> DexResult<u64> {
        self.execute("add_liquidity", |staged| {
            liquidity::add_liquidity(staged, provider, pool_id, amount_a, amount_b)
        })
    }

    pub fn remove_liquidity(
        &mut self,
        provider: Address,
        pool_id: PoolId,
        shares: u64,
    ) -> DexResult<(Amount, Amount)> {
        self.execute("remove_liquidity", |staged| {
            liquidity::remove_liquidity(staged, provider, pool_id, shares)
        })
    }

    /// Collect the LP fees a position has earned, keeping its shares
    pub fn claim_lp_fees(&mut self, provider: Address, pool_id: PoolId) -> DexResult<(Amount, Amount)> {
        self.execute("claim_lp_fees", |staged| liquidity::claim_lp_fees(staged, provider, pool_id))
    }

    // =========================================================================
    // Swaps
    // =========================================================================

    pub fn swap(
        &mut self,
        trader: Address,
        pool_id: PoolId,
        token_in: TokenId,
        amount_in: Amount,
        token_out: TokenId,
        min_amount_out: Amount,
    ) -> DexResult<SwapOutcome> {
        let request = SwapRequest {
            trader,
            pool_id,
            token_in,
            token_out,
            amount_in,
            min_amount_out,
        };
        self.execute("swap", |staged| {
            swap::execute_swap(staged, &request, SwapAuthorization::Direct)
        })
    }

    pub fn swap_multi_hop(
        &mut self,
        trader: Address,
        route: &[Hop],
        amount_in: Amount,
        min_amount_out: Amount,
    ) -> DexResult<MultiHopOutcome> {
        self.execute("swap_multi_hop", |staged| {
            multihop::swap_multi_hop(staged, trader, route, amount_in, min_amount_out)
        })
    }

    pub fn receive_remote_swap(&mut self, packet: &RemoteSwapPacket) -> DexResult<SwapOutcome> {
        self.execute("receive_remote_swap", |staged| {
            cross_chain::receive_remote_swap(staged, packet)
        })
    }

    // =========================================================================
    // Commit-reveal
    // =========================================================================

    pub fn commit_swap(
        &mut self,
        trader: Address,
        pool_id: PoolId,
        hash: CommitmentHash,
    ) -> DexResult<SwapCommitment> {
        self.execute("commit_swap", |staged| {
            commit_reveal::commit_swap(staged, trader, pool_id, hash)
        })
    }

    /// Reveal and execute a committed swap
    ///
    /// An expired commitment is forfeited in its own committed step before
    /// `CommitExpired` is returned.
    pub fn reveal_swap(
        &mut self,
        trader: Address,
        pool_id: PoolId,
        swap: RevealedSwap,
        salt: [u8; 32],
    ) -> DexResult<SwapOutcome> {
        let hash = commitment_hash(&pool_id, &trader, &swap, &salt);
        let expired = self.execute("forfeit_commitment", |staged| {
            commit_reveal::forfeit_if_expired(staged, &hash)
        })?;
        if let Some(expired_at) = expired {
            return Err(DexError::CommitExpired { expired_at });
        }
        self.execute("reveal_swap", |staged| {
            commit_reveal::reveal_swap(staged, trader, pool_id, &swap, &salt)
        })
    }

    /// Returns `(refund, fee)`
    pub fn cancel_commitment(
        &mut self,
        trader: Address,
        hash: CommitmentHash,
    ) -> DexResult<(Amount, Amount)> {
        self.execute("cancel_commitment", |staged| {
            commit_reveal::cancel_commitment(staged, trader, hash)
        })
    }

    // =========================================================================
    // Governance
    // =========================================================================

    /// Clear a pause before its cooldown; returns false if the pool was not paused
    pub fn force_resume(&mut self, caller: Address, pool_id: PoolId) -> DexResult<bool> {
        self.require_authority(&caller)?;
        let resumed = self.execute("force_resume", |staged| {
            staged.require_pool(&pool_id)?;
            let mut breaker = staged.breaker(&pool_id)?;
            if !breaker.paused_flag() {
                return Ok(false);
            }
            breaker.clear();
            staged.put_breaker(pool_id, breaker);
            staged.emit(DexEvent::CircuitBreakerCleared {
                pool_id,
                by_governance: true,
                block_height: staged.height(),
                timestamp: staged.timestamp(),
            });
            Ok(true)
        })?;
        if resumed {
            tracing::info!("Pool {} resumed by governance at height {}", pool_id, self.ctx.height);
        }
        Ok(resumed)
    }

    /// Pause a pool for `blocks` blocks
    pub fn emergency_pause(
        &mut self,
        caller: Address,
        pool_id: PoolId,
        blocks: BlockHeight,
    ) -> DexResult<BlockHeight> {
        self.require_authority(&caller)?;
        if blocks == 0 {
            return Err(DexError::InvalidParams("pause duration must be positive".to_string()));
        }
        let resume_height = self.execute("emergency_pause", |staged| {
            staged.require_pool(&pool_id)?;
            let height = staged.height();
            let mut breaker = staged.breaker(&pool_id)?;
            breaker.pause(height, blocks, PauseReason::Governance);
            let resume_height = breaker.resume_height();
            staged.put_breaker(pool_id, breaker);
            staged.emit(DexEvent::CircuitBreakerTriggered {
                pool_id,
                reason: PauseReason::Governance,
                resume_height,
                block_height: height,
                timestamp: staged.timestamp(),
            });
            Ok(resume_height)
        })?;
        tracing::warn!("Pool {} paused by governance until height {}", pool_id, resume_height);
        Ok(resume_height)
    }

    /// Replace the parameter set after validation
    pub fn update_params(&mut self, caller: Address, params: DexParams) -> DexResult<()> {
        self.require_authority(&caller)?;
        params.validate()?;
        self.trade_ledger.set_capacity(params.flash_loan.ledger_capacity);
        self.params = params;
        tracing::info!("DEX parameters updated at height {}", self.ctx.height);
        Ok(())
    }

    pub fn set_pool_fee(&mut self, caller: Address, pool_id: PoolId, fee_bps: Bps) -> DexResult<()> {
        self.require_authority(&caller)?;
        if fee_bps > MAX_FEE_BPS {
            return Err(DexError::InvalidParams(format!(
                "fee {fee_bps} bps exceeds maximum {MAX_FEE_BPS}"
            )));
        }
        self.execute("set_pool_fee", |staged| {
            let mut pool = staged.require_pool(&pool_id)?;
            pool.fee_bps = fee_bps;
            staged.put_pool(pool);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(id: u8) -> TokenId {
        TokenId::new([id; 32])
    }

    fn addr(id: u8) -> Address {
        Address::new([id; 32])
    }

    fn engine() -> DexEngine<MemoryPoolStore, InMemoryLedger, InMemoryEventSink> {
        let params = DexParams::default().with_authority(addr(99));
        let mut engine = DexEngine::in_memory(params).unwrap();
        engine.ledger_mut().mint(addr(1), token(1), 10_000_000);
        engine.ledger_mut().mint(addr(1), token(2), 10_000_000);
        engine.begin_block(1, 1_000).unwrap();
        engine
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    #[test]
    fn test_block_height_must_increase() {
        let mut engine = engine();
        assert_eq!(
            engine.begin_block(1, 1_010).unwrap_err(),
            DexError::InvalidBlock { current: 1, proposed: 1 }
        );
        engine.begin_block(2, 1_010).unwrap();
        assert_eq!(engine.height(), 2);
    }

    #[test]
    fn test_end_block_on_empty_engine() {
        let mut engine = engine();
        let summary = engine.end_block().unwrap();
        assert_eq!(summary, EndBlockSummary { height: 1, ..Default::default() });
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    #[test]
    fn test_failed_transaction_leaves_no_trace() {
        let mut engine = engine();
        let err = engine
            .create_pool(addr(1), token(1), token(2), 1_000_000, 20_000_000)
            .unwrap_err();
        assert!(matches!(err, DexError::Ledger(_)));
        assert!(engine.store().pool_ids().unwrap().is_empty());
        assert_eq!(engine.ledger().balance(&addr(1), &token(1)), 10_000_000);
        assert_eq!(engine.events().event_count(), 0);
    }

    #[test]
    fn test_successful_transaction_commits_everything() {
        let mut engine = engine();
        let pool_id = engine
            .create_pool(addr(1), token(1), token(2), 1_000_000, 2_000_000)
            .unwrap();
        assert!(engine.pool(&pool_id).unwrap().is_some());
        assert_eq!(engine.ledger().balance(&addr(1), &token(1)), 9_000_000);
        assert_eq!(engine.events().of_type("pool_created").len(), 1);
        assert_eq!(engine.trade_ledger().current_block(&pool_id).len(), 1);
        assert_eq!(engine.store().batches_applied(), 1);
    }

    // ========================================================================
    // GOVERNANCE
    // ========================================================================

    #[test]
    fn test_governance_requires_authority() {
        let mut engine = engine();
        let pool_id = engine
            .create_pool(addr(1), token(1), token(2), 1_000_000, 2_000_000)
            .unwrap();

        assert_eq!(
            engine.emergency_pause(addr(1), pool_id, 10).unwrap_err(),
            DexError::Unauthorized(addr(1))
        );
        assert_eq!(
            engine.update_params(addr(1), DexParams::default()).unwrap_err(),
            DexError::Unauthorized(addr(1))
        );
        assert_eq!(engine.emergency_pause(addr(99), pool_id, 10).unwrap(), 11);
        assert!(engine.breaker(&pool_id).unwrap().is_paused(5));
    }

    #[test]
    fn test_update_params_validates() {
        let mut engine = engine();
        let mut bad = engine.params().clone();
        bad.swap.default_fee_bps = MAX_FEE_BPS + 1;
        assert!(matches!(engine.update_params(addr(99), bad).unwrap_err(), DexError::InvalidParams(_)));

        let good = engine.params().clone().with_pool_creation_cooldown(0);
        engine.update_params(addr(99), good).unwrap();
        assert_eq!(engine.params().liquidity.pool_creation_cooldown, 0);
    }

    #[test]
    fn test_set_pool_fee() {
        let mut engine = engine();
        let pool_id = engine
            .create_pool(addr(1), token(1), token(2), 1_000_000, 2_000_000)
            .unwrap();
        engine.set_pool_fee(addr(99), pool_id, 100).unwrap();
        assert_eq!(engine.pool(&pool_id).unwrap().unwrap().fee_bps, 100);
        assert!(engine.set_pool_fee(addr(99), pool_id, MAX_FEE_BPS + 1).is_err());
    }
}
