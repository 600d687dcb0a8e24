//! Pool and Liquidity Position Records
//!
//! # Invariants
//!
//! - `token_a < token_b` (lexicographic on the raw id bytes)
//! - `reserve_a > 0 && reserve_b > 0` while `total_shares > 0`
//! - `total_shares == Σ position.shares`, including the locked minimum
//!   liquidity held by [`LOCKED_LIQUIDITY_OWNER`]
//! - `lp_fees_x >= Σ position.pending_fees()`: LP fees are credited per
//!   share at the moment of the swap, so later depositors never earn fees
//!   accrued before they joined
//!
//! Records are plain data. Only the liquidity manager and the swap executor
//! produce new versions of them, and only inside a staged transaction.

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount, BlockHeight, Bps, PoolId, TokenId};

use crate::amm::math;
use crate::errors::{DexError, DexResult};

/// Shares locked forever on the first deposit of every pool
pub const MINIMUM_LIQUIDITY: u64 = 1000;

/// Owner of the locked minimum liquidity; no key controls it
pub const LOCKED_LIQUIDITY_OWNER: Address = Address::zero();

/// Scale of the per-share fee growth accumulators
pub const FEE_GROWTH_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Domain separator for pool ID derivation
pub const POOL_ID_DOMAIN: &[u8] = b"DEX_POOL_V1";

/// Order a token pair canonically. Returns `(low, high, swapped)`.
pub fn canonical_pair(a: TokenId, b: TokenId) -> (TokenId, TokenId, bool) {
    if a <= b {
        (a, b, false)
    } else {
        (b, a, true)
    }
}

/// Derive the pool id for a token pair, independent of argument order
pub fn derive_pool_id(a: &TokenId, b: &TokenId) -> PoolId {
    let (low, high, _) = canonical_pair(*a, *b);
    let mut hasher = blake3::Hasher::new();
    hasher.update(POOL_ID_DOMAIN);
    hasher.update(low.as_bytes());
    hasher.update(high.as_bytes());
    PoolId::new(*hasher.finalize().as_bytes())
}

/// Direction of a swap relative to the canonical pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapDirection {
    /// token_a in, token_b out
    AToB,
    /// token_b in, token_a out
    BToA,
}

impl SwapDirection {
    pub fn opposite(self) -> Self {
        match self {
            SwapDirection::AToB => SwapDirection::BToA,
            SwapDirection::BToA => SwapDirection::AToB,
        }
    }
}

/// Pool record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub token_a: TokenId,
    pub token_b: TokenId,
    pub reserve_a: Amount,
    pub reserve_b: Amount,
    pub total_shares: u64,
    pub fee_bps: Bps,
    pub created_at: BlockHeight,
    /// LP share of swap fees held by the pool account outside the reserves
    pub lp_fees_a: Amount,
    pub lp_fees_b: Amount,
    /// Cumulative LP fee earned per share, scaled by [`FEE_GROWTH_PRECISION`]
    pub fee_growth_a: u128,
    pub fee_growth_b: u128,
}

impl Pool {
    /// Empty pool for a canonically ordered pair
    pub fn new(token_a: TokenId, token_b: TokenId, fee_bps: Bps, created_at: BlockHeight) -> Self {
        Self {
            id: derive_pool_id(&token_a, &token_b),
            token_a,
            token_b,
            reserve_a: 0,
            reserve_b: 0,
            total_shares: 0,
            fee_bps,
            created_at,
            lp_fees_a: 0,
            lp_fees_b: 0,
            fee_growth_a: 0,
            fee_growth_b: 0,
        }
    }

    /// Resolve the direction of a swap, rejecting tokens outside the pair
    pub fn direction(&self, token_in: &TokenId, token_out: &TokenId) -> DexResult<SwapDirection> {
        if token_in == token_out {
            return Err(DexError::IdenticalTokens);
        }
        match (token_in, token_out) {
            (i, o) if *i == self.token_a && *o == self.token_b => Ok(SwapDirection::AToB),
            (i, o) if *i == self.token_b && *o == self.token_a => Ok(SwapDirection::BToA),
            (i, _) if *i != self.token_a && *i != self.token_b => Err(DexError::InvalidTokenPair {
                pool: self.id,
                token: *i,
            }),
            (_, o) => Err(DexError::InvalidTokenPair {
                pool: self.id,
                token: *o,
            }),
        }
    }

    /// `(reserve_in, reserve_out)` for a direction
    pub fn reserves(&self, direction: SwapDirection) -> (Amount, Amount) {
        match direction {
            SwapDirection::AToB => (self.reserve_a, self.reserve_b),
            SwapDirection::BToA => (self.reserve_b, self.reserve_a),
        }
    }

    /// Credit the LP part of a swap fee to the shares outstanding right now
    pub fn accrue_lp_fee(&mut self, direction: SwapDirection, lp_fee: Amount) -> DexResult<()> {
        if lp_fee == 0 || self.total_shares == 0 {
            return Ok(());
        }
        let growth = (lp_fee as u128) * FEE_GROWTH_PRECISION / (self.total_shares as u128);
        let (fees, accumulator) = match direction {
            SwapDirection::AToB => (&mut self.lp_fees_a, &mut self.fee_growth_a),
            SwapDirection::BToA => (&mut self.lp_fees_b, &mut self.fee_growth_b),
        };
        *fees = fees.checked_add(lp_fee).ok_or(DexError::Overflow)?;
        *accumulator = accumulator.checked_add(growth).ok_or(DexError::Overflow)?;
        Ok(())
    }

    /// Constant product `reserve_a * reserve_b`
    pub fn k(&self) -> u128 {
        (self.reserve_a as u128) * (self.reserve_b as u128)
    }

    /// Spot price of token_a in token_b, scaled by `PRICE_PRECISION`
    pub fn spot_price(&self) -> DexResult<u128> {
        math::spot_price(self.reserve_a, self.reserve_b)
    }

    pub fn is_initialized(&self) -> bool {
        self.total_shares > 0
    }
}

/// A provider's share of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPosition {
    pub pool_id: PoolId,
    pub provider: Address,
    pub shares: u64,
    /// Height of the provider's last add or remove in this pool
    pub last_action_height: BlockHeight,
    /// Pool fee growth at the last settlement
    pub fee_growth_checkpoint_a: u128,
    pub fee_growth_checkpoint_b: u128,
    /// Settled fees not yet paid out
    pub fees_owed_a: Amount,
    pub fees_owed_b: Amount,
}

impl LiquidityPosition {
    pub fn new(pool_id: PoolId, provider: Address, height: BlockHeight) -> Self {
        Self {
            pool_id,
            provider,
            shares: 0,
            last_action_height: height,
            fee_growth_checkpoint_a: 0,
            fee_growth_checkpoint_b: 0,
            fees_owed_a: 0,
            fees_owed_b: 0,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.provider == LOCKED_LIQUIDITY_OWNER
    }

    /// Fees claimable right now: settled plus earned since the checkpoint
    pub fn pending_fees(&self, pool: &Pool) -> DexResult<(Amount, Amount)> {
        let (earned_a, earned_b) = self.earned_since_checkpoint(pool)?;
        Ok((
            self.fees_owed_a.checked_add(earned_a).ok_or(DexError::Overflow)?,
            self.fees_owed_b.checked_add(earned_b).ok_or(DexError::Overflow)?,
        ))
    }

    /// Move earned fees into `fees_owed` and checkpoint against the pool.
    /// Must run before `shares` changes.
    pub fn settle_fees(&mut self, pool: &Pool) -> DexResult<()> {
        let (owed_a, owed_b) = self.pending_fees(pool)?;
        self.fees_owed_a = owed_a;
        self.fees_owed_b = owed_b;
        self.fee_growth_checkpoint_a = pool.fee_growth_a;
        self.fee_growth_checkpoint_b = pool.fee_growth_b;
        Ok(())
    }

    /// Take every settled fee, leaving nothing owed
    pub fn take_fees(&mut self) -> (Amount, Amount) {
        let owed = (self.fees_owed_a, self.fees_owed_b);
        self.fees_owed_a = 0;
        self.fees_owed_b = 0;
        owed
    }

    fn earned_since_checkpoint(&self, pool: &Pool) -> DexResult<(Amount, Amount)> {
        let earned = |growth: u128, checkpoint: u128| -> DexResult<Amount> {
            let delta = growth.saturating_sub(checkpoint);
            let scaled = (self.shares as u128)
                .checked_mul(delta)
                .ok_or(DexError::Overflow)?
                / FEE_GROWTH_PRECISION;
            Amount::try_from(scaled).map_err(|_| DexError::Overflow)
        };
        Ok((
            earned(pool.fee_growth_a, self.fee_growth_checkpoint_a)?,
            earned(pool.fee_growth_b, self.fee_growth_checkpoint_b)?,
        ))
    }
}
