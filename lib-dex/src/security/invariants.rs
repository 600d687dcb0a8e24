//! Invariant Checker
//!
//! Runs against the staged state after every mutation and before anything is
//! committed. A failure here means either a bug or a successful attack, so it
//! is reported as `CriticalInvariantViolation`, never as a user error.
//!
//! Checked:
//!
//! 1. **Ordering**: `token_a < token_b`
//! 2. **Reserves**: both positive while shares are outstanding
//! 3. **Constant product** (swaps): `k_after >= k_before * (1 - tolerance)`
//! 4. **Product per share** (liquidity): `sqrt(k) / shares` does not drop
//!    beyond the same tolerance
//! 5. **Share accounting**: `Σ position.shares == total_shares`
//! 6. **Solvency**: the pool account holds at least `reserve + lp_fees` of
//!    each token
//! 7. **Fee accounting**: fees claimable by positions never exceed `lp_fees`

use lib_types::{Amount, Bps, BPS_DENOMINATOR};

use crate::amm::math::integer_sqrt;
use crate::errors::{DexError, DexResult};
use crate::pool::{LiquidityPosition, Pool};

/// Which rule set applies to the mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Swap,
    Liquidity,
}

/// Balances of the pool account at check time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHoldings {
    pub token_a: Amount,
    pub token_b: Amount,
}

pub struct InvariantChecker {
    tolerance_bps: Bps,
}

impl InvariantChecker {
    pub fn new(tolerance_bps: Bps) -> Self {
        Self { tolerance_bps }
    }

    /// Verify `after` given the pre-mutation record (`None` for a new pool)
    pub fn check(
        &self,
        kind: MutationKind,
        before: Option<&Pool>,
        after: &Pool,
        positions: &[LiquidityPosition],
        holdings: PoolHoldings,
    ) -> DexResult<()> {
        if after.token_a >= after.token_b {
            return Err(DexError::critical(
                "canonical_ordering",
                format!("token_a {} is not below token_b {}", after.token_a, after.token_b),
            ));
        }

        if after.total_shares > 0 && (after.reserve_a == 0 || after.reserve_b == 0) {
            return Err(DexError::critical(
                "positive_reserves",
                format!(
                    "reserves ({}, {}) with {} shares outstanding",
                    after.reserve_a, after.reserve_b, after.total_shares
                ),
            ));
        }

        if let Some(before) = before {
            match kind {
                MutationKind::Swap => self.check_constant_product(before, after)?,
                MutationKind::Liquidity => self.check_product_per_share(before, after)?,
            }
        }

        let mut share_sum: u128 = 0;
        let (mut claimable_a, mut claimable_b) = (0u128, 0u128);
        for position in positions.iter().filter(|p| p.pool_id == after.id) {
            share_sum += position.shares as u128;
            let (fees_a, fees_b) = position.pending_fees(after)?;
            claimable_a += fees_a as u128;
            claimable_b += fees_b as u128;
        }
        if share_sum != after.total_shares as u128 {
            return Err(DexError::critical(
                "share_accounting",
                format!("positions sum to {share_sum}, pool records {}", after.total_shares),
            ));
        }

        if claimable_a > after.lp_fees_a as u128 || claimable_b > after.lp_fees_b as u128 {
            return Err(DexError::critical(
                "fee_accounting",
                format!(
                    "positions may claim ({claimable_a}, {claimable_b}) of LP fees ({}, {})",
                    after.lp_fees_a, after.lp_fees_b
                ),
            ));
        }

        let owed_a = after.reserve_a as u128 + after.lp_fees_a as u128;
        let owed_b = after.reserve_b as u128 + after.lp_fees_b as u128;
        if (holdings.token_a as u128) < owed_a || (holdings.token_b as u128) < owed_b {
            return Err(DexError::critical(
                "solvency",
                format!(
                    "pool account holds ({}, {}) but owes ({owed_a}, {owed_b})",
                    holdings.token_a, holdings.token_b
                ),
            ));
        }

        Ok(())
    }

    fn check_constant_product(&self, before: &Pool, after: &Pool) -> DexResult<()> {
        let k_before = before.k();
        let k_after = after.k();
        // k_before * (1 - tol) without overflowing u128
        let allowance = k_before / BPS_DENOMINATOR * self.tolerance_bps as u128;
        let floor = k_before - allowance;
        if k_after < floor {
            return Err(DexError::critical(
                "constant_product",
                format!("k fell from {k_before} to {k_after} (floor {floor})"),
            ));
        }
        Ok(())
    }

    fn check_product_per_share(&self, before: &Pool, after: &Pool) -> DexResult<()> {
        if before.total_shares == 0 || after.total_shares == 0 {
            return Ok(());
        }
        // sqrt(k) <= 2^64 and shares < 2^64, so both sides fit in u128
        let lhs = integer_sqrt(after.k()) * before.total_shares as u128;
        let rhs = integer_sqrt(before.k()) * after.total_shares as u128;
        let floor = rhs - rhs / BPS_DENOMINATOR * self.tolerance_bps as u128;
        if lhs < floor {
            return Err(DexError::critical(
                "product_per_share",
                format!(
                    "sqrt(k)/share fell: before {}/{}, after {}/{}",
                    integer_sqrt(before.k()),
                    before.total_shares,
                    integer_sqrt(after.k()),
                    after.total_shares
                ),
            ));
        }
        Ok(())
    }
}
