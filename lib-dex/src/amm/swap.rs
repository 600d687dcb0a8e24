//! Swap Executor
//!
//! ```text
//!  load pool ─► breaker gate ─► MEV guard ─► flash-loan detector
//!      ─► fee + output ─► slippage / drain ─► commit-reveal gate
//!      ─► price impact ─► transfers ─► reserves ─► TWAP ─► breaker observe ─► invariants
//! ```
//!
//! Output uses `reserve_out * net / (reserve_in + net)` rounded down, so the
//! pool keeps every rounding unit.

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount, CommitmentHash, PoolId, TokenId};

use crate::amm::{ensure_trading_allowed, math, screen_flash_loan, verify_pool};
use crate::bank::{pool_account, TokenLedger};
use crate::errors::{DexError, DexResult};
use crate::events::DexEvent;
use crate::params::DexParams;
use crate::pool::{Pool, SwapDirection};
use crate::security::{FlashLoanCandidate, MevGuard, MutationKind, SwapCandidate, TradeKind, TwapError};
use crate::state::StagedState;
use crate::storage::PoolStore;

/// Swap instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub trader: Address,
    pub pool_id: PoolId,
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: Amount,
    pub min_amount_out: Amount,
}

/// How the swap reached the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAuthorization {
    /// Submitted directly; large swaps are refused
    Direct,
    /// Revealed from a matured commitment
    Revealed(CommitmentHash),
}

/// Result of an executed swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutcome {
    pub amount_out: Amount,
    pub fee_collected: Amount,
    pub lp_fee: Amount,
    pub protocol_fee: Amount,
    /// Spot price of token_a in token_b after the swap
    pub price_after: u128,
}

/// Swap preview against a pool record, without any gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapQuote {
    pub direction: SwapDirection,
    pub amount_out: Amount,
    pub fee: Amount,
    pub lp_fee: Amount,
    pub protocol_fee: Amount,
    /// Spot price movement caused by the swap
    pub price_impact_bps: u128,
}

/// Pure constant-product quote
pub fn quote(
    pool: &Pool,
    token_in: &TokenId,
    token_out: &TokenId,
    amount_in: Amount,
    params: &DexParams,
) -> DexResult<SwapQuote> {
    if amount_in == 0 {
        return Err(DexError::ZeroAmount);
    }
    let direction = pool.direction(token_in, token_out)?;
    let (reserve_in, reserve_out) = pool.reserves(direction);

    let fee = math::calculate_fee(amount_in, pool.fee_bps)?;
    let (lp_fee, protocol_fee) = math::split_fee(fee, params.swap.protocol_fee_share_bps)?;
    let net = amount_in - fee;
    let amount_out = math::calculate_output(net, reserve_in, reserve_out)?;
    if amount_out == 0 || amount_out >= reserve_out {
        return Err(DexError::InsufficientLiquidity);
    }

    let mut after = pool.clone();
    apply_reserves(&mut after, direction, net, amount_out)?;
    let price_impact_bps = math::deviation_bps(after.spot_price()?, pool.spot_price()?);

    Ok(SwapQuote {
        direction,
        amount_out,
        fee,
        lp_fee,
        protocol_fee,
        price_impact_bps,
    })
}

fn apply_reserves(
    pool: &mut Pool,
    direction: SwapDirection,
    amount_in_net: Amount,
    amount_out: Amount,
) -> DexResult<()> {
    let (reserve_in, reserve_out) = match direction {
        SwapDirection::AToB => (&mut pool.reserve_a, &mut pool.reserve_b),
        SwapDirection::BToA => (&mut pool.reserve_b, &mut pool.reserve_a),
    };
    *reserve_in = reserve_in.checked_add(amount_in_net).ok_or(DexError::Overflow)?;
    *reserve_out = reserve_out
        .checked_sub(amount_out)
        .ok_or(DexError::InsufficientLiquidity)?;
    Ok(())
}

/// Execute one swap inside a staged transaction
pub fn execute_swap<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    request: &SwapRequest,
    authorization: SwapAuthorization,
) -> DexResult<SwapOutcome> {
    let params = staged.params();
    let height = staged.height();
    let now = staged.timestamp();

    // 1. Pool, pair, amount
    let before = staged.require_pool(&request.pool_id)?;
    let direction = before.direction(&request.token_in, &request.token_out)?;
    if request.amount_in == 0 {
        return Err(DexError::ZeroAmount);
    }
    let (reserve_in, reserve_out) = before.reserves(direction);

    // 2. Circuit breaker
    let mut breaker = ensure_trading_allowed(staged, &before.id)?;

    // 3. MEV guard, then flash-loan detector
    let history = staged.trade_history(&before.id);
    let candidate = SwapCandidate {
        pool_id: before.id,
        trader: request.trader,
        direction,
        amount_in: request.amount_in,
        height,
    };
    if let Some(finding) = MevGuard::new(&params.mev).inspect(&history, &candidate) {
        tracing::warn!(
            "MEV pattern {:?} on pool {}: front-runner {}, victim {} ({} bps, blocked={})",
            finding.pattern,
            before.id,
            finding.front_runner,
            finding.victim,
            finding.confidence_bps,
            finding.blocked
        );
        staged.emit(DexEvent::MevDetected {
            pool_id: before.id,
            trader: request.trader,
            pattern: finding.pattern,
            confidence_bps: finding.confidence_bps,
            blocked: finding.blocked,
            block_height: height,
            timestamp: now,
        });
        if finding.blocked {
            return Err(DexError::security(
                finding.describe(),
                "submit the trade in a later block or through commit-reveal",
            ));
        }
    }
    screen_flash_loan(
        staged,
        &before.id,
        FlashLoanCandidate::Swap {
            trader: request.trader,
            amount_in: request.amount_in,
            reserve_in,
        },
    )?;

    // 4-5. Fee and output
    let fee = math::calculate_fee(request.amount_in, before.fee_bps)?;
    let (lp_fee, protocol_fee) = math::split_fee(fee, params.swap.protocol_fee_share_bps)?;
    let net = request.amount_in - fee;
    let amount_out = math::calculate_output(net, reserve_in, reserve_out)?;
    if amount_out == 0 || amount_out >= reserve_out {
        return Err(DexError::InsufficientLiquidity);
    }

    // 6. Slippage and drain
    if amount_out < request.min_amount_out {
        return Err(DexError::SlippageExceeded {
            expected_min: request.min_amount_out,
            actual: amount_out,
        });
    }
    let max_out = math::bps_of(reserve_out, params.swap.max_drain_bps)?;
    if amount_out > max_out {
        return Err(DexError::ExcessiveDrain { amount_out, max_out });
    }

    // 7. Large swaps must be revealed from a commitment
    let threshold = math::bps_of(reserve_in, params.swap.large_swap_threshold_bps)?;
    if request.amount_in > threshold && authorization == SwapAuthorization::Direct {
        return Err(DexError::CommitRequired {
            amount_in: request.amount_in,
            threshold,
        });
    }

    // 8. Spot price movement, revealed swaps included
    let mut pool = before.clone();
    apply_reserves(&mut pool, direction, net, amount_out)?;
    let price_after = pool.spot_price()?;
    let impact_bps = math::deviation_bps(price_after, before.spot_price()?);
    if impact_bps > params.swap.max_price_impact_bps as u128 {
        return Err(DexError::PriceImpactTooHigh {
            impact_bps,
            max_bps: params.swap.max_price_impact_bps,
        });
    }

    // 9. Transfers
    let account = pool_account(&before.id);
    staged.transfer(&request.trader, &account, &request.token_in, request.amount_in)?;
    staged.transfer(&account, &request.trader, &request.token_out, amount_out)?;
    staged.transfer(&account, &params.fee_collector, &request.token_in, protocol_fee)?;

    // 10. LP fee accrual to the shares outstanding now, then TWAP
    pool.accrue_lp_fee(direction, lp_fee)?;

    let mut twap = staged.twap(&pool.id)?;
    twap.record(now, price_after);
    if let Some(execution_price) = math::execution_price(direction, net, amount_out) {
        match twap.current_twap(now, params.twap.window_secs) {
            Ok(average) => {
                let deviation_bps = math::deviation_bps(execution_price, average);
                if deviation_bps > params.twap.max_deviation_bps as u128 {
                    if !params.twap.warn_only {
                        return Err(DexError::TwapDeviation {
                            deviation_bps,
                            max_bps: params.twap.max_deviation_bps,
                        });
                    }
                    tracing::warn!(
                        "Swap on pool {} deviates {} bps from TWAP (limit {}), allowed in warn-only mode",
                        pool.id,
                        deviation_bps,
                        params.twap.max_deviation_bps
                    );
                }
            }
            Err(TwapError::InsufficientHistory { available }) => {
                tracing::debug!(
                    "TWAP check skipped for pool {}: {} observation(s) in window",
                    pool.id,
                    available
                );
            }
        }
    }
    staged.put_twap(pool.id, twap);

    // 11. Breaker observes the new price; a trip gates later operations
    let cb = &params.circuit_breaker;
    if let Some(reason) = breaker.observe(price_after, height, now, &cb.windows, cb.cooldown_blocks) {
        tracing::warn!(
            "Circuit breaker tripped on pool {} at height {}: {:?}",
            pool.id,
            height,
            reason
        );
        staged.emit(DexEvent::CircuitBreakerTriggered {
            pool_id: pool.id,
            reason,
            resume_height: breaker.resume_height(),
            block_height: height,
            timestamp: now,
        });
    }
    staged.put_breaker(pool.id, breaker);

    staged.put_pool(pool.clone());
    verify_pool(staged, MutationKind::Swap, Some(&before), &pool)?;

    // 12. Record and announce
    staged.record_trade(
        pool.id,
        request.trader,
        TradeKind::Swap {
            direction,
            amount_in: request.amount_in,
            amount_out,
            size_bps: math::ratio_bps(request.amount_in as u128, reserve_in as u128),
        },
    );
    staged.emit(DexEvent::SwapExecuted {
        pool_id: pool.id,
        trader: request.trader,
        token_in: request.token_in,
        token_out: request.token_out,
        amount_in: request.amount_in,
        amount_out,
        fee,
        protocol_fee,
        block_height: height,
        timestamp: now,
    });
    tracing::debug!(
        "Swap on pool {}: {} in, {} out, fee {} (protocol {})",
        pool.id,
        request.amount_in,
        amount_out,
        fee,
        protocol_fee
    );

    Ok(SwapOutcome {
        amount_out,
        fee_collected: fee,
        lp_fee,
        protocol_fee,
        price_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(id: u8) -> TokenId {
        TokenId::new([id; 32])
    }

    fn reference_pool() -> Pool {
        let mut pool = Pool::new(token(1), token(2), 30, 1);
        pool.reserve_a = 1_000_000;
        pool.reserve_b = 2_000_000;
        pool.total_shares = 1_414_213;
        pool
    }

    #[test]
    fn test_quote_reference_swap() {
        let params = DexParams::default();
        let q = quote(&reference_pool(), &token(1), &token(2), 10_000, &params).unwrap();
        assert_eq!(q.direction, SwapDirection::AToB);
        assert_eq!(q.fee, 30);
        assert_eq!(q.protocol_fee, 5);
        assert_eq!(q.lp_fee, 25);
        assert_eq!(q.amount_out, 19_743);
        assert!(q.price_impact_bps > 0);
    }

    #[test]
    fn test_quote_reverse_direction() {
        let params = DexParams::default();
        let q = quote(&reference_pool(), &token(2), &token(1), 20_000, &params).unwrap();
        assert_eq!(q.direction, SwapDirection::BToA);
        // 60 fee, 19,940 net: 1,000,000 * 19,940 / 2,019,940
        assert_eq!(q.amount_out, 9_871);
    }

    #[test]
    fn test_quote_rejects_bad_input() {
        let params = DexParams::default();
        let pool = reference_pool();
        assert_eq!(quote(&pool, &token(1), &token(2), 0, &params).unwrap_err(), DexError::ZeroAmount);
        assert!(matches!(
            quote(&pool, &token(3), &token(2), 10, &params).unwrap_err(),
            DexError::InvalidTokenPair { .. }
        ));
        // One unit in, fee rounds to zero, output rounds to one
        assert_eq!(quote(&pool, &token(1), &token(2), 1, &params).unwrap().amount_out, 1);
    }

    #[test]
    fn test_apply_reserves_keeps_k() {
        let mut pool = reference_pool();
        let k = pool.k();
        apply_reserves(&mut pool, SwapDirection::AToB, 9_970, 19_743).unwrap();
        assert_eq!(pool.reserve_a, 1_009_970);
        assert_eq!(pool.reserve_b, 1_980_257);
        assert!(pool.k() >= k);
    }

    #[test]
    fn test_quote_impact_tracks_spot_movement() {
        let params = DexParams::default();
        let pool = reference_pool();
        // One unit barely moves the spot price
        assert_eq!(quote(&pool, &token(1), &token(2), 1, &params).unwrap().price_impact_bps, 0);
        // 50,000 A moves it 9.27%, 60,000 A 10.97%
        assert_eq!(quote(&pool, &token(1), &token(2), 50_000, &params).unwrap().price_impact_bps, 927);
        assert_eq!(quote(&pool, &token(1), &token(2), 60_000, &params).unwrap().price_impact_bps, 1097);
    }
}
