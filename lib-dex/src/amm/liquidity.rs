//! Liquidity Manager
//!
//! Pool creation, deposits and withdrawals. Share accounting:
//!
//! - first deposit: `shares = floor(sqrt(amount_a * amount_b))`, of which
//!   [`MINIMUM_LIQUIDITY`] are locked to the zero address forever
//! - later deposits: `shares = min(a * S / reserve_a, b * S / reserve_b)`,
//!   pulling only the proportional amounts (rounded up)
//! - withdrawals: `shares * reserve / S` of each token (rounded down) plus
//!   every LP fee the position has earned
//! - fee claims: pay earned LP fees without touching shares
//!
//! LP fees are credited per share when a swap pays them (see
//! [`Pool::accrue_lp_fee`]); a position settles against the pool's fee
//! growth before its share count changes.

use lib_types::{Address, Amount, PoolId, TokenId};

use crate::amm::{ensure_trading_allowed, math, screen_flash_loan, verify_pool};
use crate::bank::{pool_account, TokenLedger};
use crate::errors::{DexError, DexResult};
use crate::events::DexEvent;
use crate::pool::{canonical_pair, derive_pool_id, LiquidityPosition, Pool, LOCKED_LIQUIDITY_OWNER, MINIMUM_LIQUIDITY};
use crate::security::{FlashLoanCandidate, MutationKind, TradeKind};
use crate::state::StagedState;
use crate::storage::PoolStore;

/// Create a pool with its first deposit
pub fn create_pool<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    creator: Address,
    token_a: TokenId,
    token_b: TokenId,
    amount_a: Amount,
    amount_b: Amount,
) -> DexResult<PoolId> {
    let params = staged.params();
    let height = staged.height();
    let now = staged.timestamp();

    if token_a == token_b {
        return Err(DexError::IdenticalTokens);
    }
    if amount_a == 0 || amount_b == 0 {
        return Err(DexError::ZeroAmount);
    }
    if creator == LOCKED_LIQUIDITY_OWNER {
        return Err(DexError::LockedLiquidity);
    }

    let (token_a, token_b, swapped) = canonical_pair(token_a, token_b);
    let (amount_a, amount_b) = if swapped { (amount_b, amount_a) } else { (amount_a, amount_b) };

    let pool_id = derive_pool_id(&token_a, &token_b);
    if staged.pool(&pool_id)?.is_some() {
        return Err(DexError::PoolAlreadyExists(pool_id));
    }

    let min = params.liquidity.min_initial_deposit;
    let smallest = amount_a.min(amount_b);
    if smallest < min {
        return Err(DexError::DepositTooSmall { min, got: smallest });
    }

    if let Some(last) = staged.last_pool_creation(&creator)? {
        let ready_at = last.saturating_add(params.liquidity.pool_creation_cooldown);
        if height < ready_at {
            return Err(DexError::PoolCreationCooldown { ready_at });
        }
    }

    check_price_ratio(amount_a, amount_b, params.liquidity.max_price_ratio)?;

    let shares = u64::try_from(math::integer_sqrt((amount_a as u128) * (amount_b as u128)))
        .map_err(|_| DexError::Overflow)?;
    if shares <= MINIMUM_LIQUIDITY {
        return Err(DexError::InsufficientLiquidityMinted);
    }

    let account = pool_account(&pool_id);
    staged.transfer(&creator, &account, &token_a, amount_a)?;
    staged.transfer(&creator, &account, &token_b, amount_b)?;

    let mut pool = Pool::new(token_a, token_b, params.swap.default_fee_bps, height);
    pool.reserve_a = amount_a;
    pool.reserve_b = amount_b;
    pool.total_shares = shares;

    let mut locked = LiquidityPosition::new(pool_id, LOCKED_LIQUIDITY_OWNER, height);
    locked.shares = MINIMUM_LIQUIDITY;
    let mut position = LiquidityPosition::new(pool_id, creator, height);
    position.shares = shares - MINIMUM_LIQUIDITY;
    staged.put_position(locked);
    staged.put_position(position);

    // Seed price history and breaker baselines
    let price = pool.spot_price()?;
    let mut twap = staged.twap(&pool_id)?;
    twap.record(now, price);
    staged.put_twap(pool_id, twap);
    let mut breaker = staged.breaker(&pool_id)?;
    let cb = &params.circuit_breaker;
    breaker.observe(price, height, now, &cb.windows, cb.cooldown_blocks);
    staged.put_breaker(pool_id, breaker);

    staged.put_pool_creation(creator, height);
    staged.put_pool(pool.clone());
    verify_pool(staged, MutationKind::Liquidity, None, &pool)?;

    staged.record_trade(pool_id, creator, TradeKind::AddLiquidity { shares });
    staged.emit(DexEvent::PoolCreated {
        pool_id,
        creator,
        token_a,
        token_b,
        amount_a,
        amount_b,
        shares,
        block_height: height,
        timestamp: now,
    });
    tracing::info!(
        "Pool {} created by {}: {} / {} ({} shares, {} locked)",
        pool_id,
        creator,
        amount_a,
        amount_b,
        shares,
        MINIMUM_LIQUIDITY
    );
    Ok(pool_id)
}

/// Deposit into an existing pool; returns the shares minted
pub fn add_liquidity<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    provider: Address,
    pool_id: PoolId,
    amount_a: Amount,
    amount_b: Amount,
) -> DexResult<u64> {
    let params = staged.params();
    let height = staged.height();

    if amount_a == 0 || amount_b == 0 {
        return Err(DexError::ZeroAmount);
    }
    if provider == LOCKED_LIQUIDITY_OWNER {
        return Err(DexError::LockedLiquidity);
    }
    let before = staged.require_pool(&pool_id)?;
    if !before.is_initialized() {
        return Err(DexError::InsufficientLiquidity);
    }

    ensure_trading_allowed(staged, &pool_id)?;
    screen_flash_loan(staged, &pool_id, FlashLoanCandidate::AddLiquidity { provider })?;

    let supply = before.total_shares;
    let shares = math::mul_div(amount_a, supply, before.reserve_a)?
        .min(math::mul_div(amount_b, supply, before.reserve_b)?);
    if shares == 0 {
        return Err(DexError::InsufficientLiquidityMinted);
    }
    let used_a = math::mul_div_ceil(shares, before.reserve_a, supply)?;
    let used_b = math::mul_div_ceil(shares, before.reserve_b, supply)?;

    let mut position = staged
        .position(&pool_id, &provider)?
        .unwrap_or_else(|| LiquidityPosition::new(pool_id, provider, height));
    let held_after = position.shares.checked_add(shares).ok_or(DexError::Overflow)?;
    let supply_after = supply.checked_add(shares).ok_or(DexError::Overflow)?;
    check_concentration(
        provider,
        (position.shares, supply),
        (held_after, supply_after),
        params.liquidity.max_provider_share_bps,
    )?;

    let mut pool = before.clone();
    pool.reserve_a = pool.reserve_a.checked_add(used_a).ok_or(DexError::Overflow)?;
    pool.reserve_b = pool.reserve_b.checked_add(used_b).ok_or(DexError::Overflow)?;
    pool.total_shares = supply_after;
    check_price_ratio(pool.reserve_a, pool.reserve_b, params.liquidity.max_price_ratio)?;

    let account = pool_account(&pool_id);
    staged.transfer(&provider, &account, &before.token_a, used_a)?;
    staged.transfer(&provider, &account, &before.token_b, used_b)?;

    // Fees earned so far stay with the old share count
    position.settle_fees(&before)?;
    position.shares = held_after;
    position.last_action_height = height;
    staged.put_position(position);

    staged.put_pool(pool.clone());
    verify_pool(staged, MutationKind::Liquidity, Some(&before), &pool)?;

    let large = math::ratio_bps(shares as u128, supply as u128);
    if large > params.liquidity.large_addition_bps as u128 {
        tracing::warn!(
            "Large liquidity addition to {} by {}: {} shares on top of {} ({} bps)",
            pool_id,
            provider,
            shares,
            supply,
            large
        );
        staged.emit(DexEvent::LargeLiquidityAddition {
            pool_id,
            provider,
            shares,
            total_shares_before: supply,
            block_height: height,
            timestamp: staged.timestamp(),
        });
    }

    staged.record_trade(pool_id, provider, TradeKind::AddLiquidity { shares });
    staged.emit(DexEvent::LiquidityAdded {
        pool_id,
        provider,
        amount_a: used_a,
        amount_b: used_b,
        shares,
        block_height: height,
        timestamp: staged.timestamp(),
    });
    tracing::debug!("Liquidity added to {} by {}: {} / {} for {} shares", pool_id, provider, used_a, used_b, shares);
    Ok(shares)
}

/// Burn shares for a proportional payout; allowed while the pool is paused
pub fn remove_liquidity<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    provider: Address,
    pool_id: PoolId,
    shares: u64,
) -> DexResult<(Amount, Amount)> {
    let params = staged.params();
    let height = staged.height();

    if shares == 0 {
        return Err(DexError::ZeroAmount);
    }
    if provider == LOCKED_LIQUIDITY_OWNER {
        return Err(DexError::LockedLiquidity);
    }
    let before = staged.require_pool(&pool_id)?;
    let mut position = staged
        .position(&pool_id, &provider)?
        .ok_or(DexError::PositionNotFound { pool: pool_id, provider })?;
    if shares > position.shares {
        return Err(DexError::InsufficientShares {
            have: position.shares,
            need: shares,
        });
    }

    // Same-block round trips are scored (and announced) before the plain gap rule
    screen_flash_loan(staged, &pool_id, FlashLoanCandidate::RemoveLiquidity { provider })?;
    let min_gap = params.flash_loan.min_blocks_between_actions;
    if height.saturating_sub(position.last_action_height) < min_gap {
        return Err(DexError::FlashLoanProtection {
            last_action: position.last_action_height,
            ready_at: position.last_action_height.saturating_add(min_gap),
        });
    }

    let supply = before.total_shares;
    let amount_a = math::mul_div(shares, before.reserve_a, supply)?;
    let amount_b = math::mul_div(shares, before.reserve_b, supply)?;
    if amount_a == 0 && amount_b == 0 {
        return Err(DexError::InsufficientLiquidity);
    }
    position.settle_fees(&before)?;
    let (fees_a, fees_b) = position.take_fees();
    let payout_a = amount_a.checked_add(fees_a).ok_or(DexError::Overflow)?;
    let payout_b = amount_b.checked_add(fees_b).ok_or(DexError::Overflow)?;

    let account = pool_account(&pool_id);
    staged.transfer(&account, &provider, &before.token_a, payout_a)?;
    staged.transfer(&account, &provider, &before.token_b, payout_b)?;

    let mut pool = before.clone();
    pool.reserve_a -= amount_a;
    pool.reserve_b -= amount_b;
    release_lp_fees(&mut pool, fees_a, fees_b)?;
    pool.total_shares -= shares;

    position.shares -= shares;
    if position.shares == 0 {
        staged.delete_position(&pool_id, &provider);
    } else {
        position.last_action_height = height;
        staged.put_position(position);
    }

    staged.put_pool(pool.clone());
    verify_pool(staged, MutationKind::Liquidity, Some(&before), &pool)?;

    staged.record_trade(pool_id, provider, TradeKind::RemoveLiquidity { shares });
    staged.emit(DexEvent::LiquidityRemoved {
        pool_id,
        provider,
        amount_a: payout_a,
        amount_b: payout_b,
        shares,
        block_height: height,
        timestamp: staged.timestamp(),
    });
    tracing::debug!(
        "Liquidity removed from {} by {}: {} shares for {} / {}",
        pool_id,
        provider,
        shares,
        payout_a,
        payout_b
    );
    Ok((payout_a, payout_b))
}

/// Pay out the LP fees a position has earned; allowed while the pool is paused
pub fn claim_lp_fees<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    provider: Address,
    pool_id: PoolId,
) -> DexResult<(Amount, Amount)> {
    if provider == LOCKED_LIQUIDITY_OWNER {
        return Err(DexError::LockedLiquidity);
    }
    let before = staged.require_pool(&pool_id)?;
    let mut position = staged
        .position(&pool_id, &provider)?
        .ok_or(DexError::PositionNotFound { pool: pool_id, provider })?;

    position.settle_fees(&before)?;
    let (fees_a, fees_b) = position.take_fees();
    staged.put_position(position);
    if fees_a == 0 && fees_b == 0 {
        return Ok((0, 0));
    }

    let account = pool_account(&pool_id);
    staged.transfer(&account, &provider, &before.token_a, fees_a)?;
    staged.transfer(&account, &provider, &before.token_b, fees_b)?;

    let mut pool = before.clone();
    release_lp_fees(&mut pool, fees_a, fees_b)?;
    staged.put_pool(pool.clone());
    verify_pool(staged, MutationKind::Liquidity, Some(&before), &pool)?;

    staged.emit(DexEvent::LpFeesClaimed {
        pool_id,
        provider,
        amount_a: fees_a,
        amount_b: fees_b,
        block_height: staged.height(),
        timestamp: staged.timestamp(),
    });
    tracing::debug!("LP fees claimed from {} by {}: {} / {}", pool_id, provider, fees_a, fees_b);
    Ok((fees_a, fees_b))
}

fn release_lp_fees(pool: &mut Pool, fees_a: Amount, fees_b: Amount) -> DexResult<()> {
    let pool_id = pool.id;
    let short = move || DexError::critical("fee_accounting", format!("pool {pool_id} owes more LP fees than it holds"));
    let lp_fees_a = pool.lp_fees_a.checked_sub(fees_a).ok_or_else(short)?;
    let lp_fees_b = pool.lp_fees_b.checked_sub(fees_b).ok_or_else(short)?;
    pool.lp_fees_a = lp_fees_a;
    pool.lp_fees_b = lp_fees_b;
    Ok(())
}

/// Neither reserve may exceed the other by more than `max_ratio`
fn check_price_ratio(reserve_a: Amount, reserve_b: Amount, max_ratio: u64) -> DexResult<()> {
    let (a, b, max) = (reserve_a as u128, reserve_b as u128, max_ratio as u128);
    if a * max < b || b * max < a {
        return Err(DexError::PriceRatioOutOfBounds {
            reserve_a,
            reserve_b,
            max_ratio,
        });
    }
    Ok(())
}

/// Refuse a deposit that lifts a provider across the share cap. Providers
/// already above it, such as a pool's creator, may keep topping up.
fn check_concentration(
    provider: Address,
    (held_before, supply_before): (u64, u64),
    (held_after, supply_after): (u64, u64),
    max_bps: u16,
) -> DexResult<()> {
    let max = max_bps as u128;
    let share_before = math::ratio_bps(held_before as u128, supply_before as u128);
    let share_after = math::ratio_bps(held_after as u128, supply_after as u128);
    if share_before <= max && share_after > max {
        return Err(DexError::ProviderConcentration {
            provider,
            share_bps: share_after,
            max_bps,
        });
    }
    Ok(())
}
