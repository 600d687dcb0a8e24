//! Fixed-Point AMM Arithmetic
//!
//! Pure functions, no state. All intermediate products are `u128` and every
//! operation that could overflow is checked. Rounding always favours the
//! pool: fees round down, outputs round down, shares round down.

use lib_types::{Amount, Bps, BPS_DENOMINATOR};

use crate::errors::{DexError, DexResult};
use crate::pool::SwapDirection;

/// Price scale (1e18)
pub const PRICE_PRECISION: u128 = 1_000_000_000_000_000_000;

/// `amount * bps / 10000`, rounded down
pub fn bps_of(amount: Amount, bps: Bps) -> DexResult<Amount> {
    let value = (amount as u128)
        .checked_mul(bps as u128)
        .ok_or(DexError::Overflow)?
        / BPS_DENOMINATOR;
    Ok(value as Amount)
}

/// Swap fee on `amount_in`
pub fn calculate_fee(amount_in: Amount, fee_bps: Bps) -> DexResult<Amount> {
    bps_of(amount_in, fee_bps)
}

/// Split a fee into `(lp_fee, protocol_fee)`
pub fn split_fee(fee: Amount, protocol_share_bps: Bps) -> DexResult<(Amount, Amount)> {
    let protocol = bps_of(fee, protocol_share_bps)?;
    Ok((fee - protocol, protocol))
}

/// Constant-product output for a fee-free input
///
/// `reserve_out - reserve_in * reserve_out / (reserve_in + amount_in_net)`,
/// evaluated as `reserve_out * amount_in_net / (reserve_in + amount_in_net)`
/// so the division rounds toward the pool.
pub fn calculate_output(
    amount_in_net: Amount,
    reserve_in: Amount,
    reserve_out: Amount,
) -> DexResult<Amount> {
    if reserve_in == 0 || reserve_out == 0 {
        return Err(DexError::InsufficientLiquidity);
    }

    let numerator = (reserve_out as u128)
        .checked_mul(amount_in_net as u128)
        .ok_or(DexError::Overflow)?;
    let denominator = (reserve_in as u128)
        .checked_add(amount_in_net as u128)
        .ok_or(DexError::Overflow)?;

    // amount_out < reserve_out, so it fits in u64
    Ok((numerator / denominator) as Amount)
}

/// Price of token_a in token_b, scaled by `PRICE_PRECISION`
pub fn spot_price(reserve_a: Amount, reserve_b: Amount) -> DexResult<u128> {
    if reserve_a == 0 || reserve_b == 0 {
        return Err(DexError::InsufficientLiquidity);
    }
    // reserve_b < 2^64 and PRICE_PRECISION < 2^60, so this cannot overflow
    Ok((reserve_b as u128) * PRICE_PRECISION / (reserve_a as u128))
}

/// Realised price of a swap, expressed as token_a in token_b like `spot_price`
pub fn execution_price(
    direction: SwapDirection,
    amount_in_net: Amount,
    amount_out: Amount,
) -> Option<u128> {
    let (a_side, b_side) = match direction {
        SwapDirection::AToB => (amount_in_net, amount_out),
        SwapDirection::BToA => (amount_out, amount_in_net),
    };
    if a_side == 0 {
        return None;
    }
    Some((b_side as u128) * PRICE_PRECISION / (a_side as u128))
}

/// `part / whole` in basis points without overflowing on huge prices
pub fn ratio_bps(part: u128, whole: u128) -> u128 {
    if whole == 0 {
        return u128::MAX;
    }
    match part.checked_mul(BPS_DENOMINATOR) {
        Some(scaled) => scaled / whole,
        None => part / (whole / BPS_DENOMINATOR).max(1),
    }
}

/// Relative distance of `current` from `reference`, in basis points
pub fn deviation_bps(current: u128, reference: u128) -> u128 {
    ratio_bps(current.abs_diff(reference), reference)
}

/// `amount * numerator / denominator` for share arithmetic, rounded down
pub fn mul_div(amount: u64, numerator: u64, denominator: u64) -> DexResult<u64> {
    if denominator == 0 {
        return Err(DexError::InsufficientLiquidity);
    }
    let value = (amount as u128) * (numerator as u128) / (denominator as u128);
    u64::try_from(value).map_err(|_| DexError::Overflow)
}

/// `amount * numerator / denominator`, rounded up
///
/// Used for amounts the pool pulls in, so rounding favours the pool.
pub fn mul_div_ceil(amount: u64, numerator: u64, denominator: u64) -> DexResult<u64> {
    if denominator == 0 {
        return Err(DexError::InsufficientLiquidity);
    }
    let value = ((amount as u128) * (numerator as u128)).div_ceil(denominator as u128);
    u64::try_from(value).map_err(|_| DexError::Overflow)
}

/// Integer square root (floor) using Newton's method
pub fn integer_sqrt(n: u128) -> u128 {
    if n == 0 {
        return 0;
    }
    if n < 4 {
        return 1;
    }

    // Initial guess from the bit length: 2^ceil(bits/2) >= sqrt(n)
    let bits = n.ilog2() + 1;
    let mut x = 1u128 << bits.div_ceil(2);
    loop {
        let next = (x + n / x) / 2;
        if next >= x {
            return x;
        }
        x = next;
    }
}
