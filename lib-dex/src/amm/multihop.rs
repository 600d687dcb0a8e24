//! Multi-Hop Routing
//!
//! Hops run in sequence inside one staged transaction, each through the full
//! swap executor. Intermediate hops carry no minimum; only the final output
//! is checked. A failure in any hop discards every hop.

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount, PoolId, TokenId};

use crate::amm::swap::{execute_swap, SwapAuthorization, SwapOutcome, SwapRequest};
use crate::bank::TokenLedger;
use crate::errors::{DexError, DexResult};
use crate::state::StagedState;
use crate::storage::PoolStore;

/// One leg of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub pool_id: PoolId,
    pub token_in: TokenId,
    pub token_out: TokenId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiHopOutcome {
    pub amount_out: Amount,
    pub hops: Vec<SwapOutcome>,
}

/// Check length and token continuity of a route
pub fn validate_route(route: &[Hop], max_hops: usize) -> DexResult<()> {
    if route.is_empty() {
        return Err(DexError::InvalidRoute("route is empty".to_string()));
    }
    if route.len() > max_hops {
        return Err(DexError::TooManyHops {
            hops: route.len(),
            max: max_hops,
        });
    }
    for (i, pair) in route.windows(2).enumerate() {
        if pair[1].token_in != pair[0].token_out {
            return Err(DexError::InvalidRoute(format!(
                "hop {} takes {} but hop {} produces {}",
                i + 1,
                pair[1].token_in,
                i,
                pair[0].token_out
            )));
        }
    }
    Ok(())
}

pub fn swap_multi_hop<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    trader: Address,
    route: &[Hop],
    amount_in: Amount,
    min_amount_out: Amount,
) -> DexResult<MultiHopOutcome> {
    if amount_in == 0 {
        return Err(DexError::ZeroAmount);
    }
    validate_route(route, staged.params().swap.max_hops)?;

    let mut amount = amount_in;
    let mut hops = Vec::with_capacity(route.len());
    for hop in route {
        let request = SwapRequest {
            trader,
            pool_id: hop.pool_id,
            token_in: hop.token_in,
            token_out: hop.token_out,
            amount_in: amount,
            min_amount_out: 0,
        };
        let outcome = execute_swap(staged, &request, SwapAuthorization::Direct)?;
        amount = outcome.amount_out;
        hops.push(outcome);
    }

    if amount < min_amount_out {
        return Err(DexError::SlippageExceeded {
            expected_min: min_amount_out,
            actual: amount,
        });
    }
    tracing::debug!("Multi-hop swap by {} over {} hop(s): {} in, {} out", trader, route.len(), amount_in, amount);

    Ok(MultiHopOutcome { amount_out: amount, hops })
}
