//! Constant-Product AMM
//!
//! Operations executed against a [`StagedState`]. Each mutating path follows
//! the same order: gate checks, arithmetic, token transfers, record updates,
//! invariant check. Nothing here touches the committed store directly.

pub mod commit_reveal;
pub mod cross_chain;
pub mod liquidity;
pub mod math;
pub mod multihop;
pub mod swap;

pub use commit_reveal::{commitment_hash, RevealedSwap, SwapCommitment, COMMIT_DOMAIN};
pub use cross_chain::RemoteSwapPacket;
pub use multihop::{Hop, MultiHopOutcome};
pub use swap::{SwapAuthorization, SwapOutcome, SwapQuote, SwapRequest};

use lib_types::PoolId;

use crate::bank::{pool_account, TokenLedger};
use crate::errors::{DexError, DexResult};
use crate::events::DexEvent;
use crate::pool::Pool;
use crate::security::{
    CircuitBreakerState, FlashLoanCandidate, FlashLoanDetector, InvariantChecker, MutationKind,
    PoolHoldings,
};
use crate::state::StagedState;
use crate::storage::PoolStore;

/// Circuit-breaker gate shared by swaps and liquidity additions
///
/// A pause whose cooldown has elapsed is cleared here and the cleared state
/// is staged.
pub(crate) fn ensure_trading_allowed<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    pool_id: &PoolId,
) -> DexResult<CircuitBreakerState> {
    let height = staged.height();
    let mut breaker = staged.breaker(pool_id)?;

    if breaker.cooldown_elapsed(height) {
        tracing::info!("Circuit breaker cooldown elapsed for pool {} at height {}", pool_id, height);
        breaker.clear();
        staged.put_breaker(*pool_id, breaker.clone());
        staged.emit(DexEvent::CircuitBreakerCleared {
            pool_id: *pool_id,
            by_governance: false,
            block_height: height,
            timestamp: staged.timestamp(),
        });
    }

    if breaker.is_paused(height) {
        return Err(DexError::TradingPaused {
            pool: *pool_id,
            resume_height: breaker.resume_height(),
        });
    }
    Ok(breaker)
}

/// Run the flash-loan detector over this block's records of the pool
pub(crate) fn screen_flash_loan<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    pool_id: &PoolId,
    candidate: FlashLoanCandidate,
) -> DexResult<()> {
    let history = staged.block_history(pool_id);
    let Some(finding) = FlashLoanDetector::new(&staged.params().flash_loan).inspect(&history, &candidate)
    else {
        return Ok(());
    };

    tracing::warn!(
        "Flash-loan pattern on pool {} by {}: {:?} ({} bps, blocked={})",
        pool_id,
        finding.actor,
        finding.signals,
        finding.confidence_bps,
        finding.blocked
    );
    staged.emit(DexEvent::FlashLoanDetected {
        pool_id: *pool_id,
        actor: finding.actor,
        signals: finding.signals.clone(),
        confidence_bps: finding.confidence_bps,
        blocked: finding.blocked,
        block_height: staged.height(),
        timestamp: staged.timestamp(),
    });

    if finding.blocked {
        return Err(DexError::security(
            finding.describe(),
            "split the operation across blocks; liquidity and large swaps cannot be cycled within one block",
        ));
    }
    Ok(())
}

/// Check every pool invariant against the staged state
pub(crate) fn verify_pool<S: PoolStore, L: TokenLedger>(
    staged: &StagedState<'_, S, L>,
    kind: MutationKind,
    before: Option<&Pool>,
    after: &Pool,
) -> DexResult<()> {
    let account = pool_account(&after.id);
    let holdings = PoolHoldings {
        token_a: staged.balance(&account, &after.token_a),
        token_b: staged.balance(&account, &after.token_b),
    };
    let positions = staged.positions_for_pool(&after.id)?;
    InvariantChecker::new(staged.params().liquidity.invariant_tolerance_bps)
        .check(kind, before, after, &positions, holdings)
}
