//! Commit-Reveal Swaps
//!
//! Large swaps are submitted in two steps so nobody can react to their
//! contents before they land:
//!
//! ```text
//!  height h        commit(hash)           deposit → escrow
//!  h+2 ..= h+50    reveal(params, salt)   deposit → trader, swap executes
//!  > h+50          expired                deposit → fee collector
//! ```
//!
//! `hash = blake3(DEX_SWAP_COMMIT_V1 ‖ pool ‖ trader ‖ token_in ‖ token_out ‖
//! amount_in (LE) ‖ min_amount_out (LE) ‖ salt)`.
//!
//! Forfeited records are kept for one more expiry period so late reveals get
//! `CommitExpired` instead of `CommitmentNotFound`, then pruned.

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount, BlockHeight, CommitmentHash, PoolId, TokenId};

use crate::amm::math;
use crate::amm::swap::{execute_swap, SwapAuthorization, SwapOutcome, SwapRequest};
use crate::bank::{commit_escrow_account, TokenLedger};
use crate::errors::{DexError, DexResult};
use crate::events::DexEvent;
use crate::state::StagedState;
use crate::storage::PoolStore;

/// Domain separator for commitment hashes
pub const COMMIT_DOMAIN: &[u8] = b"DEX_SWAP_COMMIT_V1";

/// Escrowed commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapCommitment {
    pub hash: CommitmentHash,
    pub trader: Address,
    pub pool_id: PoolId,
    pub deposit_token: TokenId,
    pub deposit: Amount,
    pub commit_height: BlockHeight,
    /// Last height at which a reveal is accepted
    pub expiry_height: BlockHeight,
    pub forfeited: bool,
}

impl SwapCommitment {
    pub fn reveal_ready_at(&self, min_reveal_delay: BlockHeight) -> BlockHeight {
        self.commit_height.saturating_add(min_reveal_delay)
    }

    pub fn is_expired(&self, height: BlockHeight) -> bool {
        height > self.expiry_height
    }
}

/// Swap parameters hidden behind a commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedSwap {
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: Amount,
    pub min_amount_out: Amount,
}

/// Hash a trader must commit to before revealing `swap`
pub fn commitment_hash(
    pool_id: &PoolId,
    trader: &Address,
    swap: &RevealedSwap,
    salt: &[u8; 32],
) -> CommitmentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(COMMIT_DOMAIN);
    hasher.update(pool_id.as_bytes());
    hasher.update(trader.as_bytes());
    hasher.update(swap.token_in.as_bytes());
    hasher.update(swap.token_out.as_bytes());
    hasher.update(&swap.amount_in.to_le_bytes());
    hasher.update(&swap.min_amount_out.to_le_bytes());
    hasher.update(salt);
    CommitmentHash::new(*hasher.finalize().as_bytes())
}

/// Escrow the deposit and record a commitment
pub fn commit_swap<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    trader: Address,
    pool_id: PoolId,
    hash: CommitmentHash,
) -> DexResult<SwapCommitment> {
    let params = &staged.params().commit_reveal;
    let height = staged.height();

    staged.require_pool(&pool_id)?;
    if staged.commitment(&hash)?.is_some() {
        return Err(DexError::DuplicateCommitment(hash));
    }

    staged.transfer(&trader, &commit_escrow_account(), &params.deposit_token, params.deposit_amount)?;

    let commitment = SwapCommitment {
        hash,
        trader,
        pool_id,
        deposit_token: params.deposit_token,
        deposit: params.deposit_amount,
        commit_height: height,
        expiry_height: height.saturating_add(params.expiry_blocks),
        forfeited: false,
    };
    staged.put_commitment(commitment.clone());
    staged.emit(DexEvent::SwapCommitted {
        commitment: hash,
        pool_id,
        trader,
        deposit: commitment.deposit,
        block_height: height,
        timestamp: staged.timestamp(),
    });
    tracing::debug!("Swap commitment {} by {} expires at {}", hash, trader, commitment.expiry_height);
    Ok(commitment)
}

/// Send an expired commitment's deposit to the fee collector
fn forfeit<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    mut commitment: SwapCommitment,
) -> DexResult<()> {
    let fee_collector = staged.params().fee_collector;
    staged.transfer(
        &commit_escrow_account(),
        &fee_collector,
        &commitment.deposit_token,
        commitment.deposit,
    )?;
    commitment.forfeited = true;
    staged.emit(DexEvent::CommitmentForfeited {
        commitment: commitment.hash,
        pool_id: commitment.pool_id,
        trader: commitment.trader,
        deposit: commitment.deposit,
        block_height: staged.height(),
        timestamp: staged.timestamp(),
    });
    tracing::info!(
        "Commitment {} by {} forfeited {} after expiry at {}",
        commitment.hash,
        commitment.trader,
        commitment.deposit,
        commitment.expiry_height
    );
    staged.put_commitment(commitment);
    Ok(())
}

/// Forfeit `hash` if it has expired
///
/// Returns the expiry height when the commitment is (or already was)
/// forfeited, so the caller can reject the reveal after committing this step.
pub fn forfeit_if_expired<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    hash: &CommitmentHash,
) -> DexResult<Option<BlockHeight>> {
    let Some(commitment) = staged.commitment(hash)? else {
        return Ok(None);
    };
    if commitment.forfeited {
        return Ok(Some(commitment.expiry_height));
    }
    if !commitment.is_expired(staged.height()) {
        return Ok(None);
    }
    let expired_at = commitment.expiry_height;
    forfeit(staged, commitment)?;
    Ok(Some(expired_at))
}

/// Reveal a matured commitment and execute the swap behind it
pub fn reveal_swap<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    trader: Address,
    pool_id: PoolId,
    swap: &RevealedSwap,
    salt: &[u8; 32],
) -> DexResult<SwapOutcome> {
    let height = staged.height();
    let hash = commitment_hash(&pool_id, &trader, swap, salt);
    let commitment = staged
        .commitment(&hash)?
        .ok_or(DexError::CommitmentNotFound(hash))?;

    if commitment.forfeited || commitment.is_expired(height) {
        return Err(DexError::CommitExpired {
            expired_at: commitment.expiry_height,
        });
    }
    if commitment.trader != trader || commitment.pool_id != pool_id {
        return Err(DexError::CommitmentMismatch(hash));
    }
    let ready_at = commitment.reveal_ready_at(staged.params().commit_reveal.min_reveal_delay);
    if height < ready_at {
        return Err(DexError::RevealTooEarly { ready_at });
    }

    staged.transfer(&commit_escrow_account(), &trader, &commitment.deposit_token, commitment.deposit)?;
    staged.delete_commitment(&hash);
    staged.emit(DexEvent::SwapRevealed {
        commitment: hash,
        pool_id,
        trader,
        refund: commitment.deposit,
        block_height: height,
        timestamp: staged.timestamp(),
    });

    let request = SwapRequest {
        trader,
        pool_id,
        token_in: swap.token_in,
        token_out: swap.token_out,
        amount_in: swap.amount_in,
        min_amount_out: swap.min_amount_out,
    };
    execute_swap(staged, &request, SwapAuthorization::Revealed(hash))
}

/// Withdraw a pending commitment, paying the cancellation fee
///
/// Returns `(refund, fee)`.
pub fn cancel_commitment<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    trader: Address,
    hash: CommitmentHash,
) -> DexResult<(Amount, Amount)> {
    let params = staged.params();
    let commitment = staged
        .commitment(&hash)?
        .ok_or(DexError::CommitmentNotFound(hash))?;
    if commitment.trader != trader {
        return Err(DexError::CommitmentMismatch(hash));
    }
    if commitment.forfeited || commitment.is_expired(staged.height()) {
        return Err(DexError::CommitExpired {
            expired_at: commitment.expiry_height,
        });
    }

    let fee = math::bps_of(commitment.deposit, params.commit_reveal.cancel_fee_bps)?;
    let refund = commitment.deposit - fee;
    let escrow = commit_escrow_account();
    staged.transfer(&escrow, &trader, &commitment.deposit_token, refund)?;
    staged.transfer(&escrow, &params.fee_collector, &commitment.deposit_token, fee)?;
    staged.delete_commitment(&hash);
    staged.emit(DexEvent::CommitmentCancelled {
        commitment: hash,
        pool_id: commitment.pool_id,
        trader,
        refund,
        fee,
        block_height: staged.height(),
        timestamp: staged.timestamp(),
    });
    Ok((refund, fee))
}

/// End-of-block sweep: forfeit expired commitments, prune old forfeits
///
/// Returns `(forfeited, pruned)`.
pub fn sweep_commitments<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
) -> DexResult<(usize, usize)> {
    let height = staged.height();
    let retention = staged.params().commit_reveal.expiry_blocks;
    let mut forfeited = 0;
    let mut pruned = 0;

    for commitment in staged.commitments()? {
        if commitment.forfeited {
            if height > commitment.expiry_height.saturating_add(retention) {
                staged.delete_commitment(&commitment.hash);
                pruned += 1;
            }
        } else if commitment.is_expired(height) {
            forfeit(staged, commitment)?;
            forfeited += 1;
        }
    }
    Ok((forfeited, pruned))
}
