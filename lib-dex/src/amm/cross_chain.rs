//! Remote Swap Packets
//!
//! A packet delivered over a cross-chain channel is a swap on behalf of
//! `sender`. Channel nonces are strictly increasing; the nonce is only
//! recorded when the swap commits, so a rejected packet may be retried with
//! the same nonce.

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount, ChannelId, PoolId, Timestamp, TokenId};

use crate::amm::swap::{execute_swap, SwapAuthorization, SwapOutcome, SwapRequest};
use crate::bank::TokenLedger;
use crate::errors::{DexError, DexResult};
use crate::params::CrossChainParams;
use crate::state::StagedState;
use crate::storage::PoolStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSwapPacket {
    pub channel: ChannelId,
    pub nonce: u64,
    pub sender: Address,
    pub timestamp: Timestamp,
    pub pool_id: PoolId,
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: Amount,
    pub min_amount_out: Amount,
}

/// Reject packets that are too old or too far in the future
pub fn check_freshness(
    packet_timestamp: Timestamp,
    now: Timestamp,
    params: &CrossChainParams,
) -> DexResult<()> {
    if packet_timestamp > now.saturating_add(params.max_future_drift_secs) {
        return Err(DexError::StalePacket(format!(
            "timestamp {} is more than {}s ahead of block time {}",
            packet_timestamp, params.max_future_drift_secs, now
        )));
    }
    if now.saturating_sub(packet_timestamp) > params.max_packet_age_secs {
        return Err(DexError::StalePacket(format!(
            "timestamp {} is older than {}s at block time {}",
            packet_timestamp, params.max_packet_age_secs, now
        )));
    }
    Ok(())
}

pub fn receive_remote_swap<S: PoolStore, L: TokenLedger>(
    staged: &mut StagedState<'_, S, L>,
    packet: &RemoteSwapPacket,
) -> DexResult<SwapOutcome> {
    if let Some(last) = staged.channel_nonce(&packet.channel)? {
        if packet.nonce <= last {
            return Err(DexError::NonceReplay {
                channel: packet.channel,
                nonce: packet.nonce,
                last,
            });
        }
    }
    check_freshness(packet.timestamp, staged.timestamp(), &staged.params().cross_chain)?;

    let request = SwapRequest {
        trader: packet.sender,
        pool_id: packet.pool_id,
        token_in: packet.token_in,
        token_out: packet.token_out,
        amount_in: packet.amount_in,
        min_amount_out: packet.min_amount_out,
    };
    let outcome = execute_swap(staged, &request, SwapAuthorization::Direct)?;
    staged.put_channel_nonce(packet.channel, packet.nonce);
    tracing::debug!("Remote swap accepted on channel {} with nonce {}", packet.channel, packet.nonce);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_window() {
        let params = CrossChainParams::default();
        let now = 1_000_000;
        check_freshness(now, now, &params).unwrap();
        check_freshness(now - 86_400, now, &params).unwrap();
        check_freshness(now + 300, now, &params).unwrap();

        assert!(matches!(
            check_freshness(now - 86_401, now, &params).unwrap_err(),
            DexError::StalePacket(_)
        ));
        assert!(matches!(
            check_freshness(now + 301, now, &params).unwrap_err(),
            DexError::StalePacket(_)
        ));
    }
}
