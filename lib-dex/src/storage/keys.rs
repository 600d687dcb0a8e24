//! Key Encoding Helpers
//!
//! Key encoding is PROTOCOL. Every record lives in one sled tree, so each key
//! starts with a one-byte record prefix followed by fixed-width fields. Never
//! build keys inline in business logic.
//!
//! | Prefix | Record               | Layout                          |
//! |--------|----------------------|---------------------------------|
//! | `p`    | Pool                 | `[p][pool: 32]`                 |
//! | `l`    | LiquidityPosition    | `[l][pool: 32][provider: 32]`   |
//! | `b`    | CircuitBreakerState  | `[b][pool: 32]`                 |
//! | `t`    | TwapBuffer           | `[t][pool: 32]`                 |
//! | `c`    | SwapCommitment       | `[c][hash: 32]`                 |
//! | `n`    | Channel nonce        | `[n][channel: 32]`              |
//! | `k`    | Last pool creation   | `[k][creator: 32]`              |

use lib_types::{Address, ChannelId, CommitmentHash, PoolId};

pub const POOL_PREFIX: u8 = b'p';
pub const POSITION_PREFIX: u8 = b'l';
pub const BREAKER_PREFIX: u8 = b'b';
pub const TWAP_PREFIX: u8 = b't';
pub const COMMITMENT_PREFIX: u8 = b'c';
pub const CHANNEL_NONCE_PREFIX: u8 = b'n';
pub const POOL_CREATION_PREFIX: u8 = b'k';

#[inline]
fn prefixed(prefix: u8, id: &[u8; 32]) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = prefix;
    key[1..].copy_from_slice(id);
    key
}

#[inline]
pub fn pool_key(pool_id: &PoolId) -> [u8; 33] {
    prefixed(POOL_PREFIX, pool_id.as_bytes())
}

/// Layout: [l][pool: 32][provider: 32] = 65 bytes
///
/// Positions of one pool are contiguous, so `position_prefix` range-scans them.
#[inline]
pub fn position_key(pool_id: &PoolId, provider: &Address) -> [u8; 65] {
    let mut key = [0u8; 65];
    key[0] = POSITION_PREFIX;
    key[1..33].copy_from_slice(pool_id.as_bytes());
    key[33..].copy_from_slice(provider.as_bytes());
    key
}

#[inline]
pub fn position_prefix(pool_id: &PoolId) -> [u8; 33] {
    prefixed(POSITION_PREFIX, pool_id.as_bytes())
}

#[inline]
pub fn breaker_key(pool_id: &PoolId) -> [u8; 33] {
    prefixed(BREAKER_PREFIX, pool_id.as_bytes())
}

#[inline]
pub fn twap_key(pool_id: &PoolId) -> [u8; 33] {
    prefixed(TWAP_PREFIX, pool_id.as_bytes())
}

#[inline]
pub fn commitment_key(hash: &CommitmentHash) -> [u8; 33] {
    prefixed(COMMITMENT_PREFIX, hash.as_bytes())
}

#[inline]
pub fn channel_nonce_key(channel: &ChannelId) -> [u8; 33] {
    prefixed(CHANNEL_NONCE_PREFIX, channel.as_bytes())
}

#[inline]
pub fn pool_creation_key(creator: &Address) -> [u8; 33] {
    prefixed(POOL_CREATION_PREFIX, creator.as_bytes())
}

/// Recover the pool id from a pool key
#[inline]
pub fn parse_pool_key(key: &[u8]) -> Option<PoolId> {
    if key.len() != 33 || key[0] != POOL_PREFIX {
        return None;
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&key[1..]);
    Some(PoolId::new(bytes))
}
