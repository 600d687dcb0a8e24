//! DEX primitives.
//! Stable, protocol-neutral, behavior-free.
//!
//! Rule: No String identifiers in consensus state. Ever.

pub mod primitives;

pub use primitives::{
    Address, Amount, BlockHeight, Bps, ChannelId, CommitmentHash, PoolId, Timestamp, TokenId,
    BPS_DENOMINATOR,
};
