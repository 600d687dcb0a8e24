//! Canonical Primitive Types for the DEX Engine
//!
//! Rule: No String identifiers in consensus state. Ever.
//!
//! Every identifier that reaches the pool store, an event, or a hash preimage
//! is one of the fixed-size types below. They are:
//! - Fixed-size (no dynamic allocation)
//! - Deterministically serializable
//! - Totally ordered (canonical token ordering depends on it)

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// TYPE ALIASES
// ============================================================================

/// Block height in the chain (0-indexed)
pub type BlockHeight = u64;

/// Block timestamp in Unix seconds, as supplied by the block header
pub type Timestamp = u64;

/// Token amounts in base units
///
/// Products of two amounts are always computed in `u128`.
pub type Amount = u64;

/// Basis points for percentage calculations (10000 = 100%)
pub type Bps = u16;

/// Denominator for all basis-point arithmetic
pub const BPS_DENOMINATOR: u128 = 10_000;

// ============================================================================
// FIXED 32-BYTE IDENTIFIERS
// ============================================================================

macro_rules! fixed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// All-zero value
            pub const fn zero() -> Self {
                Self([0u8; 32])
            }

            /// Get the underlying bytes
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..8]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(&self.0))
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

fixed_id!(
    /// 32-byte account address (derived from a public key or a module domain)
    Address
);

fixed_id!(
    /// 32-byte token identifier
    ///
    /// The zero id is the chain's native token.
    TokenId
);

fixed_id!(
    /// 32-byte pool identifier, derived from the canonically ordered token pair
    PoolId
);

fixed_id!(
    /// Hash binding a hidden swap to its trader, pool and salt
    CommitmentHash
);

fixed_id!(
    /// Cross-chain channel identifier
    ChannelId
);

impl TokenId {
    /// The native token
    pub const fn native() -> Self {
        Self::zero()
    }

    pub fn is_native(&self) -> bool {
        self.is_zero()
    }
}
