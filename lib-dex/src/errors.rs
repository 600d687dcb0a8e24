//! DEX Errors
//!
//! Every entry point returns `DexResult<T>`. Errors are grouped by how the
//! surrounding ledger should treat them (see [`ErrorKind`]): all of them are
//! synchronous rejections of the current transaction, and only
//! `CriticalInvariantViolation` warrants operational paging.

use thiserror::Error;

use lib_types::{Address, Amount, BlockHeight, ChannelId, CommitmentHash, PoolId, TokenId};

/// Result alias used across the engine
pub type DexResult<T> = Result<T, DexError>;

/// Result alias for store implementations
pub type StorageResult<T> = Result<T, StorageError>;

/// Coarse classification of a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Slippage,
    Security,
    Commit,
    Liquidity,
    Critical,
    Internal,
}

/// Error raised by a `PoolStore` backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt key in store: {0}")]
    CorruptKey(String),
}

/// Error raised by the balance-transfer collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient balance of {token} for {account}: have {have}, need {need}")]
    InsufficientBalance {
        account: Address,
        token: TokenId,
        have: Amount,
        need: Amount,
    },

    #[error("Balance overflow crediting {token} to {account}")]
    BalanceOverflow { account: Address, token: TokenId },
}

/// Engine error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DexError {
    // =========================================================================
    // Validation
    // =========================================================================

    #[error("Pool not found: {0}")]
    PoolNotFound(PoolId),

    #[error("Pool already exists: {0}")]
    PoolAlreadyExists(PoolId),

    #[error("Pool tokens must differ")]
    IdenticalTokens,

    #[error("Token {token} is not traded by pool {pool}")]
    InvalidTokenPair { pool: PoolId, token: TokenId },

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Initial deposit too small: minimum {min}, got {got}")]
    DepositTooSmall { min: Amount, got: Amount },

    #[error("Pool creation cooldown active until height {ready_at}")]
    PoolCreationCooldown { ready_at: BlockHeight },

    #[error("No liquidity position for {provider} in pool {pool}")]
    PositionNotFound { pool: PoolId, provider: Address },

    #[error("Insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: u64, need: u64 },

    #[error("Minimum liquidity is permanently locked")]
    LockedLiquidity,

    #[error("Unauthorized: {0} is not the governance authority")]
    Unauthorized(Address),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Route has {hops} hops, maximum is {max}")]
    TooManyHops { hops: usize, max: usize },

    #[error("Commitment not found: {0}")]
    CommitmentNotFound(CommitmentHash),

    #[error("Commitment {0} belongs to a different trader or pool")]
    CommitmentMismatch(CommitmentHash),

    #[error("Commitment already exists: {0}")]
    DuplicateCommitment(CommitmentHash),

    #[error("Reveal too early: allowed from height {ready_at}")]
    RevealTooEarly { ready_at: BlockHeight },

    #[error("Nonce replay on channel {channel}: got {nonce}, last accepted {last}")]
    NonceReplay {
        channel: ChannelId,
        nonce: u64,
        last: u64,
    },

    #[error("Stale packet: {0}")]
    StalePacket(String),

    #[error("Reserve ratio {reserve_a}:{reserve_b} exceeds the 1:{max_ratio} bound")]
    PriceRatioOutOfBounds {
        reserve_a: Amount,
        reserve_b: Amount,
        max_ratio: u64,
    },

    #[error("Deposit would give {provider} {share_bps} bps of pool shares (max {max_bps})")]
    ProviderConcentration {
        provider: Address,
        share_bps: u128,
        max_bps: u16,
    },

    #[error("Block height must increase: current {current}, proposed {proposed}")]
    InvalidBlock {
        current: BlockHeight,
        proposed: BlockHeight,
    },

    // =========================================================================
    // Slippage
    // =========================================================================

    #[error("Slippage exceeded: expected at least {expected_min}, got {actual}")]
    SlippageExceeded { expected_min: Amount, actual: Amount },

    #[error("Excessive drain: output {amount_out} exceeds {max_out} allowed per swap")]
    ExcessiveDrain { amount_out: Amount, max_out: Amount },

    #[error("Price impact {impact_bps} bps exceeds maximum {max_bps}")]
    PriceImpactTooHigh { impact_bps: u128, max_bps: u16 },

    // =========================================================================
    // Security
    // =========================================================================

    #[error("Trading paused on pool {pool} until height {resume_height}")]
    TradingPaused {
        pool: PoolId,
        resume_height: BlockHeight,
    },

    #[error("Security rejection: {reason}")]
    SecurityRejection { reason: String, remediation: String },

    #[error("Flash-loan protection: last action at height {last_action}, next allowed at {ready_at}")]
    FlashLoanProtection {
        last_action: BlockHeight,
        ready_at: BlockHeight,
    },

    #[error("Execution price deviates {deviation_bps} bps from TWAP (max {max_bps})")]
    TwapDeviation { deviation_bps: u128, max_bps: u16 },

    // =========================================================================
    // Commit-reveal
    // =========================================================================

    #[error("Swap of {amount_in} exceeds the large-swap threshold {threshold}; commit first")]
    CommitRequired { amount_in: Amount, threshold: Amount },

    #[error("Commitment expired at height {expired_at}; deposit forfeited")]
    CommitExpired { expired_at: BlockHeight },

    // =========================================================================
    // Liquidity
    // =========================================================================

    #[error("Insufficient liquidity")]
    InsufficientLiquidity,

    #[error("Deposit too small to mint any shares")]
    InsufficientLiquidityMinted,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // =========================================================================
    // Critical
    // =========================================================================

    #[error("CRITICAL invariant violation [{invariant}]: {detail}")]
    CriticalInvariantViolation { invariant: String, detail: String },

    // =========================================================================
    // Internal
    // =========================================================================

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Arithmetic overflow")]
    Overflow,
}

impl DexError {
    /// Build a security rejection with its remediation hint
    pub fn security(reason: impl Into<String>, remediation: impl Into<String>) -> Self {
        DexError::SecurityRejection {
            reason: reason.into(),
            remediation: remediation.into(),
        }
    }

    pub fn critical(invariant: impl Into<String>, detail: impl Into<String>) -> Self {
        DexError::CriticalInvariantViolation {
            invariant: invariant.into(),
            detail: detail.into(),
        }
    }

    /// True only for post-mutation invariant failures
    pub fn is_critical(&self) -> bool {
        matches!(self, DexError::CriticalInvariantViolation { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        use DexError::*;
        match self {
            PoolNotFound(_)
            | PoolAlreadyExists(_)
            | IdenticalTokens
            | InvalidTokenPair { .. }
            | ZeroAmount
            | DepositTooSmall { .. }
            | PoolCreationCooldown { .. }
            | PositionNotFound { .. }
            | InsufficientShares { .. }
            | LockedLiquidity
            | Unauthorized(_)
            | InvalidParams(_)
            | InvalidRoute(_)
            | TooManyHops { .. }
            | CommitmentNotFound(_)
            | CommitmentMismatch(_)
            | DuplicateCommitment(_)
            | RevealTooEarly { .. }
            | NonceReplay { .. }
            | StalePacket(_)
            | PriceRatioOutOfBounds { .. }
            | ProviderConcentration { .. }
            | InvalidBlock { .. } => ErrorKind::Validation,
            SlippageExceeded { .. } | ExcessiveDrain { .. } | PriceImpactTooHigh { .. } => {
                ErrorKind::Slippage
            }
            TradingPaused { .. }
            | SecurityRejection { .. }
            | FlashLoanProtection { .. }
            | TwapDeviation { .. } => ErrorKind::Security,
            CommitRequired { .. } | CommitExpired { .. } => ErrorKind::Commit,
            InsufficientLiquidity | InsufficientLiquidityMinted | Ledger(_) => {
                ErrorKind::Liquidity
            }
            CriticalInvariantViolation { .. } => ErrorKind::Critical,
            Storage(_) | Overflow => ErrorKind::Internal,
        }
    }

    /// Human-readable next step for the submitter, where one exists
    pub fn remediation(&self) -> Option<String> {
        match self {
            DexError::SecurityRejection { remediation, .. } => Some(remediation.clone()),
            DexError::TradingPaused { resume_height, .. } => Some(format!(
                "trading resumes at height {resume_height} unless governance clears the pause earlier"
            )),
            DexError::FlashLoanProtection { ready_at, .. } => {
                Some(format!("retry the withdrawal at or after height {ready_at}"))
            }
            DexError::TwapDeviation { .. } => {
                Some("split the trade or wait for the average price to catch up".to_string())
            }
            DexError::CommitRequired { .. } => Some(
                "submit a swap commitment and reveal it between 2 and 50 blocks later".to_string(),
            ),
            DexError::SlippageExceeded { .. } => {
                Some("lower min_amount_out or reduce the trade size".to_string())
            }
            DexError::PriceImpactTooHigh { .. } => {
                Some("split the trade across several blocks".to_string())
            }
            _ => None,
        }
    }
}
