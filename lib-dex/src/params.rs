//! Governance Parameters
//!
//! Every economic threshold the engine enforces lives here. The values are
//! set at genesis and replaced wholesale through governance; the engine only
//! consumes the resulting values and never hard-codes them.
//!
//! Parameters are grouped by the component that reads them and load from TOML:
//!
//! ```toml
//! [swap]
//! default_fee_bps = 30
//! max_drain_bps = 3000
//!
//! [circuit_breaker]
//! cooldown_blocks = 600
//! ```
//!
//! # Design Principles
//!
//! 1. **Integers only**: percentages are basis points, confidences are basis
//!    points of certainty. No floats reach consensus state.
//! 2. **Validated on entry**: `validate()` runs at engine construction and on
//!    every governance update.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lib_types::{Address, Amount, BlockHeight, Bps, TokenId};

/// Maximum swap fee governance may set (10%)
pub const MAX_FEE_BPS: Bps = 1000;

/// Errors raised while loading or validating parameters
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("Failed to parse parameters: {0}")]
    Parse(String),

    #[error("Invalid parameter {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ParamsError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ParamsError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<ParamsError> for crate::errors::DexError {
    fn from(err: ParamsError) -> Self {
        crate::errors::DexError::InvalidParams(err.to_string())
    }
}

// =============================================================================
// SECTIONS
// =============================================================================

/// Swap executor limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapParams {
    /// Fee charged on new pools, in bps of amount_in
    pub default_fee_bps: Bps,
    /// Share of each fee routed to the protocol collector, in bps of the fee
    pub protocol_fee_share_bps: Bps,
    /// Largest fraction of reserve_out a single swap may take
    pub max_drain_bps: Bps,
    /// Swaps above this fraction of reserve_in must go through commit-reveal
    pub large_swap_threshold_bps: Bps,
    /// Largest spot-price move one swap may cause, revealed swaps included
    pub max_price_impact_bps: Bps,
    /// Maximum hops in a routed swap
    pub max_hops: usize,
}

impl Default for SwapParams {
    fn default() -> Self {
        Self {
            default_fee_bps: 30,
            protocol_fee_share_bps: 1667,
            max_drain_bps: 3000,
            large_swap_threshold_bps: 500,
            max_price_impact_bps: 1500,
            max_hops: 5,
        }
    }
}

/// Commit-reveal timing and deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitRevealParams {
    /// Blocks that must pass after the commit before a reveal is accepted
    pub min_reveal_delay: BlockHeight,
    /// Last block (relative to the commit) at which a reveal is accepted
    pub expiry_blocks: BlockHeight,
    pub deposit_token: TokenId,
    pub deposit_amount: Amount,
    /// Fee kept when a trader cancels their own commitment
    pub cancel_fee_bps: Bps,
}

impl Default for CommitRevealParams {
    fn default() -> Self {
        Self {
            min_reveal_delay: 2,
            expiry_blocks: 50,
            deposit_token: TokenId::native(),
            deposit_amount: 1_000_000,
            cancel_fee_bps: 1000,
        }
    }
}

/// TWAP oracle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwapParams {
    pub capacity: usize,
    pub window_secs: u64,
    pub max_deviation_bps: Bps,
    /// Log deviations instead of rejecting the swap
    pub warn_only: bool,
}

impl Default for TwapParams {
    fn default() -> Self {
        Self {
            capacity: 100,
            window_secs: 3600,
            max_deviation_bps: 1000,
            warn_only: false,
        }
    }
}

/// One circuit-breaker window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerWindow {
    pub duration_secs: u64,
    pub threshold_bps: Bps,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerParams {
    pub windows: Vec<BreakerWindow>,
    pub cooldown_blocks: BlockHeight,
}

impl Default for CircuitBreakerParams {
    fn default() -> Self {
        Self {
            windows: vec![
                BreakerWindow { duration_secs: 60, threshold_bps: 1000 },
                BreakerWindow { duration_secs: 300, threshold_bps: 2000 },
                BreakerWindow { duration_secs: 900, threshold_bps: 2500 },
                BreakerWindow { duration_secs: 3600, threshold_bps: 3000 },
            ],
            cooldown_blocks: 600,
        }
    }
}

/// MEV guard configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MevParams {
    /// Minimum size (bps of reserve_in) for a trade to count as a front-run
    pub min_front_run_bps: Bps,
    pub reject_confidence_bps: Bps,
    pub log_confidence_bps: Bps,
}

impl Default for MevParams {
    fn default() -> Self {
        Self {
            min_front_run_bps: 100,
            reject_confidence_bps: 7000,
            log_confidence_bps: 5000,
        }
    }
}

/// Flash-loan detector and liquidity protection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashLoanParams {
    /// Swaps above this fraction of reserve_in are oversized
    pub oversized_swap_bps: Bps,
    pub max_swaps_per_block: usize,
    pub reject_confidence_bps: Bps,
    pub log_confidence_bps: Bps,
    /// Blocks a provider must wait after any liquidity action before withdrawing
    pub min_blocks_between_actions: BlockHeight,
    /// Bound on ledger entries kept per pool per block
    pub ledger_capacity: usize,
}

impl Default for FlashLoanParams {
    fn default() -> Self {
        Self {
            oversized_swap_bps: 1000,
            max_swaps_per_block: 3,
            reject_confidence_bps: 9000,
            log_confidence_bps: 5000,
            min_blocks_between_actions: 10,
            ledger_capacity: 256,
        }
    }
}

/// Pool creation and invariant tolerance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityParams {
    /// Minimum amount of each token in the first deposit
    pub min_initial_deposit: Amount,
    /// Blocks between two pool creations by the same creator
    pub pool_creation_cooldown: BlockHeight,
    /// Permitted constant-product drop, in bps
    pub invariant_tolerance_bps: Bps,
    /// Bound on `reserve_a / reserve_b` and its inverse after a deposit
    pub max_price_ratio: u64,
    /// A deposit may not lift one provider above this fraction of all shares
    pub max_provider_share_bps: Bps,
    /// Deposits minting more than this fraction of existing shares are announced
    pub large_addition_bps: Bps,
}

impl Default for LiquidityParams {
    fn default() -> Self {
        Self {
            min_initial_deposit: 10_000,
            pool_creation_cooldown: 100,
            invariant_tolerance_bps: 10,
            max_price_ratio: 1_000_000,
            max_provider_share_bps: 9500,
            large_addition_bps: 5000,
        }
    }
}

/// Remote swap packet freshness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossChainParams {
    pub max_packet_age_secs: u64,
    pub max_future_drift_secs: u64,
}

impl Default for CrossChainParams {
    fn default() -> Self {
        Self {
            max_packet_age_secs: 86_400,
            max_future_drift_secs: 300,
        }
    }
}

// =============================================================================
// DEX PARAMS
// =============================================================================

/// Complete parameter set consumed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexParams {
    /// Governance address allowed to pause, resume and update parameters
    #[serde(default = "default_authority")]
    pub authority: Address,

    /// Receives protocol fees, cancellation fees and forfeited deposits
    #[serde(default = "default_fee_collector")]
    pub fee_collector: Address,

    #[serde(default)]
    pub swap: SwapParams,
    #[serde(default)]
    pub commit_reveal: CommitRevealParams,
    #[serde(default)]
    pub twap: TwapParams,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerParams,
    #[serde(default)]
    pub mev: MevParams,
    #[serde(default)]
    pub flash_loan: FlashLoanParams,
    #[serde(default)]
    pub liquidity: LiquidityParams,
    #[serde(default)]
    pub cross_chain: CrossChainParams,
}

/// Default authority (all zeros - must be set in genesis for production)
fn default_authority() -> Address {
    Address::zero()
}

fn default_fee_collector() -> Address {
    crate::bank::module_account(b"DEX_FEE_COLLECTOR_V1", &[])
}

impl Default for DexParams {
    fn default() -> Self {
        Self {
            authority: default_authority(),
            fee_collector: default_fee_collector(),
            swap: SwapParams::default(),
            commit_reveal: CommitRevealParams::default(),
            twap: TwapParams::default(),
            circuit_breaker: CircuitBreakerParams::default(),
            mev: MevParams::default(),
            flash_loan: FlashLoanParams::default(),
            liquidity: LiquidityParams::default(),
            cross_chain: CrossChainParams::default(),
        }
    }
}

impl DexParams {
    pub fn with_authority(mut self, authority: Address) -> Self {
        self.authority = authority;
        self
    }

    pub fn with_fee_collector(mut self, fee_collector: Address) -> Self {
        self.fee_collector = fee_collector;
        self
    }

    pub fn with_pool_creation_cooldown(mut self, blocks: BlockHeight) -> Self {
        self.liquidity.pool_creation_cooldown = blocks;
        self
    }

    pub fn with_twap_warn_only(mut self, warn_only: bool) -> Self {
        self.twap.warn_only = warn_only;
        self
    }

    pub fn with_breaker_cooldown(mut self, blocks: BlockHeight) -> Self {
        self.circuit_breaker.cooldown_blocks = blocks;
        self
    }

    /// Parse from TOML and validate
    pub fn from_toml_str(input: &str) -> Result<Self, ParamsError> {
        let params: DexParams =
            toml::from_str(input).map_err(|e| ParamsError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Load a genesis parameter file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading DEX parameters from {}", path.display()))?;
        let params = Self::from_toml_str(&raw)
            .with_context(|| format!("parsing DEX parameters from {}", path.display()))?;
        tracing::info!("Loaded DEX parameters from {}", path.display());
        Ok(params)
    }

    pub fn to_toml_string(&self) -> Result<String, ParamsError> {
        toml::to_string(self).map_err(|e| ParamsError::Parse(e.to_string()))
    }

    /// Check every field against its permitted range
    pub fn validate(&self) -> Result<(), ParamsError> {
        let bps = |field: &'static str, value: Bps| -> Result<(), ParamsError> {
            if value > 10_000 {
                return Err(ParamsError::invalid(field, format!("{value} exceeds 10000 bps")));
            }
            Ok(())
        };

        if self.swap.default_fee_bps > MAX_FEE_BPS {
            return Err(ParamsError::invalid(
                "swap.default_fee_bps",
                format!("{} exceeds maximum {}", self.swap.default_fee_bps, MAX_FEE_BPS),
            ));
        }
        bps("swap.protocol_fee_share_bps", self.swap.protocol_fee_share_bps)?;
        bps("swap.max_drain_bps", self.swap.max_drain_bps)?;
        bps("swap.large_swap_threshold_bps", self.swap.large_swap_threshold_bps)?;
        if self.swap.max_price_impact_bps == 0 {
            return Err(ParamsError::invalid("swap.max_price_impact_bps", "must be positive"));
        }
        if self.swap.max_drain_bps == 0 {
            return Err(ParamsError::invalid("swap.max_drain_bps", "must be positive"));
        }
        if self.swap.max_hops == 0 {
            return Err(ParamsError::invalid("swap.max_hops", "must be positive"));
        }

        let cr = &self.commit_reveal;
        if cr.expiry_blocks < cr.min_reveal_delay {
            return Err(ParamsError::invalid(
                "commit_reveal.expiry_blocks",
                format!("{} is shorter than min_reveal_delay {}", cr.expiry_blocks, cr.min_reveal_delay),
            ));
        }
        bps("commit_reveal.cancel_fee_bps", cr.cancel_fee_bps)?;

        if self.twap.capacity < 2 {
            return Err(ParamsError::invalid("twap.capacity", "needs at least 2 observations"));
        }
        if self.twap.window_secs == 0 {
            return Err(ParamsError::invalid("twap.window_secs", "must be positive"));
        }

        let mut last_duration = 0;
        for window in &self.circuit_breaker.windows {
            if window.duration_secs <= last_duration {
                return Err(ParamsError::invalid(
                    "circuit_breaker.windows",
                    "durations must be positive and strictly increasing",
                ));
            }
            if window.threshold_bps == 0 {
                return Err(ParamsError::invalid("circuit_breaker.windows", "zero threshold"));
            }
            last_duration = window.duration_secs;
        }

        bps("mev.reject_confidence_bps", self.mev.reject_confidence_bps)?;
        bps("mev.log_confidence_bps", self.mev.log_confidence_bps)?;
        if self.mev.log_confidence_bps > self.mev.reject_confidence_bps {
            return Err(ParamsError::invalid(
                "mev.log_confidence_bps",
                "must not exceed reject_confidence_bps",
            ));
        }

        let fl = &self.flash_loan;
        bps("flash_loan.reject_confidence_bps", fl.reject_confidence_bps)?;
        bps("flash_loan.log_confidence_bps", fl.log_confidence_bps)?;
        if fl.log_confidence_bps > fl.reject_confidence_bps {
            return Err(ParamsError::invalid(
                "flash_loan.log_confidence_bps",
                "must not exceed reject_confidence_bps",
            ));
        }
        if fl.oversized_swap_bps == 0 {
            return Err(ParamsError::invalid("flash_loan.oversized_swap_bps", "must be positive"));
        }
        if fl.ledger_capacity == 0 {
            return Err(ParamsError::invalid("flash_loan.ledger_capacity", "must be positive"));
        }

        let lq = &self.liquidity;
        bps("liquidity.invariant_tolerance_bps", lq.invariant_tolerance_bps)?;
        bps("liquidity.max_provider_share_bps", lq.max_provider_share_bps)?;
        if lq.min_initial_deposit == 0 {
            return Err(ParamsError::invalid("liquidity.min_initial_deposit", "must be positive"));
        }
        if lq.max_price_ratio < 1 {
            return Err(ParamsError::invalid("liquidity.max_price_ratio", "must be at least 1"));
        }
        if lq.max_provider_share_bps == 0 {
            return Err(ParamsError::invalid("liquidity.max_provider_share_bps", "must be positive"));
        }

        Ok(())
    }
}
