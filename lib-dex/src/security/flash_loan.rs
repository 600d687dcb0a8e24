//! Flash-Loan Detector
//!
//! Looks at a single pool within the current block and scores three signals:
//!
//! - **Borrow-repay**: the same provider adds and removes liquidity. Always
//!   unambiguous (10000 bps).
//! - **Oversized swap**: amount_in above the configured fraction of
//!   reserve_in. 6000 bps at the threshold, rising linearly to 10000 bps at
//!   twice the threshold.
//! - **Swap burst**: more swaps than allowed in one block. 9000 bps when the
//!   candidate's trader alone exceeds the limit, 5000 bps when the burst is
//!   spread across traders.
//!
//! Each additional signal adds 1000 bps to the strongest one.

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount};

use crate::amm::math;
use crate::params::FlashLoanParams;
use crate::security::block_ledger::{TradeKind, TradeRecord};

const FULL: u128 = 10_000;

/// Individual signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashLoanSignal {
    BorrowRepay,
    OversizedSwap { size_bps: u128 },
    SwapBurst { swaps: usize, by_trader: usize },
}

/// Operation being screened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLoanCandidate {
    Swap {
        trader: Address,
        amount_in: Amount,
        reserve_in: Amount,
    },
    AddLiquidity {
        provider: Address,
    },
    RemoveLiquidity {
        provider: Address,
    },
}

impl FlashLoanCandidate {
    pub fn actor(&self) -> Address {
        match self {
            FlashLoanCandidate::Swap { trader, .. } => *trader,
            FlashLoanCandidate::AddLiquidity { provider }
            | FlashLoanCandidate::RemoveLiquidity { provider } => *provider,
        }
    }
}

/// Detector finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanFinding {
    pub actor: Address,
    pub signals: Vec<FlashLoanSignal>,
    pub confidence_bps: u16,
    pub blocked: bool,
}

impl FlashLoanFinding {
    pub fn describe(&self) -> String {
        let names: Vec<&str> = self
            .signals
            .iter()
            .map(|s| match s {
                FlashLoanSignal::BorrowRepay => "same-block add/remove liquidity",
                FlashLoanSignal::OversizedSwap { .. } => "oversized swap",
                FlashLoanSignal::SwapBurst { .. } => "swap burst",
            })
            .collect();
        format!(
            "flash-loan pattern: {} ({} bps confidence)",
            names.join(", "),
            self.confidence_bps
        )
    }
}

pub struct FlashLoanDetector<'a> {
    params: &'a FlashLoanParams,
}

impl<'a> FlashLoanDetector<'a> {
    pub fn new(params: &'a FlashLoanParams) -> Self {
        Self { params }
    }

    /// Screen a candidate against this block's records for its pool
    pub fn inspect(
        &self,
        block_history: &[TradeRecord],
        candidate: &FlashLoanCandidate,
    ) -> Option<FlashLoanFinding> {
        let actor = candidate.actor();
        let mut scored: Vec<(FlashLoanSignal, u128)> = Vec::new();

        match *candidate {
            FlashLoanCandidate::AddLiquidity { provider } => {
                let removed = block_history.iter().any(|r| {
                    r.trader == provider && matches!(r.kind, TradeKind::RemoveLiquidity { .. })
                });
                if removed {
                    scored.push((FlashLoanSignal::BorrowRepay, FULL));
                }
            }
            FlashLoanCandidate::RemoveLiquidity { provider } => {
                let added = block_history.iter().any(|r| {
                    r.trader == provider && matches!(r.kind, TradeKind::AddLiquidity { .. })
                });
                if added {
                    scored.push((FlashLoanSignal::BorrowRepay, FULL));
                }
            }
            FlashLoanCandidate::Swap { trader, amount_in, reserve_in } => {
                let threshold = self.params.oversized_swap_bps as u128;
                let size_bps = math::ratio_bps(amount_in as u128, reserve_in as u128);
                if size_bps > threshold {
                    let excess = (size_bps - threshold).min(threshold);
                    let score = 6000 + 4000 * excess / threshold;
                    scored.push((FlashLoanSignal::OversizedSwap { size_bps }, score));
                }

                let swaps = block_history.iter().filter(|r| r.is_swap()).count() + 1;
                if swaps > self.params.max_swaps_per_block {
                    let by_trader = block_history
                        .iter()
                        .filter(|r| r.is_swap() && r.trader == trader)
                        .count()
                        + 1;
                    let score = if by_trader > self.params.max_swaps_per_block {
                        9000
                    } else {
                        5000
                    };
                    scored.push((FlashLoanSignal::SwapBurst { swaps, by_trader }, score));
                }
            }
        }

        let strongest = scored.iter().map(|(_, s)| *s).max()?;
        let extra = (scored.len() as u128 - 1) * 1000;
        let confidence = (strongest + extra).min(FULL) as u16;
        if confidence < self.params.log_confidence_bps {
            return None;
        }

        Some(FlashLoanFinding {
            actor,
            signals: scored.into_iter().map(|(signal, _)| signal).collect(),
            confidence_bps: confidence,
            blocked: confidence >= self.params.reject_confidence_bps,
        })
    }
}
