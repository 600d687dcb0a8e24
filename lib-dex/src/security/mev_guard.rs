//! MEV Guard
//!
//! Detects sandwich sequences against a pool using the per-block trade
//! ledger. For a candidate swap by trader `T` the guard looks back through
//! the current and previous block for:
//!
//! ```text
//!   front-run  : large swap, direction opposite to the candidate
//!   victim(s)  : at least one swap by a third party
//!   candidate  : T reverses the front-run
//! ```
//!
//! Confidence (basis points) is a weighted sum:
//!
//! | Component                | Weight | Value                                   |
//! |--------------------------|--------|-----------------------------------------|
//! | size-ratio similarity    | 35%    | min/max of front-run output vs. total reversal |
//! | timing proximity         | 25%    | 100% same block, 50% adjacent block      |
//! | bracketing address match | 40%    | 100% when front-run and reversal share a trader |
//!
//! The reversal total adds the candidate to every same-direction swap the
//! candidate's trader made since the front-run, so a reversal split into
//! chunks scores like one made in a single trade.
//!
//! Without an address match the score cannot exceed 6000, so a reversal by an
//! unrelated trader is never rejected by default, only logged.

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount, BlockHeight, PoolId};

use crate::params::MevParams;
use crate::pool::SwapDirection;
use crate::security::block_ledger::{TradeKind, TradeRecord};

const WEIGHT_SIZE: u128 = 3500;
const WEIGHT_TIMING: u128 = 2500;
const WEIGHT_ADDRESS: u128 = 4000;
const FULL: u128 = 10_000;

/// Same-direction trade must be this many times larger than the follower to
/// count as a front-run (x100)
const FRONT_RUN_SIZE_RATIO_PCT: u128 = 150;

/// Detected pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MevPattern {
    /// Front-run, victim, reversal
    Sandwich,
    /// Large same-direction trade immediately ahead of the candidate
    FrontRun,
}

/// Swap about to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapCandidate {
    pub pool_id: PoolId,
    pub trader: Address,
    pub direction: SwapDirection,
    pub amount_in: Amount,
    pub height: BlockHeight,
}

/// Guard finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MevFinding {
    pub pattern: MevPattern,
    pub confidence_bps: u16,
    /// Trader of the opening leg
    pub front_runner: Address,
    /// First third-party trade caught in between (or behind, for front-runs)
    pub victim: Address,
    pub blocked: bool,
}

impl MevFinding {
    pub fn describe(&self) -> String {
        match self.pattern {
            MevPattern::Sandwich => format!(
                "sandwich pattern around trader {} ({} bps confidence)",
                self.victim, self.confidence_bps
            ),
            MevPattern::FrontRun => format!(
                "possible front-run by {} ({} bps confidence)",
                self.front_runner, self.confidence_bps
            ),
        }
    }
}

/// Stateless detector over a trade history
pub struct MevGuard<'a> {
    params: &'a MevParams,
}

impl<'a> MevGuard<'a> {
    pub fn new(params: &'a MevParams) -> Self {
        Self { params }
    }

    /// Inspect a candidate against the pool's recent history
    ///
    /// `history` must be in execution order and contain only this pool's
    /// records. Returns the highest-confidence finding at or above the log
    /// threshold, with `blocked` set when it reaches the reject threshold.
    pub fn inspect(&self, history: &[TradeRecord], candidate: &SwapCandidate) -> Option<MevFinding> {
        let mut best = self.sandwich(history, candidate);

        if best.is_none() {
            best = self.front_run(history, candidate);
        }

        let mut finding = best?;
        if finding.confidence_bps < self.params.log_confidence_bps {
            return None;
        }
        finding.blocked = finding.pattern == MevPattern::Sandwich
            && finding.confidence_bps >= self.params.reject_confidence_bps;
        Some(finding)
    }

    fn sandwich(&self, history: &[TradeRecord], candidate: &SwapCandidate) -> Option<MevFinding> {
        let opening = candidate.direction.opposite();
        let mut best: Option<MevFinding> = None;

        for (i, front) in history.iter().enumerate() {
            let TradeKind::Swap { direction, amount_out, size_bps, .. } = front.kind else {
                continue;
            };
            if direction != opening
                || size_bps < self.params.min_front_run_bps as u128
                || front.height + 1 < candidate.height
            {
                continue;
            }

            // A third party must trade between the two legs
            let victim = history[i + 1..]
                .iter()
                .find(|r| r.is_swap() && r.trader != front.trader && r.trader != candidate.trader);
            let Some(victim) = victim else {
                continue;
            };

            let reversed = history[i + 1..]
                .iter()
                .filter(|r| r.trader == candidate.trader && r.swap_direction() == Some(candidate.direction))
                .filter_map(|r| match r.kind {
                    TradeKind::Swap { amount_in, .. } => Some(amount_in),
                    _ => None,
                })
                .fold(candidate.amount_in, Amount::saturating_add);

            let similarity = similarity_bps(amount_out, reversed);
            let timing = if front.height == candidate.height { FULL } else { FULL / 2 };
            let address = if front.trader == candidate.trader { FULL } else { 0 };

            let confidence = (WEIGHT_SIZE * similarity + WEIGHT_TIMING * timing + WEIGHT_ADDRESS * address)
                / FULL;
            let confidence = confidence.min(FULL) as u16;

            if best.as_ref().map_or(true, |b| confidence > b.confidence_bps) {
                best = Some(MevFinding {
                    pattern: MevPattern::Sandwich,
                    confidence_bps: confidence,
                    front_runner: front.trader,
                    victim: victim.trader,
                    blocked: false,
                });
            }
        }
        best
    }

    /// A large same-direction swap by someone else right before the candidate
    fn front_run(&self, history: &[TradeRecord], candidate: &SwapCandidate) -> Option<MevFinding> {
        let last = history.iter().rev().find(|r| r.is_swap())?;
        let TradeKind::Swap { direction, amount_in, .. } = last.kind else {
            return None;
        };
        if direction != candidate.direction
            || last.trader == candidate.trader
            || last.height != candidate.height
        {
            return None;
        }
        if (amount_in as u128) * 100 < (candidate.amount_in as u128) * FRONT_RUN_SIZE_RATIO_PCT {
            return None;
        }

        Some(MevFinding {
            pattern: MevPattern::FrontRun,
            confidence_bps: self.params.log_confidence_bps,
            front_runner: last.trader,
            victim: candidate.trader,
            blocked: false,
        })
    }
}

/// `min(a, b) / max(a, b)` in basis points
fn similarity_bps(a: Amount, b: Amount) -> u128 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if hi == 0 {
        return 0;
    }
    (lo as u128) * FULL / (hi as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(id: u8) -> Address {
        Address::new([id; 32])
    }

    fn pool() -> PoolId {
        PoolId::new([7; 32])
    }

    fn record(trader: u8, direction: SwapDirection, amount_in: Amount, amount_out: Amount, size_bps: u128, height: BlockHeight) -> TradeRecord {
        TradeRecord {
            pool_id: pool(),
            trader: addr(trader),
            kind: TradeKind::Swap { direction, amount_in, amount_out, size_bps },
            height,
            sequence: 0,
        }
    }

    fn candidate(trader: u8, direction: SwapDirection, amount_in: Amount, height: BlockHeight) -> SwapCandidate {
        SwapCandidate { pool_id: pool(), trader: addr(trader), direction, amount_in, height }
    }

    // ========================================================================
    // SANDWICH
    // ========================================================================

    #[test]
    fn test_same_block_sandwich_is_blocked() {
        let params = MevParams::default();
        let guard = MevGuard::new(&params);
        let history = vec![
            record(1, SwapDirection::AToB, 30_000, 58_000, 300, 5),
            record(2, SwapDirection::AToB, 10_000, 19_000, 100, 5),
        ];

        let finding = guard
            .inspect(&history, &candidate(1, SwapDirection::BToA, 58_000, 5))
            .unwrap();
        assert_eq!(finding.pattern, MevPattern::Sandwich);
        assert_eq!(finding.confidence_bps, 10_000);
        assert_eq!(finding.victim, addr(2));
        assert!(finding.blocked);
    }

    #[test]
    fn test_adjacent_block_sandwich_needs_closer_sizes() {
        let params = MevParams::default();
        let guard = MevGuard::new(&params);
        let history = vec![
            record(1, SwapDirection::AToB, 30_000, 58_000, 300, 4),
            record(2, SwapDirection::AToB, 10_000, 19_000, 100, 5),
        ];

        // Full reversal one block later: 3500 + 1250 + 4000
        let full = guard.inspect(&history, &candidate(1, SwapDirection::BToA, 58_000, 5)).unwrap();
        assert_eq!(full.confidence_bps, 8750);
        assert!(full.blocked);

        // Reversing a quarter of the position: 875 + 1250 + 4000 = 6125
        let partial = guard.inspect(&history, &candidate(1, SwapDirection::BToA, 14_500, 5)).unwrap();
        assert_eq!(partial.confidence_bps, 6125);
        assert!(!partial.blocked);
    }

    #[test]
    fn test_split_reversal_is_scored_as_a_whole() {
        let params = MevParams::default();
        let guard = MevGuard::new(&params);
        let mut history = vec![
            record(1, SwapDirection::AToB, 30_000, 58_000, 300, 4),
            record(2, SwapDirection::AToB, 10_000, 19_000, 100, 4),
        ];

        // First third alone: 1166 + 1250 + 4000
        let first = guard.inspect(&history, &candidate(1, SwapDirection::BToA, 19_334, 5)).unwrap();
        assert_eq!(first.confidence_bps, 6416);
        assert!(!first.blocked);

        // The second third is judged on two thirds of the position
        history.push(record(1, SwapDirection::BToA, 19_334, 10_300, 100, 5));
        let second = guard.inspect(&history, &candidate(1, SwapDirection::BToA, 19_333, 5)).unwrap();
        assert_eq!(second.confidence_bps, 7583);
        assert!(second.blocked);

        // Another trader's chunk is judged on its own size
        assert!(guard.inspect(&history, &candidate(3, SwapDirection::BToA, 19_333, 5)).is_none());
    }

    #[test]
    fn test_no_victim_no_sandwich() {
        let params = MevParams::default();
        let guard = MevGuard::new(&params);
        let history = vec![record(1, SwapDirection::AToB, 30_000, 58_000, 300, 5)];
        assert!(guard.inspect(&history, &candidate(1, SwapDirection::BToA, 58_000, 5)).is_none());
    }

    #[test]
    fn test_unrelated_reversal_is_only_logged() {
        let params = MevParams::default();
        let guard = MevGuard::new(&params);
        let history = vec![
            record(1, SwapDirection::AToB, 30_000, 58_000, 300, 5),
            record(2, SwapDirection::AToB, 10_000, 19_000, 100, 5),
        ];
        let finding = guard.inspect(&history, &candidate(3, SwapDirection::BToA, 58_000, 5)).unwrap();
        assert_eq!(finding.confidence_bps, 6000);
        assert!(!finding.blocked);
    }

    #[test]
    fn test_small_front_leg_is_ignored() {
        let params = MevParams::default();
        let guard = MevGuard::new(&params);
        let history = vec![
            record(1, SwapDirection::AToB, 300, 580, 3, 5),
            record(2, SwapDirection::AToB, 10_000, 19_000, 100, 5),
        ];
        assert!(guard.inspect(&history, &candidate(1, SwapDirection::BToA, 580, 5)).is_none());
    }

    #[test]
    fn test_old_blocks_are_ignored() {
        let params = MevParams::default();
        let guard = MevGuard::new(&params);
        let history = vec![
            record(1, SwapDirection::AToB, 30_000, 58_000, 300, 3),
            record(2, SwapDirection::AToB, 10_000, 19_000, 100, 3),
        ];
        assert!(guard.inspect(&history, &candidate(1, SwapDirection::BToA, 58_000, 5)).is_none());
    }

    // ========================================================================
    // FRONT-RUN
    // ========================================================================

    #[test]
    fn test_front_run_is_logged_never_blocked() {
        let params = MevParams::default();
        let guard = MevGuard::new(&params);
        let history = vec![record(1, SwapDirection::AToB, 30_000, 58_000, 300, 5)];

        let finding = guard.inspect(&history, &candidate(2, SwapDirection::AToB, 10_000, 5)).unwrap();
        assert_eq!(finding.pattern, MevPattern::FrontRun);
        assert_eq!(finding.front_runner, addr(1));
        assert!(!finding.blocked);

        // Similar-sized trades are just a busy pool
        assert!(guard.inspect(&history, &candidate(2, SwapDirection::AToB, 25_000, 5)).is_none());
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity_bps(50, 100), 5_000);
        assert_eq!(similarity_bps(100, 50), 5_000);
        assert_eq!(similarity_bps(0, 0), 0);
    }
}
