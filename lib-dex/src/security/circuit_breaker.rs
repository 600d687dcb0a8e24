//! Circuit Breaker
//!
//! Per-pool volatility monitor with independent time windows. Each window
//! keeps a baseline price and the timestamp it was taken at:
//!
//! ```text
//!  observe(price, t)
//!      │
//!      ├── no baseline, or t - start >= duration ──► baseline = price, start = t
//!      │
//!      └── |price - baseline| / baseline > threshold ──► PAUSED until height + cooldown
//! ```
//!
//! Transitions: Active → Paused (threshold breach or governance) → Active
//! (cooldown elapsed or governance override). At most one pause is active per
//! pool; observations are ignored while paused.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lib_types::{BlockHeight, Timestamp};

use crate::amm::math;
use crate::params::BreakerWindow;

/// Why a pool was paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// Price moved beyond a window threshold
    Volatility {
        window_secs: u64,
        deviation_bps: u128,
        threshold_bps: u16,
    },
    /// Governance emergency pause
    Governance,
}

/// Baseline for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBaseline {
    pub baseline_price: u128,
    pub window_start: Timestamp,
    pub window_start_height: BlockHeight,
}

/// Circuit breaker state for one pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    /// Keyed by window duration in seconds
    windows: BTreeMap<u64, WindowBaseline>,
    paused: bool,
    paused_at: Option<BlockHeight>,
    resume_height: BlockHeight,
    reason: Option<PauseReason>,
}

impl CircuitBreakerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a pause is in force at `height`
    pub fn is_paused(&self, height: BlockHeight) -> bool {
        self.paused && height < self.resume_height
    }

    /// True when a pause exists but its cooldown has elapsed
    pub fn cooldown_elapsed(&self, height: BlockHeight) -> bool {
        self.paused && height >= self.resume_height
    }

    pub fn paused_flag(&self) -> bool {
        self.paused
    }

    pub fn paused_at(&self) -> Option<BlockHeight> {
        self.paused_at
    }

    pub fn resume_height(&self) -> BlockHeight {
        self.resume_height
    }

    pub fn reason(&self) -> Option<PauseReason> {
        self.reason
    }

    pub fn baseline(&self, window_secs: u64) -> Option<&WindowBaseline> {
        self.windows.get(&window_secs)
    }

    /// Feed a price observation; returns the reason if this observation trips
    /// the breaker
    pub fn observe(
        &mut self,
        price: u128,
        height: BlockHeight,
        now: Timestamp,
        windows: &[BreakerWindow],
        cooldown_blocks: BlockHeight,
    ) -> Option<PauseReason> {
        if self.paused {
            return None;
        }

        // Windows removed by governance no longer carry a baseline
        self.windows
            .retain(|duration, _| windows.iter().any(|w| w.duration_secs == *duration));

        let mut trip = None;
        for window in windows {
            let reset = match self.windows.get(&window.duration_secs) {
                None => true,
                Some(base) => now.saturating_sub(base.window_start) >= window.duration_secs,
            };
            if reset {
                self.windows.insert(
                    window.duration_secs,
                    WindowBaseline {
                        baseline_price: price,
                        window_start: now,
                        window_start_height: height,
                    },
                );
                continue;
            }

            let Some(base) = self.windows.get(&window.duration_secs) else {
                continue;
            };
            if trip.is_none() && base.baseline_price > 0 {
                let deviation_bps = math::deviation_bps(price, base.baseline_price);
                if deviation_bps > window.threshold_bps as u128 {
                    trip = Some(PauseReason::Volatility {
                        window_secs: window.duration_secs,
                        deviation_bps,
                        threshold_bps: window.threshold_bps,
                    });
                }
            }
        }

        if let Some(reason) = trip {
            self.pause(height, cooldown_blocks, reason);
        }
        trip
    }

    /// Enter the paused state
    pub fn pause(&mut self, height: BlockHeight, blocks: BlockHeight, reason: PauseReason) {
        self.paused = true;
        self.paused_at = Some(height);
        self.resume_height = height.saturating_add(blocks);
        self.reason = Some(reason);
    }

    /// Leave the paused state; baselines restart from the next observation
    pub fn clear(&mut self) {
        self.paused = false;
        self.paused_at = None;
        self.resume_height = 0;
        self.reason = None;
        self.windows.clear();
    }
}
