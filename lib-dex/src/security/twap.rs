//! TWAP Oracle
//!
//! Per-pool ring buffer of price observations with a running cumulative
//! price. The cumulative value at observation `i` is
//!
//! ```text
//! cumulative_i = cumulative_{i-1} + price_{i-1} * (t_i - t_{i-1})
//! ```
//!
//! so the interval leading up to an observation is priced at the previous
//! price, and a price pushed by a swap only starts to weigh once time passes.
//! Accumulation wraps; differences between two observations stay exact as
//! long as the true integral fits in `u128`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lib_types::Timestamp;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TwapError {
    #[error("Insufficient history: {available} observation(s) in window, need 2")]
    InsufficientHistory { available: usize },
}

/// One recorded price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwapObservation {
    pub timestamp: Timestamp,
    pub price: u128,
    pub cumulative: u128,
}

/// Fixed-capacity observation history for one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwapBuffer {
    capacity: usize,
    observations: VecDeque<TwapObservation>,
}

impl TwapBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            observations: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&TwapObservation> {
        self.observations.back()
    }

    pub fn observations(&self) -> impl Iterator<Item = &TwapObservation> {
        self.observations.iter()
    }

    /// Governance may change the capacity; shrinking drops the oldest entries
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(2);
        while self.observations.len() > self.capacity {
            self.observations.pop_front();
        }
    }

    /// Append an observation, evicting the oldest at capacity
    ///
    /// Timestamps never run backwards; an earlier timestamp is clamped to the
    /// latest one.
    pub fn record(&mut self, timestamp: Timestamp, price: u128) {
        let observation = match self.observations.back() {
            Some(last) => {
                let timestamp = timestamp.max(last.timestamp);
                let elapsed = (timestamp - last.timestamp) as u128;
                TwapObservation {
                    timestamp,
                    price,
                    cumulative: last
                        .cumulative
                        .wrapping_add(last.price.wrapping_mul(elapsed)),
                }
            }
            None => TwapObservation {
                timestamp,
                price,
                cumulative: 0,
            },
        };

        while self.observations.len() >= self.capacity {
            self.observations.pop_front();
        }
        self.observations.push_back(observation);
    }

    /// Time-weighted average price over the trailing `window_secs`
    pub fn current_twap(&self, now: Timestamp, window_secs: u64) -> Result<u128, TwapError> {
        let start = now.saturating_sub(window_secs);
        let mut in_window = self.observations.iter().filter(|o| o.timestamp >= start);

        let Some(first) = in_window.next() else {
            return Err(TwapError::InsufficientHistory { available: 0 });
        };
        let mut last = first;
        let mut count = 1usize;
        let mut price_sum = first.price;
        let mut sum_overflowed = false;
        for observation in in_window {
            last = observation;
            count += 1;
            match price_sum.checked_add(observation.price) {
                Some(sum) => price_sum = sum,
                None => sum_overflowed = true,
            }
        }

        if count < 2 {
            return Err(TwapError::InsufficientHistory { available: count });
        }

        let elapsed = (last.timestamp - first.timestamp) as u128;
        if elapsed == 0 {
            // All observations share one timestamp: fall back to the mean
            if sum_overflowed {
                return Ok(last.price);
            }
            return Ok(price_sum / count as u128);
        }

        Ok(last.cumulative.wrapping_sub(first.cumulative) / elapsed)
    }
}
