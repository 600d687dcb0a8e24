//! Manipulation Defences
//!
//! Each detector is a pure function of the state handed to it. None of them
//! write to the pool store; the swap executor and liquidity manager feed them
//! staged state and act on their verdicts.

pub mod block_ledger;
pub mod circuit_breaker;
pub mod flash_loan;
pub mod invariants;
pub mod mev_guard;
pub mod twap;

pub use block_ledger::{BlockTradeLedger, TradeKind, TradeRecord};
pub use circuit_breaker::{CircuitBreakerState, PauseReason};
pub use flash_loan::{FlashLoanCandidate, FlashLoanDetector, FlashLoanFinding, FlashLoanSignal};
pub use invariants::{InvariantChecker, MutationKind, PoolHoldings};
pub use mev_guard::{MevFinding, MevGuard, MevPattern, SwapCandidate};
pub use twap::{TwapBuffer, TwapError, TwapObservation};
