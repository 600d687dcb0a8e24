//! Sovereign DEX
//!
//! Constant-product AMM with commit-reveal for large swaps and layered
//! manipulation defences. The engine owns no balances: every token movement
//! goes through the host ledger's [`TokenLedger`], and every record write
//! goes through a [`PoolStore`] batch.
//!
//! ```text
//!                   ┌──────────────────────── DexEngine ───────────────────────┐
//!   entry point ──► │ StagedState ──► gates ──► math ──► transfers ──► checks  │
//!                   │     │             │                                      │
//!                   │     │     breaker · TWAP · MEV · flash loan · drain      │
//!                   │     ▼                                                    │
//!                   │  StagedCommit ──► TokenLedger / PoolStore / EventSink    │
//!                   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Amounts are `u64` with `u128` intermediates, prices carry 18 decimals and
//! every percentage is integer basis points.

pub mod amm;
pub mod bank;
pub mod engine;
pub mod errors;
pub mod events;
pub mod params;
pub mod pool;
pub mod security;
pub mod state;
pub mod storage;

pub use amm::{
    commitment_hash, Hop, MultiHopOutcome, RemoteSwapPacket, RevealedSwap, SwapCommitment,
    SwapOutcome, SwapQuote,
};
pub use bank::{InMemoryLedger, TokenLedger};
pub use engine::{DexEngine, EndBlockSummary};
pub use errors::{DexError, DexResult, ErrorKind, LedgerError, StorageError};
pub use events::{DexEvent, EventSink, InMemoryEventSink, TracingEventSink};
pub use params::DexParams;
pub use pool::{LiquidityPosition, Pool, SwapDirection};
pub use security::{CircuitBreakerState, PauseReason, TwapBuffer};
pub use storage::{MemoryPoolStore, PoolStore, SledPoolStore};
