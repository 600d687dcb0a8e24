//! DEX Events
//!
//! Structured events published for external indexers. Events of a
//! transaction are buffered in its staged state and only reach the sink when
//! the transaction commits. Security alerts (`mev_detected`,
//! `flash_loan_detected`, `critical_alert`) are the exception: they are
//! published even when the operation that raised them is rejected.

use serde::{Deserialize, Serialize};

use lib_types::{Address, Amount, BlockHeight, CommitmentHash, PoolId, Timestamp, TokenId};

use crate::security::{FlashLoanSignal, MevPattern, PauseReason};

/// Event emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DexEvent {
    PoolCreated {
        pool_id: PoolId,
        creator: Address,
        token_a: TokenId,
        token_b: TokenId,
        amount_a: Amount,
        amount_b: Amount,
        shares: u64,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    LiquidityAdded {
        pool_id: PoolId,
        provider: Address,
        amount_a: Amount,
        amount_b: Amount,
        shares: u64,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    LiquidityRemoved {
        pool_id: PoolId,
        provider: Address,
        amount_a: Amount,
        amount_b: Amount,
        shares: u64,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    LpFeesClaimed {
        pool_id: PoolId,
        provider: Address,
        amount_a: Amount,
        amount_b: Amount,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    /// Deposit that minted more than the configured fraction of existing shares
    LargeLiquidityAddition {
        pool_id: PoolId,
        provider: Address,
        shares: u64,
        total_shares_before: u64,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    SwapExecuted {
        pool_id: PoolId,
        trader: Address,
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Amount,
        amount_out: Amount,
        fee: Amount,
        protocol_fee: Amount,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    SwapCommitted {
        commitment: CommitmentHash,
        pool_id: PoolId,
        trader: Address,
        deposit: Amount,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    SwapRevealed {
        commitment: CommitmentHash,
        pool_id: PoolId,
        trader: Address,
        refund: Amount,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    CommitmentCancelled {
        commitment: CommitmentHash,
        pool_id: PoolId,
        trader: Address,
        refund: Amount,
        fee: Amount,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    CommitmentForfeited {
        commitment: CommitmentHash,
        pool_id: PoolId,
        trader: Address,
        deposit: Amount,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    CircuitBreakerTriggered {
        pool_id: PoolId,
        reason: PauseReason,
        resume_height: BlockHeight,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    CircuitBreakerCleared {
        pool_id: PoolId,
        by_governance: bool,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    MevDetected {
        pool_id: PoolId,
        trader: Address,
        pattern: MevPattern,
        confidence_bps: u16,
        blocked: bool,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    FlashLoanDetected {
        pool_id: PoolId,
        actor: Address,
        signals: Vec<FlashLoanSignal>,
        confidence_bps: u16,
        blocked: bool,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },

    CriticalAlert {
        operation: String,
        invariant: String,
        detail: String,
        block_height: BlockHeight,
        timestamp: Timestamp,
    },
}

impl DexEvent {
    /// Pool the event concerns, if any
    pub fn pool_id(&self) -> Option<&PoolId> {
        match self {
            DexEvent::PoolCreated { pool_id, .. }
            | DexEvent::LiquidityAdded { pool_id, .. }
            | DexEvent::LiquidityRemoved { pool_id, .. }
            | DexEvent::LpFeesClaimed { pool_id, .. }
            | DexEvent::LargeLiquidityAddition { pool_id, .. }
            | DexEvent::SwapExecuted { pool_id, .. }
            | DexEvent::SwapCommitted { pool_id, .. }
            | DexEvent::SwapRevealed { pool_id, .. }
            | DexEvent::CommitmentCancelled { pool_id, .. }
            | DexEvent::CommitmentForfeited { pool_id, .. }
            | DexEvent::CircuitBreakerTriggered { pool_id, .. }
            | DexEvent::CircuitBreakerCleared { pool_id, .. }
            | DexEvent::MevDetected { pool_id, .. }
            | DexEvent::FlashLoanDetected { pool_id, .. } => Some(pool_id),
            DexEvent::CriticalAlert { .. } => None,
        }
    }

    pub fn block_height(&self) -> BlockHeight {
        match self {
            DexEvent::PoolCreated { block_height, .. }
            | DexEvent::LiquidityAdded { block_height, .. }
            | DexEvent::LiquidityRemoved { block_height, .. }
            | DexEvent::LpFeesClaimed { block_height, .. }
            | DexEvent::LargeLiquidityAddition { block_height, .. }
            | DexEvent::SwapExecuted { block_height, .. }
            | DexEvent::SwapCommitted { block_height, .. }
            | DexEvent::SwapRevealed { block_height, .. }
            | DexEvent::CommitmentCancelled { block_height, .. }
            | DexEvent::CommitmentForfeited { block_height, .. }
            | DexEvent::CircuitBreakerTriggered { block_height, .. }
            | DexEvent::CircuitBreakerCleared { block_height, .. }
            | DexEvent::MevDetected { block_height, .. }
            | DexEvent::FlashLoanDetected { block_height, .. }
            | DexEvent::CriticalAlert { block_height, .. } => *block_height,
        }
    }

    /// Get event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            DexEvent::PoolCreated { .. } => "pool_created",
            DexEvent::LiquidityAdded { .. } => "liquidity_added",
            DexEvent::LiquidityRemoved { .. } => "liquidity_removed",
            DexEvent::LpFeesClaimed { .. } => "lp_fees_claimed",
            DexEvent::LargeLiquidityAddition { .. } => "large_liquidity_addition",
            DexEvent::SwapExecuted { .. } => "swap_executed",
            DexEvent::SwapCommitted { .. } => "swap_committed",
            DexEvent::SwapRevealed { .. } => "swap_revealed",
            DexEvent::CommitmentCancelled { .. } => "commitment_cancelled",
            DexEvent::CommitmentForfeited { .. } => "commitment_forfeited",
            DexEvent::CircuitBreakerTriggered { .. } => "circuit_breaker_triggered",
            DexEvent::CircuitBreakerCleared { .. } => "circuit_breaker_cleared",
            DexEvent::MevDetected { .. } => "mev_detected",
            DexEvent::FlashLoanDetected { .. } => "flash_loan_detected",
            DexEvent::CriticalAlert { .. } => "critical_alert",
        }
    }

    /// Security alerts survive the rejection of the operation that raised them
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            DexEvent::MevDetected { .. }
                | DexEvent::FlashLoanDetected { .. }
                | DexEvent::CriticalAlert { .. }
        )
    }

    /// JSON payload for indexers
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Destination for published events
pub trait EventSink {
    fn publish(&mut self, event: DexEvent);
}

/// In-memory sink for tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSink {
    events: Vec<DexEvent>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn events(&self) -> &[DexEvent] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Events of one type, in publication order
    pub fn of_type(&self, event_type: &str) -> Vec<&DexEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn for_pool(&self, pool_id: &PoolId) -> Vec<&DexEvent> {
        self.events
            .iter()
            .filter(|e| e.pool_id() == Some(pool_id))
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for InMemoryEventSink {
    fn publish(&mut self, event: DexEvent) {
        self.events.push(event);
    }
}

/// Sink that writes every event to the `tracing` log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&mut self, event: DexEvent) {
        match event.to_json() {
            Ok(payload) => tracing::info!(target: "dex::events", "{}: {}", event.event_type(), payload),
            Err(e) => tracing::warn!(target: "dex::events", "unserializable {} event: {}", event.event_type(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap_event(pool: u8, height: BlockHeight) -> DexEvent {
        DexEvent::SwapExecuted {
            pool_id: PoolId::new([pool; 32]),
            trader: Address::new([2; 32]),
            token_in: TokenId::new([3; 32]),
            token_out: TokenId::new([4; 32]),
            amount_in: 10_000,
            amount_out: 19_743,
            fee: 30,
            protocol_fee: 5,
            block_height: height,
            timestamp: 1_600_000_000,
        }
    }

    #[test]
    fn test_event_accessors() {
        let event = swap_event(1, 100);
        assert_eq!(event.event_type(), "swap_executed");
        assert_eq!(event.block_height(), 100);
        assert_eq!(event.pool_id(), Some(&PoolId::new([1; 32])));
        assert!(!event.is_alert());
    }

    #[test]
    fn test_alert_classification() {
        let alert = DexEvent::CriticalAlert {
            operation: "swap".into(),
            invariant: "constant_product".into(),
            detail: "k dropped".into(),
            block_height: 1,
            timestamp: 1,
        };
        assert!(alert.is_alert());
        assert!(alert.pool_id().is_none());
    }

    #[test]
    fn test_in_memory_sink_filters() {
        let mut sink = InMemoryEventSink::new();
        sink.publish(swap_event(1, 1));
        sink.publish(swap_event(2, 2));
        sink.publish(DexEvent::CircuitBreakerCleared {
            pool_id: PoolId::new([1; 32]),
            by_governance: true,
            block_height: 3,
            timestamp: 3,
        });

        assert_eq!(sink.event_count(), 3);
        assert_eq!(sink.of_type("swap_executed").len(), 2);
        assert_eq!(sink.for_pool(&PoolId::new([1; 32])).len(), 2);

        sink.clear();
        assert_eq!(sink.event_count(), 0);
    }

    #[test]
    fn test_json_payload() {
        let json = swap_event(1, 7).to_json().unwrap();
        assert!(json.contains("SwapExecuted"));
        assert!(json.contains("19743"));
    }
}
