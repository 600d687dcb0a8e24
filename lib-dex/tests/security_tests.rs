//! Security Layer Tests
//!
//! Circuit breaker, MEV guard, flash-loan detector and TWAP guard driven
//! through real swaps.

mod common;

use anyhow::Result;
use common::*;
use lib_dex::security::{FlashLoanSignal, MevPattern};
use lib_dex::{DexError, DexEvent, PauseReason};
use lib_types::PoolId;

fn mev_events(engine: &TestEngine) -> Vec<DexEvent> {
    engine.events().of_type("mev_detected").into_iter().cloned().collect()
}

fn flash_events(engine: &TestEngine) -> Vec<DexEvent> {
    engine.events().of_type("flash_loan_detected").into_iter().cloned().collect()
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Two swaps 12 seconds apart push the price 11.05% below the 60s baseline
fn tripped() -> (TestEngine, PoolId) {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);

    advance(&mut engine, 1);
    engine
        .swap(addr(2), pool_id, token_a(), 50_000, token_b(), 0)
        .expect("9.27% move stays under the breaker");
    assert!(!engine.breaker(&pool_id).unwrap().paused_flag());

    advance(&mut engine, 1);
    let outcome = engine
        .swap(addr(3), pool_id, token_a(), 10_500, token_b(), 0)
        .expect("the tripping swap itself commits");
    assert_eq!(outcome.amount_out, 18_809);
    (engine, pool_id)
}

#[test]
fn test_breaker_trips_and_blocks_swaps() {
    let (mut engine, pool_id) = tripped();

    let breaker = engine.breaker(&pool_id).unwrap();
    assert!(breaker.is_paused(3));
    assert_eq!(breaker.resume_height(), 603);
    assert!(matches!(
        breaker.reason(),
        Some(PauseReason::Volatility { window_secs: 60, threshold_bps: 1000, .. })
    ));
    assert_eq!(engine.events().of_type("circuit_breaker_triggered").len(), 1);

    let err = engine
        .swap(addr(4), pool_id, token_a(), 1_000, token_b(), 0)
        .unwrap_err();
    assert_eq!(err, DexError::TradingPaused { pool: pool_id, resume_height: 603 });
}

#[test]
fn test_pause_blocks_deposits_but_not_withdrawals() -> Result<()> {
    let (mut engine, pool_id) = tripped();

    let err = engine
        .add_liquidity(addr(4), pool_id, 10_000, 20_000)
        .unwrap_err();
    assert!(matches!(err, DexError::TradingPaused { .. }));

    advance(&mut engine, 10);
    let (out_a, out_b) = engine.remove_liquidity(addr(1), pool_id, 100_000)?;
    assert!(out_a > 0 && out_b > 0);
    Ok(())
}

#[test]
fn test_breaker_clears_after_cooldown() -> Result<()> {
    let (mut engine, pool_id) = tripped();

    advance(&mut engine, 599);
    assert!(engine.swap(addr(4), pool_id, token_a(), 1_000, token_b(), 0).is_err());

    advance(&mut engine, 1);
    engine.swap(addr(4), pool_id, token_b(), 1_000, token_a(), 0)?;
    assert!(!engine.breaker(&pool_id)?.paused_flag());

    let cleared = engine.events().of_type("circuit_breaker_cleared");
    assert_eq!(cleared.len(), 1);
    assert!(matches!(cleared[0], DexEvent::CircuitBreakerCleared { by_governance: false, .. }));
    Ok(())
}

#[test]
fn test_end_block_clears_elapsed_breakers() -> Result<()> {
    let (mut engine, pool_id) = tripped();
    advance(&mut engine, 600);

    let summary = engine.end_block()?;
    assert_eq!(summary.breakers_cleared, 1);
    assert!(!engine.breaker(&pool_id)?.paused_flag());
    Ok(())
}

#[test]
fn test_governance_override() -> Result<()> {
    let (mut engine, pool_id) = tripped();

    assert_eq!(
        engine.force_resume(addr(1), pool_id).unwrap_err(),
        DexError::Unauthorized(addr(1))
    );
    assert!(engine.force_resume(governance(), pool_id)?);
    assert!(!engine.force_resume(governance(), pool_id)?);

    // Well inside the original cooldown; old prices have left the TWAP window
    advance(&mut engine, 300);
    engine.swap(addr(4), pool_id, token_b(), 1_000, token_a(), 0)?;
    let cleared = engine.events().of_type("circuit_breaker_cleared");
    assert!(matches!(cleared[0], DexEvent::CircuitBreakerCleared { by_governance: true, .. }));
    Ok(())
}

#[test]
fn test_emergency_pause() -> Result<()> {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);

    assert!(matches!(
        engine.emergency_pause(governance(), pool_id, 0).unwrap_err(),
        DexError::InvalidParams(_)
    ));
    assert_eq!(engine.emergency_pause(governance(), pool_id, 5)?, 6);
    assert_eq!(engine.breaker(&pool_id)?.reason(), Some(PauseReason::Governance));

    advance(&mut engine, 1);
    assert!(matches!(
        engine.swap(addr(2), pool_id, token_a(), 1_000, token_b(), 0).unwrap_err(),
        DexError::TradingPaused { resume_height: 6, .. }
    ));

    advance(&mut engine, 4);
    engine.swap(addr(2), pool_id, token_a(), 1_000, token_b(), 0)?;
    Ok(())
}

// ============================================================================
// MEV GUARD
// ============================================================================

/// X buys B with 30,000 A, then Y buys with 10,000 A
fn front_run(engine: &mut TestEngine) -> (PoolId, u64) {
    let pool_id = pool_ab(engine);
    advance(engine, 1);
    let front = engine
        .swap(addr(2), pool_id, token_a(), 30_000, token_b(), 0)
        .expect("front leg");
    assert_eq!(front.amount_out, 58_082);
    engine
        .swap(addr(3), pool_id, token_a(), 10_000, token_b(), 0)
        .expect("victim trade");
    (pool_id, front.amount_out)
}

#[test]
fn test_victim_trade_logs_front_run() {
    let mut engine = engine();
    front_run(&mut engine);

    let events = mev_events(&engine);
    assert_eq!(events.len(), 1);
    match &events[0] {
        DexEvent::MevDetected { trader, pattern, confidence_bps, blocked, .. } => {
            assert_eq!(*trader, addr(3));
            assert_eq!(*pattern, MevPattern::FrontRun);
            assert_eq!(*confidence_bps, 5000);
            assert!(!blocked);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_same_block_sandwich_is_rejected() {
    let mut engine = engine();
    let (pool_id, front_out) = front_run(&mut engine);
    let b_before = balance(&engine, 2, token_b());
    let pool_before = engine.pool(&pool_id).unwrap();

    let err = engine
        .swap(addr(2), pool_id, token_b(), front_out, token_a(), 0)
        .unwrap_err();
    assert!(matches!(err, DexError::SecurityRejection { .. }));
    assert!(err.remediation().is_some());

    // Nothing moved, but the alert was published
    assert_eq!(balance(&engine, 2, token_b()), b_before);
    assert_eq!(engine.pool(&pool_id).unwrap(), pool_before);
    let events = mev_events(&engine);
    assert!(matches!(
        events.last(),
        Some(DexEvent::MevDetected {
            pattern: MevPattern::Sandwich,
            confidence_bps: 10_000,
            blocked: true,
            ..
        })
    ));
}

#[test]
fn test_adjacent_block_sandwich_is_rejected() {
    let mut engine = engine();
    let (pool_id, front_out) = front_run(&mut engine);
    advance(&mut engine, 1);

    let err = engine
        .swap(addr(2), pool_id, token_b(), front_out, token_a(), 0)
        .unwrap_err();
    assert!(matches!(err, DexError::SecurityRejection { .. }));
    assert!(matches!(
        mev_events(&engine).last(),
        Some(DexEvent::MevDetected { confidence_bps: 8750, blocked: true, .. })
    ));
}

#[test]
fn test_reversal_by_unrelated_trader_is_only_logged() -> Result<()> {
    let mut engine = engine();
    let (pool_id, front_out) = front_run(&mut engine);

    let outcome = engine.swap(addr(4), pool_id, token_b(), front_out, token_a(), 0)?;
    assert_eq!(outcome.amount_out, 30_394);
    assert!(matches!(
        mev_events(&engine).last(),
        Some(DexEvent::MevDetected {
            pattern: MevPattern::Sandwich,
            confidence_bps: 6000,
            blocked: false,
            ..
        })
    ));
    Ok(())
}

#[test]
fn test_split_reversal_is_rejected_once_it_adds_up() -> Result<()> {
    let mut engine = engine();
    let (pool_id, _) = front_run(&mut engine);
    advance(&mut engine, 1);

    // A third of the position alone looks like ordinary trading
    engine.swap(addr(2), pool_id, token_b(), 19_360, token_a(), 0)?;
    assert!(matches!(
        mev_events(&engine).last(),
        Some(DexEvent::MevDetected { confidence_bps: 6416, blocked: false, .. })
    ));

    // The second third completes two thirds of the reversal
    let err = engine
        .swap(addr(2), pool_id, token_b(), 19_360, token_a(), 0)
        .unwrap_err();
    assert!(matches!(err, DexError::SecurityRejection { .. }));
    assert!(matches!(
        mev_events(&engine).last(),
        Some(DexEvent::MevDetected {
            pattern: MevPattern::Sandwich,
            confidence_bps: 7583,
            blocked: true,
            ..
        })
    ));
    Ok(())
}

// ============================================================================
// FLASH-LOAN DETECTOR
// ============================================================================

#[test]
fn test_swap_burst_by_one_trader_is_rejected() -> Result<()> {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);
    advance(&mut engine, 1);

    for _ in 0..3 {
        engine.swap(addr(2), pool_id, token_a(), 1_000, token_b(), 0)?;
    }
    let err = engine
        .swap(addr(2), pool_id, token_a(), 1_000, token_b(), 0)
        .unwrap_err();
    assert!(matches!(err, DexError::SecurityRejection { .. }));

    let events = flash_events(&engine);
    assert_eq!(events.len(), 1);
    match &events[0] {
        DexEvent::FlashLoanDetected { signals, confidence_bps, blocked, .. } => {
            assert_eq!(signals, &vec![FlashLoanSignal::SwapBurst { swaps: 4, by_trader: 4 }]);
            assert_eq!(*confidence_bps, 9000);
            assert!(*blocked);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // The next block starts a fresh count
    advance(&mut engine, 1);
    engine.swap(addr(2), pool_id, token_a(), 1_000, token_b(), 0)?;
    Ok(())
}

#[test]
fn test_spread_burst_is_only_logged() -> Result<()> {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);
    advance(&mut engine, 1);

    for trader in 2..=5 {
        engine.swap(addr(trader), pool_id, token_a(), 1_000, token_b(), 0)?;
    }
    assert!(matches!(
        flash_events(&engine).last(),
        Some(DexEvent::FlashLoanDetected { confidence_bps: 5000, blocked: false, .. })
    ));
    Ok(())
}

#[test]
fn test_oversized_swap() {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);
    advance(&mut engine, 1);

    // 20% of reserve_in: rejected outright
    let err = engine
        .swap(addr(2), pool_id, token_a(), 200_000, token_b(), 0)
        .unwrap_err();
    assert!(matches!(err, DexError::SecurityRejection { .. }));

    // 12%: logged, then sent to commit-reveal
    let err = engine
        .swap(addr(2), pool_id, token_a(), 120_000, token_b(), 0)
        .unwrap_err();
    assert!(matches!(err, DexError::CommitRequired { .. }));
    assert!(matches!(
        flash_events(&engine).last(),
        Some(DexEvent::FlashLoanDetected { confidence_bps: 6800, blocked: false, .. })
    ));
}

#[test]
fn test_remove_then_add_in_one_block_is_rejected() -> Result<()> {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);
    advance(&mut engine, 1);
    let shares = engine.add_liquidity(addr(2), pool_id, 100_000, 200_000)?;

    advance(&mut engine, 10);
    engine.remove_liquidity(addr(2), pool_id, shares / 2)?;
    let err = engine
        .add_liquidity(addr(2), pool_id, 100_000, 200_000)
        .unwrap_err();
    assert!(matches!(err, DexError::SecurityRejection { .. }));
    assert!(matches!(
        flash_events(&engine).last(),
        Some(DexEvent::FlashLoanDetected { confidence_bps: 10_000, blocked: true, .. })
    ));
    Ok(())
}

// ============================================================================
// TWAP GUARD
// ============================================================================

#[test]
fn test_twap_history_grows_with_swaps() -> Result<()> {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);
    assert_eq!(engine.twap(&pool_id)?.expect("seeded").len(), 1);

    for _ in 0..3 {
        advance(&mut engine, 1);
        engine.swap(addr(2), pool_id, token_a(), 1_000, token_b(), 0)?;
    }
    let twap = engine.twap(&pool_id)?.expect("seeded");
    assert_eq!(twap.len(), 4);
    assert_eq!(twap.latest().map(|o| o.timestamp), Some(4 * BLOCK_TIME));
    Ok(())
}

#[test]
fn test_twap_warn_only_mode() -> Result<()> {
    let mut engine = engine_with(test_params().with_twap_warn_only(true));
    let pool_id = pool_ab(&mut engine);
    advance(&mut engine, 1);
    engine.swap(addr(2), pool_id, token_a(), 1, token_b(), 0)?;
    Ok(())
}
