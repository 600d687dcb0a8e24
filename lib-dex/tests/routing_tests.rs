//! Multi-Hop and Remote Swap Tests

mod common;

use anyhow::Result;
use common::*;
use lib_dex::{DexError, Hop, PoolStore, RemoteSwapPacket};
use lib_types::{ChannelId, PoolId};

fn route(pool_ab: PoolId, pool_bc: PoolId) -> Vec<Hop> {
    vec![
        Hop { pool_id: pool_ab, token_in: token_a(), token_out: token_b() },
        Hop { pool_id: pool_bc, token_in: token_b(), token_out: token_c() },
    ]
}

fn two_pools() -> (TestEngine, PoolId, PoolId) {
    let mut engine = engine();
    let ab = pool_ab(&mut engine);
    let bc = pool_bc(&mut engine);
    advance(&mut engine, 1);
    (engine, ab, bc)
}

// ============================================================================
// MULTI-HOP
// ============================================================================

#[test]
fn test_two_hop_swap() -> Result<()> {
    let (mut engine, ab, bc) = two_pools();

    let outcome = engine.swap_multi_hop(addr(3), &route(ab, bc), 10_000, 9_746)?;
    assert_eq!(outcome.amount_out, 9_746);
    assert_eq!(outcome.hops.len(), 2);
    assert_eq!(outcome.hops[0].amount_out, 19_743);

    assert_eq!(balance(&engine, 3, token_a()), FUNDING - 10_000);
    assert_eq!(balance(&engine, 3, token_b()), FUNDING);
    assert_eq!(balance(&engine, 3, token_c()), FUNDING + 9_746);
    assert_eq!(engine.events().of_type("swap_executed").len(), 2);
    Ok(())
}

#[test]
fn test_final_slippage_discards_every_hop() {
    let (mut engine, ab, bc) = two_pools();
    let ab_before = engine.pool(&ab).unwrap();
    let bc_before = engine.pool(&bc).unwrap();

    let err = engine
        .swap_multi_hop(addr(3), &route(ab, bc), 10_000, 9_747)
        .unwrap_err();
    assert_eq!(err, DexError::SlippageExceeded { expected_min: 9_747, actual: 9_746 });

    assert_eq!(engine.pool(&ab).unwrap(), ab_before);
    assert_eq!(engine.pool(&bc).unwrap(), bc_before);
    assert_eq!(balance(&engine, 3, token_a()), FUNDING);
    assert!(engine.events().of_type("swap_executed").is_empty());
    assert!(engine.trade_ledger().current_block(&ab).is_empty());
}

#[test]
fn test_paused_second_hop_discards_first() {
    let (mut engine, ab, bc) = two_pools();
    engine.emergency_pause(governance(), bc, 10).unwrap();
    let ab_before = engine.pool(&ab).unwrap();

    let err = engine
        .swap_multi_hop(addr(3), &route(ab, bc), 10_000, 0)
        .unwrap_err();
    assert!(matches!(err, DexError::TradingPaused { pool, .. } if pool == bc));
    assert_eq!(engine.pool(&ab).unwrap(), ab_before);
    assert_eq!(balance(&engine, 3, token_b()), FUNDING);
}

#[test]
fn test_invalid_routes() {
    let (mut engine, ab, bc) = two_pools();

    assert!(matches!(
        engine.swap_multi_hop(addr(3), &[], 10_000, 0).unwrap_err(),
        DexError::InvalidRoute(_)
    ));

    let broken = vec![
        Hop { pool_id: ab, token_in: token_a(), token_out: token_b() },
        Hop { pool_id: bc, token_in: token_c(), token_out: token_b() },
    ];
    assert!(matches!(
        engine.swap_multi_hop(addr(3), &broken, 10_000, 0).unwrap_err(),
        DexError::InvalidRoute(_)
    ));

    let long: Vec<Hop> = (0..3).flat_map(|_| route(ab, bc)).collect();
    assert_eq!(
        engine.swap_multi_hop(addr(3), &long, 10_000, 0).unwrap_err(),
        DexError::TooManyHops { hops: 6, max: 5 }
    );

    assert_eq!(
        engine.swap_multi_hop(addr(3), &route(ab, bc), 0, 0).unwrap_err(),
        DexError::ZeroAmount
    );
}

// ============================================================================
// REMOTE SWAPS
// ============================================================================

fn channel() -> ChannelId {
    ChannelId::new([7; 32])
}

fn packet(engine: &TestEngine, pool_id: PoolId, nonce: u64, min_amount_out: u64) -> RemoteSwapPacket {
    RemoteSwapPacket {
        channel: channel(),
        nonce,
        sender: addr(3),
        timestamp: engine.timestamp(),
        pool_id,
        token_in: token_a(),
        token_out: token_b(),
        amount_in: 10_000,
        min_amount_out,
    }
}

#[test]
fn test_remote_swap_and_replay() -> Result<()> {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);
    advance(&mut engine, 1);

    let outcome = engine.receive_remote_swap(&packet(&engine, pool_id, 1, 0))?;
    assert_eq!(outcome.amount_out, 19_743);
    assert_eq!(engine.store().get_channel_nonce(&channel())?, Some(1));

    let err = engine
        .receive_remote_swap(&packet(&engine, pool_id, 1, 0))
        .unwrap_err();
    assert_eq!(err, DexError::NonceReplay { channel: channel(), nonce: 1, last: 1 });
    assert!(matches!(
        engine.receive_remote_swap(&packet(&engine, pool_id, 0, 0)).unwrap_err(),
        DexError::NonceReplay { .. }
    ));
    assert_eq!(balance(&engine, 3, token_a()), FUNDING - 10_000);
    Ok(())
}

#[test]
fn test_rejected_packet_does_not_burn_nonce() -> Result<()> {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);
    advance(&mut engine, 1);

    let err = engine
        .receive_remote_swap(&packet(&engine, pool_id, 5, 1_000_000))
        .unwrap_err();
    assert!(matches!(err, DexError::SlippageExceeded { .. }));
    assert_eq!(engine.store().get_channel_nonce(&channel())?, None);

    engine.receive_remote_swap(&packet(&engine, pool_id, 5, 0))?;
    assert_eq!(engine.store().get_channel_nonce(&channel())?, Some(5));
    Ok(())
}

#[test]
fn test_stale_and_future_packets() {
    let mut engine = engine();
    let pool_id = pool_ab(&mut engine);
    // Move past one day of block time
    advance(&mut engine, 8_000);

    let mut old = packet(&engine, pool_id, 1, 0);
    old.timestamp -= 86_401;
    assert!(matches!(
        engine.receive_remote_swap(&old).unwrap_err(),
        DexError::StalePacket(_)
    ));

    let mut future = packet(&engine, pool_id, 1, 0);
    future.timestamp += 301;
    assert!(matches!(
        engine.receive_remote_swap(&future).unwrap_err(),
        DexError::StalePacket(_)
    ));

    engine.receive_remote_swap(&packet(&engine, pool_id, 1, 0)).unwrap();
}
