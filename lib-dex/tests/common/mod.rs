//! Shared helpers for lib-dex integration tests
//!
//! Blocks are 12 seconds apart. Traders 1..=5 start with 100M of tokens A, B
//! and C and 10M of the native token.

#![allow(dead_code)]

use lib_dex::{DexEngine, DexParams, InMemoryEventSink, InMemoryLedger, MemoryPoolStore, TokenLedger};
use lib_types::{Address, BlockHeight, PoolId, TokenId};

pub type TestEngine = DexEngine<MemoryPoolStore, InMemoryLedger, InMemoryEventSink>;

pub const BLOCK_TIME: u64 = 12;
pub const FUNDING: u64 = 100_000_000;
pub const NATIVE_FUNDING: u64 = 10_000_000;

pub fn token_a() -> TokenId {
    TokenId::new([1; 32])
}

pub fn token_b() -> TokenId {
    TokenId::new([2; 32])
}

pub fn token_c() -> TokenId {
    TokenId::new([3; 32])
}

pub fn addr(id: u8) -> Address {
    Address::new([id; 32])
}

pub fn governance() -> Address {
    addr(99)
}

pub fn test_params() -> DexParams {
    DexParams::default().with_authority(governance())
}

pub fn fund(ledger: &mut InMemoryLedger) {
    for id in 1..=5 {
        for token in [token_a(), token_b(), token_c()] {
            ledger.mint(addr(id), token, FUNDING);
        }
        ledger.mint(addr(id), TokenId::native(), NATIVE_FUNDING);
    }
}

/// Engine at height 1 with funded traders
pub fn engine() -> TestEngine {
    engine_with(test_params())
}

pub fn engine_with(params: DexParams) -> TestEngine {
    let mut engine = DexEngine::in_memory(params).expect("valid params");
    fund(engine.ledger_mut());
    engine.begin_block(1, BLOCK_TIME).expect("first block");
    engine
}

/// Move `blocks` blocks forward at the standard block time
pub fn advance(engine: &mut TestEngine, blocks: BlockHeight) {
    let height = engine.height() + blocks;
    engine
        .begin_block(height, height * BLOCK_TIME)
        .expect("heights increase");
}

/// 1,000,000 A / 2,000,000 B created by trader 1
pub fn pool_ab(engine: &mut TestEngine) -> PoolId {
    engine
        .create_pool(addr(1), token_a(), token_b(), 1_000_000, 2_000_000)
        .expect("pool created")
}

/// 2,000,000 B / 1,000,000 C created by trader 2
pub fn pool_bc(engine: &mut TestEngine) -> PoolId {
    engine
        .create_pool(addr(2), token_b(), token_c(), 2_000_000, 1_000_000)
        .expect("pool created")
}

pub fn balance(engine: &TestEngine, account: u8, token: TokenId) -> u64 {
    engine.ledger().balance(&addr(account), &token)
}
