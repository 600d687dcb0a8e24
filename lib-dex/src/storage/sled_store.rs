//! Sled-based PoolStore Implementation
//!
//! All records share one tree so that a transaction's batch lands with a
//! single `apply_batch`, which sled applies atomically. Values are bincode.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, Tree};

use lib_types::{Address, BlockHeight, ChannelId, CommitmentHash, PoolId};

use super::{keys, PoolStore, StateBatch, WriteOp};
use crate::amm::commit_reveal::SwapCommitment;
use crate::errors::{StorageError, StorageResult};
use crate::pool::{LiquidityPosition, Pool};
use crate::security::{CircuitBreakerState, TwapBuffer};

// =============================================================================
// TREE NAMES (FIXED - DO NOT CHANGE)
// =============================================================================

const TREE_DEX_STATE: &str = "dex_state";

/// Sled-backed store
pub struct SledPoolStore {
    db: Db,
    state: Tree,
}

impl std::fmt::Debug for SledPoolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledPoolStore")
            .field("records", &self.state.len())
            .finish_non_exhaustive()
    }
}

impl SledPoolStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path).map_err(|e| StorageError::Database(e.to_string()))?;
        Self::from_db(db)
    }

    /// Open a temporary store (for testing)
    #[cfg(test)]
    pub fn open_temporary() -> StorageResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        let state = db
            .open_tree(TREE_DEX_STATE)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(Self { db, state })
    }

    fn serialize<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
        bincode::serialize(value).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
        bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn get_value<T: DeserializeOwned>(&self, key: &[u8]) -> StorageResult<Option<T>> {
        match self.state.get(key) {
            Ok(Some(bytes)) => Ok(Some(Self::deserialize(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Database(e.to_string())),
        }
    }

    fn scan_values<T: DeserializeOwned>(&self, prefix: &[u8]) -> StorageResult<Vec<T>> {
        let mut values = Vec::new();
        for entry in self.state.scan_prefix(prefix) {
            let (_, bytes) = entry.map_err(|e| StorageError::Database(e.to_string()))?;
            values.push(Self::deserialize(&bytes)?);
        }
        Ok(values)
    }

    fn encode_batch(batch: StateBatch) -> StorageResult<Batch> {
        let mut out = Batch::default();
        for op in batch.into_ops() {
            match op {
                WriteOp::PutPool(pool) => {
                    out.insert(&keys::pool_key(&pool.id)[..], Self::serialize(&pool)?);
                }
                WriteOp::PutPosition(position) => {
                    let key = keys::position_key(&position.pool_id, &position.provider);
                    out.insert(&key[..], Self::serialize(&position)?);
                }
                WriteOp::DeletePosition { pool_id, provider } => {
                    out.remove(&keys::position_key(&pool_id, &provider)[..]);
                }
                WriteOp::PutBreaker { pool_id, state } => {
                    out.insert(&keys::breaker_key(&pool_id)[..], Self::serialize(&state)?);
                }
                WriteOp::PutTwap { pool_id, buffer } => {
                    out.insert(&keys::twap_key(&pool_id)[..], Self::serialize(&buffer)?);
                }
                WriteOp::PutCommitment(commitment) => {
                    out.insert(
                        &keys::commitment_key(&commitment.hash)[..],
                        Self::serialize(&commitment)?,
                    );
                }
                WriteOp::DeleteCommitment(hash) => {
                    out.remove(&keys::commitment_key(&hash)[..]);
                }
                WriteOp::PutChannelNonce { channel, nonce } => {
                    out.insert(
                        &keys::channel_nonce_key(&channel)[..],
                        nonce.to_be_bytes().to_vec(),
                    );
                }
                WriteOp::PutPoolCreation { creator, height } => {
                    out.insert(
                        &keys::pool_creation_key(&creator)[..],
                        height.to_be_bytes().to_vec(),
                    );
                }
            }
        }
        Ok(out)
    }

    fn get_u64(&self, key: &[u8]) -> StorageResult<Option<u64>> {
        match self.state.get(key) {
            Ok(Some(bytes)) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    StorageError::CorruptKey(format!(
                        "expected 8-byte value under {}",
                        hex::encode(key)
                    ))
                })?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Database(e.to_string())),
        }
    }
}

impl PoolStore for SledPoolStore {
    fn get_pool(&self, pool_id: &PoolId) -> StorageResult<Option<Pool>> {
        self.get_value(&keys::pool_key(pool_id))
    }

    fn pool_ids(&self) -> StorageResult<Vec<PoolId>> {
        let mut ids = Vec::new();
        for entry in self.state.scan_prefix([keys::POOL_PREFIX]) {
            let (key, _) = entry.map_err(|e| StorageError::Database(e.to_string()))?;
            let id = keys::parse_pool_key(&key)
                .ok_or_else(|| StorageError::CorruptKey(hex::encode(&key)))?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn get_position(
        &self,
        pool_id: &PoolId,
        provider: &Address,
    ) -> StorageResult<Option<LiquidityPosition>> {
        self.get_value(&keys::position_key(pool_id, provider))
    }

    fn positions_for_pool(&self, pool_id: &PoolId) -> StorageResult<Vec<LiquidityPosition>> {
        self.scan_values(&keys::position_prefix(pool_id))
    }

    fn get_breaker(&self, pool_id: &PoolId) -> StorageResult<Option<CircuitBreakerState>> {
        self.get_value(&keys::breaker_key(pool_id))
    }

    fn get_twap(&self, pool_id: &PoolId) -> StorageResult<Option<TwapBuffer>> {
        self.get_value(&keys::twap_key(pool_id))
    }

    fn get_commitment(&self, hash: &CommitmentHash) -> StorageResult<Option<SwapCommitment>> {
        self.get_value(&keys::commitment_key(hash))
    }

    fn commitments(&self) -> StorageResult<Vec<SwapCommitment>> {
        self.scan_values(&[keys::COMMITMENT_PREFIX])
    }

    fn get_channel_nonce(&self, channel: &ChannelId) -> StorageResult<Option<u64>> {
        self.get_u64(&keys::channel_nonce_key(channel))
    }

    fn get_last_pool_creation(&self, creator: &Address) -> StorageResult<Option<BlockHeight>> {
        self.get_u64(&keys::pool_creation_key(creator))
    }

    fn apply(&mut self, batch: StateBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        let encoded = Self::encode_batch(batch)?;
        self.state
            .apply_batch(encoded)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        tracing::debug!("Applied DEX state batch with {} write(s)", ops);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.db
            .flush()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
