//! Base-chain RPC client contract
//!
//! The observer and lock subsystems consume an existing node over RPC; the
//! concrete client (HTTP transport, auth, retry-with-timeout policy for
//! transient 5xx/timeout failures) lives outside this crate and implements
//! this trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    BitcoinBlockModel, BitcoinLockTransaction, BitcoinSignedTransaction, BitcoinTransactionModel,
    BlockInfo,
};

/// Operations this crate requires from the base-chain node and its wallet.
#[async_trait]
pub trait BitcoinClient: Send + Sync {
    /// Height of the current chain tip.
    async fn get_current_block_height(&self) -> Result<u64>;

    /// Hash of the block at the given height on the canonical chain.
    async fn get_block_hash(&self, height: u64) -> Result<String>;

    /// Block summary (height, hash, previous hash) for the given hash.
    async fn get_block_info(&self, hash: &str) -> Result<BlockInfo>;

    /// Full block with transactions for the given hash.
    async fn get_block(&self, hash: &str) -> Result<BitcoinBlockModel>;

    /// A transaction by id; fails if it is neither mined nor broadcast.
    async fn get_raw_transaction(&self, transaction_id: &str) -> Result<BitcoinTransactionModel>;

    /// Fee paid by the given transaction, in satoshis.
    async fn get_transaction_fee_in_satoshis(&self, transaction_id: &str) -> Result<u64>;

    /// Spendable wallet balance, in satoshis.
    async fn get_balance_in_satoshis(&self) -> Result<u64>;

    /// Broadcast a serialized transaction; returns its id.
    async fn broadcast_transaction(&self, serialized_transaction: &str) -> Result<String>;

    /// Build and sign an anchoring transaction carrying the given data.
    async fn create_anchor_transaction(
        &self,
        anchor_data: &str,
        minimum_fee_in_satoshis: u64,
    ) -> Result<BitcoinSignedTransaction>;

    /// Build and sign a transaction locking the given amount for the given duration.
    async fn create_lock_transaction(
        &self,
        lock_amount_in_satoshis: u64,
        lock_duration_in_blocks: u64,
    ) -> Result<BitcoinLockTransaction>;

    /// Build and sign a transaction spending an existing lock into a new one.
    async fn create_relock_transaction(
        &self,
        existing_lock_transaction_id: &str,
        existing_lock_duration_in_blocks: u64,
        new_lock_duration_in_blocks: u64,
    ) -> Result<BitcoinLockTransaction>;

    /// Build and sign a transaction returning an existing lock to the wallet.
    async fn create_release_lock_transaction(
        &self,
        existing_lock_transaction_id: &str,
        existing_lock_duration_in_blocks: u64,
    ) -> Result<BitcoinLockTransaction>;
}
