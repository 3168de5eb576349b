//! Persistent store contracts
//!
//! All four stores are abstract key-ordered persistence owned by the
//! embedding service. Records must support efficient range scans by
//! height/transaction time, and lock intents "most recent by creation
//! timestamp". In-memory implementations live in [`crate::mock`].

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    BlockMetadata, SavedLockModel, ServiceStateModel, TransactionModel, TransactionNumber,
};

/// Store of anchored transaction records, keyed by transaction number.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Append one anchored transaction. Re-adding an existing transaction
    /// number replaces the record (idempotent speculative indexing).
    async fn add_transaction(&self, transaction: TransactionModel) -> Result<()>;

    /// Transactions with `inclusive_begin_time <= transaction_time <
    /// exclusive_end_time`, ascending by transaction number.
    async fn get_transactions_in_range(
        &self,
        inclusive_begin_time: u64,
        exclusive_end_time: u64,
    ) -> Result<Vec<TransactionModel>>;

    /// Remove every transaction whose `transaction_time_hash` matches.
    async fn remove_transactions_by_block_hash(&self, block_hash: &str) -> Result<()>;

    /// Remove every transaction with a number greater than the given one;
    /// `None` removes all.
    async fn remove_transactions_later_than(
        &self,
        transaction_number: Option<TransactionNumber>,
    ) -> Result<()>;
}

/// Store of per-block metadata, keyed by height.
#[async_trait]
pub trait BlockMetadataStore: Send + Sync {
    /// Upsert a batch of block metadata.
    async fn add(&self, blocks: Vec<BlockMetadata>) -> Result<()>;

    /// Blocks with `inclusive_from <= height < exclusive_to`, ascending.
    async fn get(&self, inclusive_from: u64, exclusive_to: u64) -> Result<Vec<BlockMetadata>>;

    /// The stored block with the greatest height, if any.
    async fn get_last(&self) -> Result<Option<BlockMetadata>>;

    /// Remove every block with height greater than the given one; `None`
    /// removes all.
    async fn remove_later_than(&self, block_height: Option<u64>) -> Result<()>;

    /// Stored blocks at exponentially increasing distances back from the
    /// last block (offsets 0, 1, 3, 7, ...), descending by height.
    async fn look_back_exponentially(&self) -> Result<Vec<BlockMetadata>>;
}

/// Store of this node's own lock intents.
#[async_trait]
pub trait LockTransactionStore: Send + Sync {
    /// Append a lock intent. Must commit durably before the caller
    /// broadcasts the corresponding transaction.
    async fn add_lock(&self, lock: SavedLockModel) -> Result<()>;

    /// The most recently saved lock intent by creation timestamp, if any.
    async fn get_last_lock(&self) -> Result<Option<SavedLockModel>>;
}

/// Store of opaque versioned service state.
#[async_trait]
pub trait ServiceStateStore: Send + Sync {
    async fn put(&self, state: ServiceStateModel) -> Result<()>;

    async fn get(&self) -> Result<Option<ServiceStateModel>>;
}
