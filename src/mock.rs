//! In-memory collaborator implementations
//!
//! Deterministic, seedable stand-ins for the base-chain client, the four
//! persistent stores, the anchoring-payload parser, and the event sink.
//! Used throughout the crate's tests and useful for embedding services'
//! tests as well.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SidetreeError};
use crate::event::{EventSink, ServiceEvent};
use crate::parser::TransactionParser;
use crate::rpc::BitcoinClient;
use crate::store::{
    BlockMetadataStore, LockTransactionStore, ServiceStateStore, TransactionStore,
};
use crate::types::{
    AnchoredData, BitcoinBlockModel, BitcoinLockTransaction, BitcoinSignedTransaction,
    BitcoinTransactionModel, BlockInfo, BlockMetadata, SavedLockModel, ServiceStateModel,
    TransactionModel, TransactionNumber,
};

fn client_err(operation: &str, reason: &str) -> SidetreeError {
    SidetreeError::client(operation, reason)
}

#[derive(Default)]
struct MockChainState {
    hash_by_height: BTreeMap<u64, String>,
    blocks_by_hash: HashMap<String, BitcoinBlockModel>,
    transactions: HashMap<String, BitcoinTransactionModel>,
    fees: HashMap<String, u64>,
    balance: u64,
    broadcast: Vec<String>,
    queued_lock_transactions: VecDeque<BitcoinLockTransaction>,
    created_transaction_count: u64,
}

/// Seedable in-memory base-chain node and wallet.
#[derive(Default)]
pub struct MockBitcoinClient {
    state: RwLock<MockChainState>,
}

impl MockBitcoinClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block on the canonical chain (and its transactions).
    pub fn add_block(&self, block: BitcoinBlockModel) {
        let mut state = self.state.write();
        state.hash_by_height.insert(block.height, block.hash.clone());
        for transaction in &block.transactions {
            state
                .transactions
                .insert(transaction.id.clone(), transaction.clone());
        }
        state.blocks_by_hash.insert(block.hash.clone(), block);
    }

    /// Replace the canonical hash at a height without adding a block body.
    pub fn set_block_hash(&self, height: u64, hash: impl Into<String>) {
        self.state.write().hash_by_height.insert(height, hash.into());
    }

    /// Register an RPC-visible transaction outside any seeded block.
    pub fn add_transaction(&self, transaction: BitcoinTransactionModel) {
        self.state
            .write()
            .transactions
            .insert(transaction.id.clone(), transaction);
    }

    pub fn remove_transaction(&self, transaction_id: &str) {
        self.state.write().transactions.remove(transaction_id);
    }

    pub fn set_transaction_fee(&self, transaction_id: impl Into<String>, fee: u64) {
        self.state.write().fees.insert(transaction_id.into(), fee);
    }

    pub fn set_balance(&self, satoshis: u64) {
        self.state.write().balance = satoshis;
    }

    /// Queue an exact response for the next `create_*_transaction` call.
    pub fn queue_lock_transaction(&self, transaction: BitcoinLockTransaction) {
        self.state
            .write()
            .queued_lock_transactions
            .push_back(transaction);
    }

    /// Serialized transactions broadcast so far, in order.
    pub fn broadcast_log(&self) -> Vec<String> {
        self.state.read().broadcast.clone()
    }

    fn next_lock_transaction(&self, duration: u64) -> BitcoinLockTransaction {
        let mut state = self.state.write();
        if let Some(queued) = state.queued_lock_transactions.pop_front() {
            return queued;
        }
        state.created_transaction_count += 1;
        let n = state.created_transaction_count;
        BitcoinLockTransaction {
            transaction_id: format!("lock-tx-{n}"),
            redeem_script_as_hex: format!("{duration:06x}"),
            serialized_transaction: format!("raw-lock-tx-{n}"),
            transaction_fee: 300,
        }
    }
}

#[async_trait]
impl BitcoinClient for MockBitcoinClient {
    async fn get_current_block_height(&self) -> Result<u64> {
        self.state
            .read()
            .hash_by_height
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| client_err("get_current_block_height", "no blocks seeded"))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String> {
        self.state
            .read()
            .hash_by_height
            .get(&height)
            .cloned()
            .ok_or_else(|| client_err("get_block_hash", "height not on chain"))
    }

    async fn get_block_info(&self, hash: &str) -> Result<BlockInfo> {
        let state = self.state.read();
        state
            .blocks_by_hash
            .get(hash)
            .map(|block| BlockInfo {
                height: block.height,
                hash: block.hash.clone(),
                previous_hash: block.previous_hash.clone(),
            })
            .ok_or_else(|| client_err("get_block_info", "block not found"))
    }

    async fn get_block(&self, hash: &str) -> Result<BitcoinBlockModel> {
        self.state
            .read()
            .blocks_by_hash
            .get(hash)
            .cloned()
            .ok_or_else(|| client_err("get_block", "block not found"))
    }

    async fn get_raw_transaction(&self, transaction_id: &str) -> Result<BitcoinTransactionModel> {
        self.state
            .read()
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| client_err("get_raw_transaction", "transaction not found"))
    }

    async fn get_transaction_fee_in_satoshis(&self, transaction_id: &str) -> Result<u64> {
        Ok(self
            .state
            .read()
            .fees
            .get(transaction_id)
            .copied()
            .unwrap_or(0))
    }

    async fn get_balance_in_satoshis(&self) -> Result<u64> {
        Ok(self.state.read().balance)
    }

    async fn broadcast_transaction(&self, serialized_transaction: &str) -> Result<String> {
        let mut state = self.state.write();
        state.broadcast.push(serialized_transaction.to_string());
        Ok(format!("broadcast-{}", state.broadcast.len()))
    }

    async fn create_anchor_transaction(
        &self,
        anchor_data: &str,
        minimum_fee_in_satoshis: u64,
    ) -> Result<BitcoinSignedTransaction> {
        let mut state = self.state.write();
        state.created_transaction_count += 1;
        let n = state.created_transaction_count;
        Ok(BitcoinSignedTransaction {
            transaction_id: format!("anchor-tx-{n}"),
            serialized_transaction: format!("raw-anchor-{anchor_data}"),
            transaction_fee: minimum_fee_in_satoshis,
        })
    }

    async fn create_lock_transaction(
        &self,
        _lock_amount_in_satoshis: u64,
        lock_duration_in_blocks: u64,
    ) -> Result<BitcoinLockTransaction> {
        Ok(self.next_lock_transaction(lock_duration_in_blocks))
    }

    async fn create_relock_transaction(
        &self,
        _existing_lock_transaction_id: &str,
        _existing_lock_duration_in_blocks: u64,
        new_lock_duration_in_blocks: u64,
    ) -> Result<BitcoinLockTransaction> {
        Ok(self.next_lock_transaction(new_lock_duration_in_blocks))
    }

    async fn create_release_lock_transaction(
        &self,
        _existing_lock_transaction_id: &str,
        existing_lock_duration_in_blocks: u64,
    ) -> Result<BitcoinLockTransaction> {
        Ok(self.next_lock_transaction(existing_lock_duration_in_blocks))
    }
}

/// In-memory transaction store ordered by transaction number.
#[derive(Default)]
pub struct MockTransactionStore {
    transactions: RwLock<BTreeMap<TransactionNumber, TransactionModel>>,
}

impl MockTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<TransactionModel> {
        self.transactions.read().values().cloned().collect()
    }
}

#[async_trait]
impl TransactionStore for MockTransactionStore {
    async fn add_transaction(&self, transaction: TransactionModel) -> Result<()> {
        self.transactions
            .write()
            .insert(transaction.transaction_number, transaction);
        Ok(())
    }

    async fn get_transactions_in_range(
        &self,
        inclusive_begin_time: u64,
        exclusive_end_time: u64,
    ) -> Result<Vec<TransactionModel>> {
        Ok(self
            .transactions
            .read()
            .values()
            .filter(|t| {
                t.transaction_time >= inclusive_begin_time
                    && t.transaction_time < exclusive_end_time
            })
            .cloned()
            .collect())
    }

    async fn remove_transactions_by_block_hash(&self, block_hash: &str) -> Result<()> {
        self.transactions
            .write()
            .retain(|_, t| t.transaction_time_hash != block_hash);
        Ok(())
    }

    async fn remove_transactions_later_than(
        &self,
        transaction_number: Option<TransactionNumber>,
    ) -> Result<()> {
        match transaction_number {
            Some(number) => self
                .transactions
                .write()
                .retain(|&n, _| n <= number),
            None => self.transactions.write().clear(),
        }
        Ok(())
    }
}

/// In-memory block metadata store ordered by height.
#[derive(Default)]
pub struct MockBlockMetadataStore {
    blocks: RwLock<BTreeMap<u64, BlockMetadata>>,
}

impl MockBlockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<BlockMetadata> {
        self.blocks.read().values().cloned().collect()
    }
}

#[async_trait]
impl BlockMetadataStore for MockBlockMetadataStore {
    async fn add(&self, blocks: Vec<BlockMetadata>) -> Result<()> {
        let mut stored = self.blocks.write();
        for block in blocks {
            stored.insert(block.height, block);
        }
        Ok(())
    }

    async fn get(&self, inclusive_from: u64, exclusive_to: u64) -> Result<Vec<BlockMetadata>> {
        Ok(self
            .blocks
            .read()
            .range(inclusive_from..exclusive_to)
            .map(|(_, block)| block.clone())
            .collect())
    }

    async fn get_last(&self) -> Result<Option<BlockMetadata>> {
        Ok(self
            .blocks
            .read()
            .values()
            .next_back()
            .cloned())
    }

    async fn remove_later_than(&self, block_height: Option<u64>) -> Result<()> {
        match block_height {
            Some(height) => self.blocks.write().retain(|&h, _| h <= height),
            None => self.blocks.write().clear(),
        }
        Ok(())
    }

    async fn look_back_exponentially(&self) -> Result<Vec<BlockMetadata>> {
        let blocks = self.blocks.read();
        let Some((&last_height, _)) = blocks.iter().next_back() else {
            return Ok(Vec::new());
        };
        let first_height = *blocks.keys().next().expect("non-empty map has a first key");

        let mut result = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let Some(height) = last_height.checked_sub(offset) else {
                break;
            };
            if height < first_height {
                break;
            }
            if let Some(block) = blocks.get(&height) {
                result.push(block.clone());
            }
            offset = offset * 2 + 1;
        }
        Ok(result)
    }
}

/// In-memory lock intent store.
#[derive(Default)]
pub struct MockLockTransactionStore {
    locks: RwLock<Vec<SavedLockModel>>,
}

impl MockLockTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<SavedLockModel> {
        self.locks.read().clone()
    }
}

#[async_trait]
impl LockTransactionStore for MockLockTransactionStore {
    async fn add_lock(&self, lock: SavedLockModel) -> Result<()> {
        self.locks.write().push(lock);
        Ok(())
    }

    async fn get_last_lock(&self) -> Result<Option<SavedLockModel>> {
        Ok(self.locks.read().last().cloned())
    }
}

/// In-memory service state store.
#[derive(Default)]
pub struct MockServiceStateStore {
    state: RwLock<Option<ServiceStateModel>>,
}

impl MockServiceStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceStateStore for MockServiceStateStore {
    async fn put(&self, state: ServiceStateModel) -> Result<()> {
        *self.state.write() = Some(state);
        Ok(())
    }

    async fn get(&self) -> Result<Option<ServiceStateModel>> {
        Ok(*self.state.read())
    }
}

/// Parser stub mapping transaction ids to anchoring payloads.
#[derive(Default)]
pub struct MockTransactionParser {
    anchors: RwLock<HashMap<String, AnchoredData>>,
    failures: RwLock<HashSet<String>>,
}

impl MockTransactionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a transaction id as an anchoring transaction.
    pub fn set_anchor(
        &self,
        transaction_id: impl Into<String>,
        anchor_string: impl Into<String>,
        writer: impl Into<String>,
    ) {
        self.anchors.write().insert(
            transaction_id.into(),
            AnchoredData {
                anchor_string: anchor_string.into(),
                writer: writer.into(),
            },
        );
    }

    /// Make parsing the given transaction id fail.
    pub fn fail_on(&self, transaction_id: impl Into<String>) {
        self.failures.write().insert(transaction_id.into());
    }
}

impl TransactionParser for MockTransactionParser {
    fn parse(&self, transaction: &BitcoinTransactionModel) -> Result<Option<AnchoredData>> {
        if self.failures.read().contains(&transaction.id) {
            return Err(SidetreeError::TransactionParse {
                transaction_id: transaction.id.clone(),
                reason: "injected parse failure".to_string(),
            });
        }
        Ok(self.anchors.read().get(&transaction.id).cloned())
    }
}

/// Event sink that records everything it receives.
#[derive(Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<ServiceEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: ServiceEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(height: u64) -> BlockMetadata {
        BlockMetadata {
            height,
            hash: format!("hash{height}"),
            previous_hash: format!("hash{}", height.wrapping_sub(1)),
            transaction_count: 1,
            total_fee: 0,
            normalized_fee: 1.0,
        }
    }

    #[tokio::test]
    async fn test_look_back_exponentially_spacing() {
        let store = MockBlockMetadataStore::new();
        store
            .add((0..=100).map(metadata).collect())
            .await
            .unwrap();

        let spaced = store.look_back_exponentially().await.unwrap();
        let heights: Vec<u64> = spaced.iter().map(|b| b.height).collect();
        // Offsets 0, 1, 3, 7, 15, 31, 63 back from height 100.
        assert_eq!(heights, [100, 99, 97, 93, 85, 69, 37]);
    }

    #[tokio::test]
    async fn test_remove_transactions_later_than() {
        let store = MockTransactionStore::new();
        for number in [1_000_000i64, 2_000_000, 2_000_001, 3_000_000] {
            store
                .add_transaction(TransactionModel {
                    transaction_number: number,
                    transaction_time: (number / 1_000_000) as u64,
                    transaction_time_hash: "h".into(),
                    anchor_string: "a".into(),
                    transaction_fee_paid: 0,
                    normalized_transaction_fee: None,
                    writer: "w".into(),
                })
                .await
                .unwrap();
        }

        store
            .remove_transactions_later_than(Some(2_000_000))
            .await
            .unwrap();
        let numbers: Vec<i64> = store.all().iter().map(|t| t.transaction_number).collect();
        assert_eq!(numbers, [1_000_000, 2_000_000]);

        store.remove_transactions_later_than(None).await.unwrap();
        assert!(store.all().is_empty());
    }
}
