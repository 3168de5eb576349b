//! Core data models for chain observation and value-time-lock management

use serde::{Deserialize, Serialize};

/// Transaction number: (block height, intra-block index) packed into one i64
pub type TransactionNumber = i64;

/// An output of a base-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinOutputModel {
    pub satoshis: u64,
    pub script_pubkey_hex: String,
}

/// An input of a base-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinInputModel {
    pub previous_transaction_id: String,
    pub output_index_in_previous_transaction: u64,
    pub script_sig_hex: String,
}

/// A base-chain transaction as observed on chain or decoded from block files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinTransactionModel {
    pub id: String,
    pub block_hash: String,
    /// Confirmation count; only meaningful when fetched over RPC.
    #[serde(default)]
    pub confirmations: u64,
    pub inputs: Vec<BitcoinInputModel>,
    pub outputs: Vec<BitcoinOutputModel>,
}

/// A base-chain block with its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinBlockModel {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub transactions: Vec<BitcoinTransactionModel>,
}

/// Summary of a block fetched without its transaction bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
}

/// Per-block bookkeeping before the normalized fee has been computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadataWithoutFee {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub transaction_count: u64,
    pub total_fee: u64,
}

/// Per-block bookkeeping persisted in the block metadata store.
///
/// Forms a singly-linked chain via `previous_hash`; stored metadata is
/// monotonically increasing by height with no gaps once confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub transaction_count: u64,
    pub total_fee: u64,
    pub normalized_fee: f64,
}

/// An anchored transaction record owned by the transaction store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionModel {
    pub transaction_number: TransactionNumber,
    /// Block height of the containing block.
    pub transaction_time: u64,
    /// Hash of the containing block.
    pub transaction_time_hash: String,
    pub anchor_string: String,
    pub transaction_fee_paid: u64,
    /// Joined in from block metadata at read time, not stored in the fast path.
    pub normalized_transaction_fee: Option<u64>,
    pub writer: String,
}

/// The anchoring payload extracted from a base-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredData {
    pub anchor_string: String,
    pub writer: String,
}

/// A verified on-chain time-locked output.
///
/// Created only by successful resolution against the base chain and never
/// mutated afterwards; callers re-resolve to refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTimeLockModel {
    /// Serialized lock identifier (transaction id + redeem script).
    pub identifier: String,
    /// Hex of the hash160 the lock script pays to.
    pub owner: String,
    pub amount_locked: u64,
    pub lock_transaction_time: u64,
    pub unlock_transaction_time: u64,
    pub normalized_fee: u64,
}

/// Kind of locally-saved lock intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavedLockType {
    Create,
    Relock,
    ReturnToWallet,
}

/// A locally persisted lock intent.
///
/// Must be durably saved before the corresponding transaction is broadcast;
/// a crash between save and broadcast triggers rebroadcast, not data loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedLockModel {
    pub lock_type: SavedLockType,
    pub transaction_id: String,
    pub redeem_script_as_hex: String,
    pub raw_transaction: String,
    pub desired_lock_amount_in_satoshis: u64,
    pub create_timestamp: i64,
}

/// A signed anchoring transaction built by the wallet collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinSignedTransaction {
    pub transaction_id: String,
    pub serialized_transaction: String,
    pub transaction_fee: u64,
}

/// A signed lock/relock/release transaction built by the wallet collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinLockTransaction {
    pub transaction_id: String,
    pub redeem_script_as_hex: String,
    pub serialized_transaction: String,
    pub transaction_fee: u64,
}

/// The (time, hash) pair exposed by the read API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainTimeModel {
    pub time: u64,
    pub hash: String,
}

/// One page of anchored transactions from the read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionsPage {
    pub more_transactions: bool,
    pub transactions: Vec<TransactionModel>,
}

/// Opaque versioned state held in the service state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStateModel {
    pub database_version: u32,
}
