//! Error types for chain observation and lock management

use std::path::PathBuf;

use thiserror::Error;

/// Result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, SidetreeError>;

/// Errors surfaced by the observer, fee calculator, and lock subsystems.
///
/// Callers branch on variant identity, never on message text. Client-input
/// conditions, not-found conditions, transient/pending conditions, and
/// fatal data-integrity conditions are all distinct variants.
#[derive(Error, Debug)]
pub enum SidetreeError {
    // --- client-input errors ---
    /// `since` and `transaction_time_hash` must be given together or not at all.
    #[error("since and transaction time hash must both be provided or both omitted")]
    SinceAndTimeHashBothRequired,

    /// The (transaction number, block hash) pair does not match the live chain.
    #[error("transaction number {since} with time hash {hash} does not match the chain")]
    InvalidTransactionNumberOrTimeHash { since: i64, hash: String },

    /// Normalized fee requested for a height below the genesis of observation.
    #[error("block height {height} is below the observed genesis {genesis}")]
    BlockHeightOutOfRange { height: u64, genesis: u64 },

    /// Intra-block index too large to encode in a transaction number.
    #[error("transaction index {0} exceeds the maximum encodable index")]
    TransactionIndexTooLarge(u64),

    /// Block height too large to encode in a transaction number.
    #[error("block height {0} exceeds the maximum encodable height")]
    BlockHeightTooLarge(u64),

    // --- not-found errors ---
    /// No block metadata stored at the requested height.
    #[error("block not found at height {0}")]
    BlockNotFound(u64),

    /// No value time lock exists for this node.
    #[error("no active value time lock for this node")]
    ValueTimeLockNotFound,

    // --- pending/transient conditions ---
    /// A lock transaction exists but is not yet usable; callers may poll.
    #[error("value time lock is in a pending state")]
    ValueTimeLockInPendingState,

    /// The referenced lock transaction has no confirmations yet.
    #[error("lock transaction {0} is not yet confirmed")]
    LockTransactionNotConfirmed(String),

    // --- lock identifier / resolver errors ---
    /// A serialized lock identifier did not decode into exactly two parts.
    #[error("malformed lock identifier: {0}")]
    LockIdentifierFormat(String),

    /// The referenced lock transaction could not be fetched from the chain.
    #[error("lock transaction {0} not found on chain")]
    LockTransactionNotFound(String),

    /// The redeem script is not a well-formed time-lock script.
    #[error("redeem script is not a lock script: {0}")]
    RedeemScriptNotLock(String),

    /// The transaction output does not pay to the reconstructed script hash.
    #[error("lock transaction {0} does not pay to the expected script")]
    LockTransactionNotPayingToScript(String),

    /// The lock duration does not match the protocol version at its height.
    #[error("lock duration {actual} does not match required duration {expected}")]
    LockDurationInvalid { expected: u64, actual: u64 },

    // --- insufficient-funds conditions ---
    /// Wallet balance cannot cover the first lock plus transaction fees.
    #[error("not enough balance for first lock: need {required}, have {available}")]
    NotEnoughBalanceForFirstLock { required: u64, available: u64 },

    /// Locked amount cannot cover the relock fee plus the desired amount.
    #[error("not enough balance for relock: need {required}, have {available}")]
    NotEnoughBalanceForRelock { required: u64, available: u64 },

    /// Wallet balance cannot cover an anchoring write.
    #[error("not enough balance for anchoring write: need {required}, have {available}")]
    NotEnoughBalanceForWrite { required: u64, available: u64 },

    /// The anchoring write would exceed the configured spending cap.
    #[error("spending cap per period reached")]
    SpendingCapPerPeriodReached,

    // --- fatal/data-integrity errors ---
    /// Sequential processing found a block whose previous hash broke the chain.
    #[error("previous hash mismatch at height {height}: expected {expected}, got {actual}")]
    BlockPreviousHashMismatch {
        height: u64,
        expected: String,
        actual: String,
    },

    /// A transaction references a block with no stored metadata.
    #[error("missing block metadata at height {0}")]
    BlockMetadataMissing(u64),

    /// No protocol version covers the given block height.
    #[error("no protocol version found for block height {0}")]
    VersionNotFound(u64),

    /// The persisted database schema is newer than this service supports.
    #[error("database downgrade attempted: stored version {stored}, code version {current}")]
    DatabaseDowngradeAttempted { stored: u32, current: u32 },

    /// Spending monitor configured with a non-positive period or cutoff.
    #[error("invalid spending monitor configuration: {0}")]
    InvalidSpendingMonitorConfig(String),

    // --- raw block file errors ---
    /// A block-data directory or file could not be read.
    #[error("failed to read block data at {path}: {source}")]
    BlockFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A block record did not start with the expected magic bytes.
    #[error("bad magic bytes in block file at offset {0}")]
    BlockFileBadMagic(usize),

    /// A block record declared a length that exceeds the remaining file.
    #[error("corrupt block record length at offset {0}")]
    BlockFileCorruptLength(usize),

    /// A block record payload failed to decode.
    #[error("corrupt block record payload at offset {offset}: {reason}")]
    BlockFileCorruptPayload { offset: usize, reason: String },

    // --- wrapped collaborator errors ---
    /// A base-chain RPC call failed.
    #[error("bitcoin client error during {operation}: {reason}")]
    BitcoinClient { operation: String, reason: String },

    /// A persistent store operation failed.
    #[error("store error during {operation}: {reason}")]
    Store { operation: String, reason: String },

    /// The anchoring-payload parser failed on a transaction.
    #[error("transaction parse error for {transaction_id}: {reason}")]
    TransactionParse {
        transaction_id: String,
        reason: String,
    },
}

impl SidetreeError {
    /// Wrap a base-chain RPC failure with the operation it occurred in.
    pub fn client(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BitcoinClient {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a store failure with the operation it occurred in.
    pub fn store(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}
