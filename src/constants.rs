//! Protocol constants for anchoring-transaction observation

/// Multiplier combining a block height and an intra-block index into a
/// single transaction number
pub const TRANSACTION_NUMBER_MULTIPLIER: i64 = 1_000_000;

/// Maximum intra-block transaction index representable in a transaction number
pub const MAX_TRANSACTION_INDEX_IN_BLOCK: u64 = 999_999;

/// Maximum block height representable in a transaction number
pub const MAX_BLOCK_HEIGHT: u64 = 9_000_000_000;

/// Halving interval: 210,000 blocks
pub const HALVING_INTERVAL: u64 = 210_000;

/// Initial block subsidy: 50 BTC in satoshis
pub const INITIAL_SUBSIDY: u64 = 50 * 100_000_000;

/// Satoshis per BTC
pub const SATOSHIS_PER_BTC: u64 = 100_000_000;

/// Subsidy is exactly zero once this many halvings have occurred
pub const MAX_HALVINGS: u64 = 64;

/// Block window scanned per page when serving transaction reads
pub const TRANSACTION_PAGE_SIZE_IN_BLOCKS: u64 = 100;

/// Filename prefix of raw block-data files written by the base-chain node
pub const RAW_BLOCK_FILE_PREFIX: &str = "blk";

/// Per-record magic bytes in mainnet raw block-data files
pub const MAINNET_BLOCK_FILE_MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];

/// Per-record magic bytes in testnet raw block-data files
pub const TESTNET_BLOCK_FILE_MAGIC: [u8; 4] = [0x0b, 0x11, 0x09, 0x07];

/// Per-record magic bytes in regtest raw block-data files
pub const REGTEST_BLOCK_FILE_MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

/// Delimiter between the transaction id and redeem script inside a
/// serialized lock identifier
pub const LOCK_IDENTIFIER_DELIMITER: char = '.';

/// Schema version expected in the service state store
pub const DATABASE_VERSION: u32 = 1;
