//! Bijective encoding of (block height, intra-block index) into one integer
//!
//! A transaction number is `block_height * 1_000_000 + index_in_block`.
//! The decomposition round-trips exactly for every valid pair; both halves
//! are range-checked so the product never loses precision in an i64.

use crate::constants::{
    MAX_BLOCK_HEIGHT, MAX_TRANSACTION_INDEX_IN_BLOCK, TRANSACTION_NUMBER_MULTIPLIER,
};
use crate::error::{Result, SidetreeError};
use crate::types::TransactionNumber;

/// Construct a transaction number from a block height and intra-block index.
///
/// Fails if the index exceeds 999,999 or the height exceeds 9,000,000,000.
pub fn construct(block_height: u64, index_in_block: u64) -> Result<TransactionNumber> {
    if index_in_block > MAX_TRANSACTION_INDEX_IN_BLOCK {
        return Err(SidetreeError::TransactionIndexTooLarge(index_in_block));
    }
    if block_height > MAX_BLOCK_HEIGHT {
        return Err(SidetreeError::BlockHeightTooLarge(block_height));
    }

    Ok(block_height as i64 * TRANSACTION_NUMBER_MULTIPLIER + index_in_block as i64)
}

/// The largest transaction number a block at the given height can contain.
pub fn last_transaction_of_block(block_height: u64) -> Result<TransactionNumber> {
    construct(block_height, MAX_TRANSACTION_INDEX_IN_BLOCK)
}

/// The block height a transaction number belongs to.
pub fn block_height(transaction_number: TransactionNumber) -> u64 {
    (transaction_number / TRANSACTION_NUMBER_MULTIPLIER) as u64
}
