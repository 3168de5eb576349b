//! Anchoring-payload parser contract

use crate::error::Result;
use crate::types::{AnchoredData, BitcoinTransactionModel};

/// Recognizes anchoring payloads inside base-chain transactions.
///
/// Returns `Ok(None)` for transactions that are not anchoring transactions.
/// A parse error aborts processing of the containing block, since a
/// partially indexed block is unsafe to resume from.
pub trait TransactionParser: Send + Sync {
    fn parse(&self, transaction: &BitcoinTransactionModel) -> Result<Option<AnchoredData>>;
}
