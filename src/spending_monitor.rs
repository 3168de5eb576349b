//! Spending-rate limiter for this node's own anchoring writes
//!
//! Bounds how many satoshis this node spends on anchoring fees within a
//! trailing block window. Only transactions whose anchor strings this node
//! itself wrote count against the cap.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, SidetreeError};
use crate::store::TransactionStore;

/// Tracks and limits this node's anchoring spend rate.
pub struct SpendingMonitor {
    cutoff_period_in_blocks: u64,
    max_spend_per_period_in_satoshis: u64,
    transaction_store: Arc<dyn TransactionStore>,
    own_anchor_strings: RwLock<HashSet<String>>,
}

impl SpendingMonitor {
    /// Construct a monitor; the period and cutoff must both be positive.
    pub fn new(
        cutoff_period_in_blocks: u64,
        max_spend_per_period_in_satoshis: u64,
        transaction_store: Arc<dyn TransactionStore>,
    ) -> Result<Self> {
        if cutoff_period_in_blocks == 0 {
            return Err(SidetreeError::InvalidSpendingMonitorConfig(
                "cutoff period must be at least 1 block".to_string(),
            ));
        }
        if max_spend_per_period_in_satoshis == 0 {
            return Err(SidetreeError::InvalidSpendingMonitorConfig(
                "spending cutoff must be a positive satoshi amount".to_string(),
            ));
        }

        Ok(Self {
            cutoff_period_in_blocks,
            max_spend_per_period_in_satoshis,
            transaction_store,
            own_anchor_strings: RwLock::new(HashSet::new()),
        })
    }

    /// Record an anchor string this node is writing.
    pub fn add_anchor_string_being_written(&self, anchor_string: impl Into<String>) {
        self.own_anchor_strings.write().insert(anchor_string.into());
    }

    /// Whether spending `proposed_fee_in_satoshis` keeps this node within
    /// its per-period cap, given the last fully processed block height.
    ///
    /// A sum exactly equal to the cap passes; one satoshi over fails.
    pub async fn is_current_fee_within_spending_limit(
        &self,
        proposed_fee_in_satoshis: u64,
        last_processed_block_height: u64,
    ) -> Result<bool> {
        let window_start =
            last_processed_block_height.saturating_sub(self.cutoff_period_in_blocks);
        let transactions = self
            .transaction_store
            .get_transactions_in_range(window_start, last_processed_block_height + 1)
            .await?;

        let own_anchor_strings = self.own_anchor_strings.read();
        let spent_in_window: u64 = transactions
            .iter()
            .filter(|t| own_anchor_strings.contains(&t.anchor_string))
            .map(|t| t.transaction_fee_paid)
            .sum();

        let total = spent_in_window + proposed_fee_in_satoshis;
        debug!(
            spent_in_window,
            proposed_fee_in_satoshis, "checking spending limit"
        );
        Ok(total <= self.max_spend_per_period_in_satoshis)
    }
}
