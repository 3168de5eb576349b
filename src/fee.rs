//! Normalized ("proof-of-fee") per-block fee computation
//!
//! The normalized fee of a block is the average transaction fee over a
//! fixed look-back window of previous blocks, clamped so it never moves by
//! more than a configured fraction per block. The window is cached and slid
//! forward incrementally; any out-of-order or skipped height request, or a
//! cache left partial by a restart, forces a full O(W) reload from the
//! block metadata store rather than ever producing a wrong value.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, SidetreeError};
use crate::store::BlockMetadataStore;
use crate::types::{BlockMetadata, BlockMetadataWithoutFee};

/// Configuration of the normalized fee computation.
#[derive(Debug, Clone, Copy)]
pub struct FeeCalculatorConfig {
    /// First block height ever observed.
    pub genesis_block_height: u64,
    /// Fee assigned to every block in the priming window.
    pub initial_normalized_fee_in_satoshis: u64,
    /// Look-back window size W, in blocks.
    pub fee_look_back_window_in_blocks: u64,
    /// Maximum per-block fee fluctuation M, as a fraction of the previous fee.
    pub fee_max_fluctuation_multiplier_per_block: f64,
}

/// Sliding window of the most recent W blocks with fees.
#[derive(Debug, Default)]
struct FeeCache {
    blocks: VecDeque<BlockMetadata>,
    /// Height the next `add_normalized_fee_to_block` call is expected for.
    anchor_height: Option<u64>,
}

/// Incremental normalized fee calculator with an owned window cache.
pub struct NormalizedFeeCalculator {
    config: FeeCalculatorConfig,
    block_store: Arc<dyn BlockMetadataStore>,
    cache: Mutex<FeeCache>,
}

impl NormalizedFeeCalculator {
    pub fn new(config: FeeCalculatorConfig, block_store: Arc<dyn BlockMetadataStore>) -> Self {
        Self {
            config,
            block_store,
            cache: Mutex::new(FeeCache::default()),
        }
    }

    /// Compute and attach the normalized fee for the next block.
    ///
    /// Heights must arrive in increasing order for the cache to stay warm;
    /// a mismatching height or a partial cache triggers a window reload.
    pub async fn add_normalized_fee_to_block(
        &self,
        block: BlockMetadataWithoutFee,
    ) -> Result<BlockMetadata> {
        let window_size = self.config.fee_look_back_window_in_blocks;

        // Priming phase: the first W blocks all get the initial fee.
        if block.height < self.config.genesis_block_height + window_size {
            let with_fee = Self::with_fee(
                block,
                self.config.initial_normalized_fee_in_satoshis as f64,
            );
            self.push(with_fee.clone(), window_size);
            return Ok(with_fee);
        }

        let cached_window: Option<Vec<BlockMetadata>> = {
            let cache = self.cache.lock();
            let valid = cache.anchor_height == Some(block.height)
                && cache.blocks.len() as u64 == window_size;
            valid.then(|| cache.blocks.iter().cloned().collect())
        };

        let window = match cached_window {
            Some(blocks) => blocks,
            None => {
                debug!(height = block.height, "fee cache miss, reloading window");
                let blocks = self
                    .block_store
                    .get(block.height - window_size, block.height)
                    .await?;
                if blocks.len() as u64 != window_size {
                    return Err(SidetreeError::BlockMetadataMissing(block.height));
                }
                blocks
            }
        };

        let fee_sum: u64 = window.iter().map(|b| b.total_fee).sum();
        let count_sum: u64 = window.iter().map(|b| b.transaction_count).sum();
        let previous_fee = window
            .last()
            .map(|b| b.normalized_fee)
            .unwrap_or(self.config.initial_normalized_fee_in_satoshis as f64);

        let unadjusted = if count_sum == 0 {
            previous_fee
        } else {
            fee_sum as f64 / count_sum as f64
        };

        let fluctuation = self.config.fee_max_fluctuation_multiplier_per_block;
        let lower_bound = previous_fee * (1.0 - fluctuation);
        let upper_bound = previous_fee * (1.0 + fluctuation);
        let adjusted = unadjusted.max(lower_bound).min(upper_bound);

        let with_fee = Self::with_fee(block, adjusted);

        let mut cache = self.cache.lock();
        cache.blocks = window.into_iter().collect();
        cache.blocks.push_back(with_fee.clone());
        cache.blocks.pop_front();
        cache.anchor_height = Some(with_fee.height + 1);

        Ok(with_fee)
    }

    /// Normalized fee of the stored block at the given height, floored.
    pub async fn get_normalized_fee(&self, block_height: u64) -> Result<u64> {
        let blocks = self.block_store.get(block_height, block_height + 1).await?;
        let block = blocks
            .into_iter()
            .next()
            .ok_or(SidetreeError::BlockNotFound(block_height))?;
        Ok(Self::normalized_fee_of_block(&block))
    }

    /// Floored normalized fee of an already-loaded block.
    pub fn normalized_fee_of_block(block: &BlockMetadata) -> u64 {
        block.normalized_fee.floor() as u64
    }

    fn with_fee(block: BlockMetadataWithoutFee, normalized_fee: f64) -> BlockMetadata {
        BlockMetadata {
            height: block.height,
            hash: block.hash,
            previous_hash: block.previous_hash,
            transaction_count: block.transaction_count,
            total_fee: block.total_fee,
            normalized_fee,
        }
    }

    fn push(&self, block: BlockMetadata, window_size: u64) {
        let mut cache = self.cache.lock();
        cache.anchor_height = Some(block.height + 1);
        cache.blocks.push_back(block);
        while cache.blocks.len() as u64 > window_size {
            cache.blocks.pop_front();
        }
    }
}
