//! Fork-aware chain observation and transaction indexing
//!
//! The processor walks the base chain from a derived starting point,
//! extracts anchoring transactions, and persists them together with
//! per-block metadata and normalized fees. Every pass re-derives its
//! starting point from durable state and the live chain: a fork under the
//! previously processed tip is detected by hash comparison and resolved by
//! reverting local history back to the newest block that still verifies.
//!
//! Two sync paths share the same extraction and persistence code: an
//! incremental RPC walk used on every pass, and a bulk fast-sync over raw
//! block-data files used at startup when file access is configured.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::constants::{
    DATABASE_VERSION, HALVING_INTERVAL, INITIAL_SUBSIDY, MAX_HALVINGS, RAW_BLOCK_FILE_PREFIX,
    TRANSACTION_PAGE_SIZE_IN_BLOCKS,
};
use crate::error::{Result, SidetreeError};
use crate::event::{EventSink, ServiceEvent};
use crate::fee::NormalizedFeeCalculator;
use crate::parser::TransactionParser;
use crate::raw_block::BlockFileIterator;
use crate::rpc::BitcoinClient;
use crate::spending_monitor::SpendingMonitor;
use crate::store::{BlockMetadataStore, ServiceStateStore, TransactionStore};
use crate::transaction_number;
use crate::types::{
    BitcoinBlockModel, BlockInfo, BlockMetadataWithoutFee, BlockchainTimeModel, ServiceStateModel,
    TransactionModel, TransactionNumber, TransactionsPage,
};

/// Block subsidy at the given height: halves every 210,000 blocks and is
/// exactly zero once 64 halvings have occurred.
pub fn block_reward_in_satoshis(block_height: u64) -> u64 {
    let halvings = block_height / HALVING_INTERVAL;
    if halvings >= MAX_HALVINGS {
        return 0;
    }
    INITIAL_SUBSIDY >> halvings
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// First block height this node observes; nothing below it is indexed.
    pub genesis_block_height: u64,
    /// Directory of the node's raw block-data files, when the node runs
    /// close enough for direct file access. Enables fast-sync at startup.
    pub block_data_directory: Option<PathBuf>,
    /// Per-record magic bytes of the configured network's block files.
    pub block_file_magic: [u8; 4],
}

/// The chain observer and anchored-transaction read/write service.
pub struct BitcoinProcessor {
    config: ProcessorConfig,
    client: Arc<dyn BitcoinClient>,
    transaction_store: Arc<dyn TransactionStore>,
    block_store: Arc<dyn BlockMetadataStore>,
    state_store: Arc<dyn ServiceStateStore>,
    parser: Arc<dyn TransactionParser>,
    fee_calculator: Arc<NormalizedFeeCalculator>,
    spending_monitor: Arc<SpendingMonitor>,
    event_sink: Arc<dyn EventSink>,
    /// Last block fully processed and persisted. Guards are never held
    /// across awaits; the value is cloned out.
    last_processed_block: RwLock<Option<BlockInfo>>,
}

impl BitcoinProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProcessorConfig,
        client: Arc<dyn BitcoinClient>,
        transaction_store: Arc<dyn TransactionStore>,
        block_store: Arc<dyn BlockMetadataStore>,
        state_store: Arc<dyn ServiceStateStore>,
        parser: Arc<dyn TransactionParser>,
        fee_calculator: Arc<NormalizedFeeCalculator>,
        spending_monitor: Arc<SpendingMonitor>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            client,
            transaction_store,
            block_store,
            state_store,
            parser,
            fee_calculator,
            spending_monitor,
            event_sink,
            last_processed_block: RwLock::new(None),
        }
    }

    /// One-time startup: migrate the database if needed, restore the last
    /// processed marker, and bulk catch up from block files when configured.
    pub async fn initialize(&self) -> Result<()> {
        self.upgrade_database_if_needed().await?;

        let last = self.block_store.get_last().await?;
        *self.last_processed_block.write() = last.map(|block| BlockInfo {
            height: block.height,
            hash: block.hash,
            previous_hash: block.previous_hash,
        });

        if let Some(directory) = self.config.block_data_directory.clone() {
            if let Some(starting_height) = self.determine_starting_block().await? {
                let tip_height = self.client.get_current_block_height().await?;
                let tip_hash = self.client.get_block_hash(tip_height).await?;
                self.fast_sync(&directory, starting_height, tip_height, tip_hash)
                    .await?;
            }
        }

        Ok(())
    }

    async fn upgrade_database_if_needed(&self) -> Result<()> {
        let stored_version = self
            .state_store
            .get()
            .await?
            .map(|state| state.database_version)
            .unwrap_or(0);

        if stored_version > DATABASE_VERSION {
            return Err(SidetreeError::DatabaseDowngradeAttempted {
                stored: stored_version,
                current: DATABASE_VERSION,
            });
        }
        if stored_version < DATABASE_VERSION {
            info!(
                from = stored_version,
                to = DATABASE_VERSION,
                "upgrading database, all observed data will be resynced"
            );
            self.trim_databases_to(None).await?;
            self.state_store
                .put(ServiceStateModel {
                    database_version: DATABASE_VERSION,
                })
                .await?;
        }
        Ok(())
    }

    /// One observation pass: derive the starting point and walk the chain
    /// up to the current tip over RPC.
    pub async fn process_transactions(&self) -> Result<()> {
        let Some(starting_height) = self.determine_starting_block().await? else {
            debug!("no blocks to process");
            return Ok(());
        };
        let tip_height = self.client.get_current_block_height().await?;

        let mut expected_previous_hash: Option<String> = self
            .last_processed_block
            .read()
            .as_ref()
            .map(|block| block.hash.clone());

        for height in starting_height..=tip_height {
            let hash = self.client.get_block_hash(height).await?;
            let block = self.client.get_block(&hash).await?;

            // Starting-point determination guarantees linkage; a mismatch
            // here means the chain moved mid-pass or local state is corrupt.
            if let Some(expected) = &expected_previous_hash {
                if block.previous_hash != *expected {
                    return Err(SidetreeError::BlockPreviousHashMismatch {
                        height,
                        expected: expected.clone(),
                        actual: block.previous_hash.clone(),
                    });
                }
            }

            self.process_block(&block).await?;
            expected_previous_hash = Some(block.hash);
        }

        Ok(())
    }

    /// Decide where processing should resume, reverting local history if
    /// the previously processed tip no longer verifies against the chain.
    /// Returns `None` when there is nothing to process.
    async fn determine_starting_block(&self) -> Result<Option<u64>> {
        let last = self.last_processed_block.read().clone();

        let starting_height = match last {
            None => {
                // Never fully processed a block: clear any partial writes.
                self.trim_databases_to(None).await?;
                self.config.genesis_block_height
            }
            Some(last) => {
                if self.verify_block(last.height, &last.hash).await? {
                    // Still guards partial writes past the verified marker.
                    self.trim_databases_to(Some(last.height)).await?;
                    last.height + 1
                } else {
                    info!(height = last.height, "fork detected, reverting");
                    match self.revert_databases().await? {
                        Some(valid) => {
                            let resume = valid.height + 1;
                            *self.last_processed_block.write() = Some(valid);
                            resume
                        }
                        None => {
                            *self.last_processed_block.write() = None;
                            self.config.genesis_block_height
                        }
                    }
                }
            }
        };

        let tip_height = self.client.get_current_block_height().await?;
        if starting_height > tip_height {
            return Ok(None);
        }
        Ok(Some(starting_height))
    }

    /// Whether the (height, hash) pair is on the live canonical chain.
    async fn verify_block(&self, height: u64, hash: &str) -> Result<bool> {
        let tip_height = self.client.get_current_block_height().await?;
        if height > tip_height {
            return Ok(false);
        }
        let chain_hash = self.client.get_block_hash(height).await?;
        Ok(chain_hash == hash)
    }

    /// Search backward at exponentially increasing distances for the newest
    /// stored block that still verifies, then trim everything past it.
    async fn revert_databases(&self) -> Result<Option<BlockInfo>> {
        let candidates = self.block_store.look_back_exponentially().await?;

        for candidate in candidates {
            if self.verify_block(candidate.height, &candidate.hash).await? {
                info!(height = candidate.height, "reverting to last valid block");
                self.trim_databases_to(Some(candidate.height)).await?;
                return Ok(Some(BlockInfo {
                    height: candidate.height,
                    hash: candidate.hash,
                    previous_hash: candidate.previous_hash,
                }));
            }
        }

        warn!("no stored block verifies against the chain, resyncing fully");
        self.trim_databases_to(None).await?;
        Ok(None)
    }

    /// Remove all observed data strictly past the given height; `None`
    /// removes everything.
    async fn trim_databases_to(&self, block_height: Option<u64>) -> Result<()> {
        self.block_store.remove_later_than(block_height).await?;
        let last_transaction_number: Option<TransactionNumber> = match block_height {
            Some(height) => Some(transaction_number::last_transaction_of_block(height)?),
            None => None,
        };
        self.transaction_store
            .remove_transactions_later_than(last_transaction_number)
            .await
    }

    /// Extract, persist, and account one block, then advance the marker.
    async fn process_block(&self, block: &BitcoinBlockModel) -> Result<()> {
        debug!(height = block.height, "processing block");

        for transaction in self.extract_transactions(block).await? {
            self.transaction_store.add_transaction(transaction).await?;
        }

        let without_fee = Self::block_metadata_without_fee(block);
        let with_fee = self
            .fee_calculator
            .add_normalized_fee_to_block(without_fee)
            .await?;
        self.block_store.add(vec![with_fee]).await?;

        *self.last_processed_block.write() = Some(BlockInfo {
            height: block.height,
            hash: block.hash.clone(),
            previous_hash: block.previous_hash.clone(),
        });
        Ok(())
    }

    /// Anchoring transactions of one block, keyed by transaction number.
    ///
    /// A parse or fee-lookup error aborts the whole block: partial indexing
    /// of a block is unsafe to resume from.
    async fn extract_transactions(
        &self,
        block: &BitcoinBlockModel,
    ) -> Result<Vec<TransactionModel>> {
        let mut extracted = Vec::new();
        for (index, transaction) in block.transactions.iter().enumerate() {
            let Some(anchored) = self.parser.parse(transaction)? else {
                continue;
            };
            let fee_paid = self
                .client
                .get_transaction_fee_in_satoshis(&transaction.id)
                .await?;
            extracted.push(TransactionModel {
                transaction_number: transaction_number::construct(block.height, index as u64)?,
                transaction_time: block.height,
                transaction_time_hash: block.hash.clone(),
                anchor_string: anchored.anchor_string,
                transaction_fee_paid: fee_paid,
                normalized_transaction_fee: None,
                writer: anchored.writer,
            });
        }
        Ok(extracted)
    }

    fn block_metadata_without_fee(block: &BitcoinBlockModel) -> BlockMetadataWithoutFee {
        // Total fee collected by the miner: coinbase outputs minus subsidy.
        let coinbase_value: u64 = block
            .transactions
            .first()
            .map(|coinbase| coinbase.outputs.iter().map(|o| o.satoshis).sum())
            .unwrap_or(0);
        let total_fee = coinbase_value.saturating_sub(block_reward_in_satoshis(block.height));

        BlockMetadataWithoutFee {
            height: block.height,
            hash: block.hash.clone(),
            previous_hash: block.previous_hash.clone(),
            transaction_count: block.transactions.len() as u64,
            total_fee,
        }
    }

    /// Bulk catch-up over raw block-data files, newest file first.
    ///
    /// Blocks are speculatively indexed as they are read, then promoted to
    /// validated only once linked from the chain tip via previous-hash
    /// walks. Whatever never links is provably off-chain: its transactions
    /// are deleted by block hash. Validated blocks are finally re-indexed
    /// and their metadata written in ascending height order, so speculative
    /// writes clobbered by a same-height fork block are repaired.
    async fn fast_sync(
        &self,
        directory: &std::path::Path,
        starting_height: u64,
        tip_height: u64,
        tip_hash: String,
    ) -> Result<()> {
        info!(starting_height, tip_height, "fast sync from block files");
        let mut iterator = BlockFileIterator::from_directory(
            directory,
            RAW_BLOCK_FILE_PREFIX,
            self.config.block_file_magic,
        )?;

        let mut not_yet_validated: HashMap<String, BitcoinBlockModel> = HashMap::new();
        // Reverse height order, built by walking previous-hash links.
        let mut validated: Vec<BitcoinBlockModel> = Vec::new();
        let mut next_expected_hash = tip_hash;

        loop {
            let earliest_validated_height = validated
                .last()
                .map(|block| block.height)
                .unwrap_or(tip_height + 1);
            if earliest_validated_height <= starting_height {
                break;
            }
            let Some(batch) = iterator.previous()? else {
                break;
            };

            for block in batch {
                if block.height < starting_height || block.height >= earliest_validated_height {
                    continue;
                }
                // Speculative: may belong to an orphaned branch.
                for transaction in self.extract_transactions(&block).await? {
                    self.transaction_store.add_transaction(transaction).await?;
                }
                not_yet_validated.insert(block.hash.clone(), block);
            }

            // Promote every block reachable from the tip by linkage.
            while let Some(block) = not_yet_validated.remove(&next_expected_hash) {
                next_expected_hash = block.previous_hash.clone();
                let reached_start = block.height == starting_height;
                validated.push(block);
                if reached_start {
                    break;
                }
            }
        }

        let covered = validated
            .last()
            .is_some_and(|block| block.height == starting_height);
        if !covered {
            // Writing a partial suffix would leave a height gap in the
            // metadata store. Undo the speculative writes and leave the
            // catch-up to the incremental pass instead.
            warn!(
                starting_height,
                "block files do not link back to the starting height, skipping fast sync"
            );
            let marker_height = self
                .last_processed_block
                .read()
                .as_ref()
                .map(|block| block.height);
            return self.trim_databases_to(marker_height).await;
        }

        // Everything left unlinked was never on the canonical chain.
        for orphan in not_yet_validated.values() {
            debug!(hash = %orphan.hash, "removing transactions of orphaned block");
            self.transaction_store
                .remove_transactions_by_block_hash(&orphan.hash)
                .await?;
        }

        validated.reverse();
        for block in &validated {
            self.process_block(block).await?;
        }

        Ok(())
    }

    /// The (time, hash) pair of a given block, or of the last processed one.
    pub async fn time(&self, hash: Option<&str>) -> Result<BlockchainTimeModel> {
        if let Some(hash) = hash {
            let info = self.client.get_block_info(hash).await?;
            return Ok(BlockchainTimeModel {
                time: info.height,
                hash: info.hash,
            });
        }

        if let Some(last) = self.last_processed_block.read().clone() {
            return Ok(BlockchainTimeModel {
                time: last.height,
                hash: last.hash,
            });
        }

        let tip_height = self.client.get_current_block_height().await?;
        let tip_hash = self.client.get_block_hash(tip_height).await?;
        Ok(BlockchainTimeModel {
            time: tip_height,
            hash: tip_hash,
        })
    }

    /// Paginated anchored-transaction reads, exclusive of `since`.
    ///
    /// `since` and `hash` must be given together; the pair is verified
    /// against the live chain so a caller on a stale fork gets a client
    /// error rather than transactions from a different history.
    pub async fn transactions(
        &self,
        since: Option<TransactionNumber>,
        hash: Option<&str>,
    ) -> Result<TransactionsPage> {
        match (since, hash) {
            (None, None) => {}
            (Some(since), Some(hash)) => {
                let height = transaction_number::block_height(since);
                if !self.verify_block(height, hash).await? {
                    return Err(SidetreeError::InvalidTransactionNumberOrTimeHash {
                        since,
                        hash: hash.to_string(),
                    });
                }
            }
            _ => return Err(SidetreeError::SinceAndTimeHashBothRequired),
        }

        let Some(last) = self.last_processed_block.read().clone() else {
            return Ok(TransactionsPage {
                more_transactions: false,
                transactions: Vec::new(),
            });
        };

        // When this node itself sits on a fork, return nothing and let the
        // observer's next pass self-correct, rather than serving transactions
        // from an abandoned history.
        if !self.verify_block(last.height, &last.hash).await? {
            return Ok(TransactionsPage {
                more_transactions: false,
                transactions: Vec::new(),
            });
        }

        let mut window_start = match since {
            Some(since) => transaction_number::block_height(since),
            None => self.config.genesis_block_height,
        };

        loop {
            let window_end =
                (window_start + TRANSACTION_PAGE_SIZE_IN_BLOCKS).min(last.height + 1);
            let mut transactions = self
                .transaction_store
                .get_transactions_in_range(window_start, window_end)
                .await?;
            if let Some(since) = since {
                transactions.retain(|t| t.transaction_number > since);
            }

            if !transactions.is_empty() {
                for transaction in &mut transactions {
                    transaction.normalized_transaction_fee =
                        Some(self.normalized_fee_for_join(transaction.transaction_time).await?);
                }
                return Ok(TransactionsPage {
                    more_transactions: window_end <= last.height,
                    transactions,
                });
            }

            if window_end > last.height {
                return Ok(TransactionsPage {
                    more_transactions: false,
                    transactions: Vec::new(),
                });
            }
            window_start = window_end;
        }
    }

    /// Normalized fee of the block a returned transaction belongs to.
    /// Missing metadata here is an internal consistency violation.
    async fn normalized_fee_for_join(&self, block_height: u64) -> Result<u64> {
        let blocks = self.block_store.get(block_height, block_height + 1).await?;
        let block = blocks
            .into_iter()
            .next()
            .ok_or(SidetreeError::BlockMetadataMissing(block_height))?;
        Ok(NormalizedFeeCalculator::normalized_fee_of_block(&block))
    }

    /// Normalized fee at the given height; heights below the observed
    /// genesis are a client error.
    pub async fn get_normalized_fee(&self, block_height: u64) -> Result<u64> {
        if block_height < self.config.genesis_block_height {
            return Err(SidetreeError::BlockHeightOutOfRange {
                height: block_height,
                genesis: self.config.genesis_block_height,
            });
        }
        self.fee_calculator.get_normalized_fee(block_height).await
    }

    /// Anchor the given string on chain, paying no less than the current
    /// normalized fee, subject to the spending cap and the wallet balance.
    pub async fn write_transaction(
        &self,
        anchor_string: &str,
        minimum_fee_in_satoshis: u64,
    ) -> Result<()> {
        let last_height = self
            .last_processed_block
            .read()
            .as_ref()
            .map(|block| block.height)
            .unwrap_or(self.config.genesis_block_height);

        let normalized_fee = self.fee_calculator.get_normalized_fee(last_height).await?;
        let fee_in_satoshis = minimum_fee_in_satoshis.max(normalized_fee);

        let signed = self
            .client
            .create_anchor_transaction(anchor_string, fee_in_satoshis)
            .await?;

        let within_limit = self
            .spending_monitor
            .is_current_fee_within_spending_limit(signed.transaction_fee, last_height)
            .await?;
        if !within_limit {
            return Err(SidetreeError::SpendingCapPerPeriodReached);
        }

        let available = self.client.get_balance_in_satoshis().await?;
        if available < signed.transaction_fee {
            return Err(SidetreeError::NotEnoughBalanceForWrite {
                required: signed.transaction_fee,
                available,
            });
        }

        self.spending_monitor
            .add_anchor_string_being_written(anchor_string);
        self.client
            .broadcast_transaction(&signed.serialized_transaction)
            .await?;
        info!(anchor_string, fee = signed.transaction_fee, "anchored write");
        self.event_sink.emit(ServiceEvent::TransactionWritten {
            anchor_string: anchor_string.to_string(),
        });
        Ok(())
    }

    /// The last fully processed block, if any.
    pub fn last_processed_block(&self) -> Option<BlockInfo> {
        self.last_processed_block.read().clone()
    }
}
