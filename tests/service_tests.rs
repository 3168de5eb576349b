//! End-to-end tests wiring the processor, fee calculator, and lock
//! subsystems together against the in-memory collaborators.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use sidetree_bitcoin::constants::REGTEST_BLOCK_FILE_MAGIC;
use sidetree_bitcoin::event::NullEventSink;
use sidetree_bitcoin::fee::{FeeCalculatorConfig, NormalizedFeeCalculator};
use sidetree_bitcoin::lock_monitor::{LockMonitor, LockMonitorConfig};
use sidetree_bitcoin::lock_resolver::{build_lock_script_hex, p2sh_script_pubkey_hex, LockResolver};
use sidetree_bitcoin::mock::{
    MockBitcoinClient, MockBlockMetadataStore, MockLockTransactionStore, MockServiceStateStore,
    MockTransactionParser, MockTransactionStore,
};
use sidetree_bitcoin::processor::{block_reward_in_satoshis, BitcoinProcessor, ProcessorConfig};
use sidetree_bitcoin::raw_block::encode_block_record;
use sidetree_bitcoin::spending_monitor::SpendingMonitor;
use sidetree_bitcoin::types::{
    BitcoinBlockModel, BitcoinLockTransaction, BitcoinOutputModel, BitcoinTransactionModel,
    SavedLockType,
};
use sidetree_bitcoin::version::{ProtocolParameters, VersionRegistry, VersionedParameters};

struct Service {
    client: Arc<MockBitcoinClient>,
    transaction_store: Arc<MockTransactionStore>,
    block_store: Arc<MockBlockMetadataStore>,
    parser: Arc<MockTransactionParser>,
    processor: BitcoinProcessor,
}

fn service(block_data_directory: Option<&Path>) -> Service {
    let client = Arc::new(MockBitcoinClient::new());
    let transaction_store = Arc::new(MockTransactionStore::new());
    let block_store = Arc::new(MockBlockMetadataStore::new());
    let parser = Arc::new(MockTransactionParser::new());

    let fee_calculator = Arc::new(NormalizedFeeCalculator::new(
        FeeCalculatorConfig {
            genesis_block_height: 0,
            initial_normalized_fee_in_satoshis: 1_000,
            fee_look_back_window_in_blocks: 1_000,
            fee_max_fluctuation_multiplier_per_block: 0.000002,
        },
        block_store.clone(),
    ));
    let spending_monitor =
        Arc::new(SpendingMonitor::new(100, 1_000_000, transaction_store.clone()).unwrap());

    let processor = BitcoinProcessor::new(
        ProcessorConfig {
            genesis_block_height: 0,
            block_data_directory: block_data_directory.map(|p| p.to_path_buf()),
            block_file_magic: REGTEST_BLOCK_FILE_MAGIC,
        },
        client.clone(),
        transaction_store.clone(),
        block_store.clone(),
        Arc::new(MockServiceStateStore::new()),
        parser.clone(),
        fee_calculator,
        spending_monitor,
        Arc::new(NullEventSink),
    );

    Service {
        client,
        transaction_store,
        block_store,
        parser,
        processor,
    }
}

fn coinbase(block_hash: &str, height: u64) -> BitcoinTransactionModel {
    BitcoinTransactionModel {
        id: format!("cb-{block_hash}"),
        block_hash: block_hash.to_string(),
        confirmations: 0,
        inputs: vec![],
        outputs: vec![BitcoinOutputModel {
            satoshis: block_reward_in_satoshis(height),
            script_pubkey_hex: String::new(),
        }],
    }
}

fn plain_transaction(id: &str, block_hash: &str) -> BitcoinTransactionModel {
    BitcoinTransactionModel {
        id: id.to_string(),
        block_hash: block_hash.to_string(),
        confirmations: 0,
        inputs: vec![],
        outputs: vec![],
    }
}

/// A block on the `hashN` chain, optionally carrying one extra transaction.
fn chain_block(height: u64, extra: Option<BitcoinTransactionModel>) -> BitcoinBlockModel {
    let hash = format!("hash{height}");
    let previous_hash = if height == 0 {
        "genesis-parent".to_string()
    } else {
        format!("hash{}", height - 1)
    };
    let mut transactions = vec![coinbase(&hash, height)];
    transactions.extend(extra);
    BitcoinBlockModel {
        height,
        hash,
        previous_hash,
        transactions,
    }
}

fn write_block_file(directory: &Path, name: &str, blocks: &[BitcoinBlockModel]) {
    let mut file = fs::File::create(directory.join(name)).unwrap();
    for block in blocks {
        file.write_all(&encode_block_record(block, REGTEST_BLOCK_FILE_MAGIC))
            .unwrap();
    }
}

#[tokio::test]
async fn test_fast_sync_drops_orphaned_branch_and_keeps_canonical_chain() {
    let directory = tempfile::tempdir().unwrap();

    let canonical_3 = chain_block(3, Some(plain_transaction("anchor-3", "hash3")));
    // Same height, same parent, never linked from the tip.
    let orphan_3 = BitcoinBlockModel {
        height: 3,
        hash: "hash3-orphan".to_string(),
        previous_hash: "hash2".to_string(),
        transactions: vec![
            coinbase("hash3-orphan", 3),
            plain_transaction("anchor-3-orphan", "hash3-orphan"),
        ],
    };

    write_block_file(
        directory.path(),
        "blk00000.dat",
        &[chain_block(0, None), chain_block(1, None), chain_block(2, None)],
    );
    write_block_file(
        directory.path(),
        "blk00001.dat",
        &[canonical_3, orphan_3, chain_block(4, None)],
    );

    let service = service(Some(directory.path()));
    for height in 0..=4u64 {
        service.client.set_block_hash(height, format!("hash{height}"));
    }
    service
        .parser
        .set_anchor("anchor-3", "anchor-string-3", "writer");
    service
        .parser
        .set_anchor("anchor-3-orphan", "anchor-string-orphan", "writer");
    service.client.set_transaction_fee("anchor-3", 42);

    service.processor.initialize().await.unwrap();

    let stored = service.transaction_store.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].anchor_string, "anchor-string-3");
    assert_eq!(stored[0].transaction_time_hash, "hash3");
    assert_eq!(stored[0].transaction_fee_paid, 42);

    let metadata = service.block_store.all();
    let hashes: Vec<&str> = metadata.iter().map(|b| b.hash.as_str()).collect();
    assert_eq!(hashes, ["hash0", "hash1", "hash2", "hash3", "hash4"]);
    assert_eq!(service.processor.last_processed_block().unwrap().hash, "hash4");
}

#[tokio::test]
async fn test_fast_sync_with_gapped_block_files_leaves_catch_up_to_rpc() {
    let directory = tempfile::tempdir().unwrap();
    // Block files only cover heights 3 and 4; nothing links back to genesis.
    write_block_file(
        directory.path(),
        "blk00000.dat",
        &[chain_block(3, None), chain_block(4, None)],
    );

    let service = service(Some(directory.path()));
    for height in 0..=4u64 {
        service.client.add_block(chain_block(height, None));
    }

    service.processor.initialize().await.unwrap();

    // Fast sync wrote nothing rather than leaving a gap below height 3.
    assert!(service.block_store.all().is_empty());
    assert!(service.transaction_store.all().is_empty());
    assert!(service.processor.last_processed_block().is_none());

    // The regular observation pass completes the catch-up over RPC.
    service.processor.process_transactions().await.unwrap();
    let hashes: Vec<String> = service
        .block_store
        .all()
        .iter()
        .map(|b| b.hash.clone())
        .collect();
    assert_eq!(hashes, ["hash0", "hash1", "hash2", "hash3", "hash4"]);
}

#[tokio::test]
async fn test_pagination_never_repeats_and_terminates() {
    let service = service(None);
    let anchor_heights = [10u64, 120, 240];
    for height in 0..=250u64 {
        let extra = anchor_heights.contains(&height).then(|| {
            let id = format!("anchor-{height}");
            service
                .parser
                .set_anchor(&id, format!("anchor-string-{height}"), "writer");
            plain_transaction(&id, &format!("hash{height}"))
        });
        service.client.add_block(chain_block(height, extra));
    }

    service.processor.process_transactions().await.unwrap();

    let mut seen = Vec::new();
    let mut since = None;
    let mut hash: Option<String> = None;
    loop {
        let page = service
            .processor
            .transactions(since, hash.as_deref())
            .await
            .unwrap();
        for transaction in &page.transactions {
            assert!(
                !seen.contains(&transaction.transaction_number),
                "transaction returned twice"
            );
            assert!(transaction.normalized_transaction_fee.is_some());
            seen.push(transaction.transaction_number);
        }
        if !page.more_transactions {
            break;
        }
        let last = page.transactions.last().unwrap();
        since = Some(last.transaction_number);
        hash = Some(last.transaction_time_hash.clone());
    }

    let expected: Vec<i64> = anchor_heights
        .iter()
        .map(|&h| (h as i64) * 1_000_000 + 1)
        .collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_lock_lifecycle_from_creation_to_confirmed() {
    const DURATION: u64 = 100;
    const TIP: u64 = 2_000;
    const DESIRED: u64 = 30_000;

    let service = service(None);
    for height in 0..=TIP {
        service.client.add_block(chain_block(height, None));
    }
    service.processor.process_transactions().await.unwrap();

    let versions = Arc::new(VersionRegistry::new(vec![VersionedParameters {
        starting_block_height: 0,
        parameters: ProtocolParameters {
            value_time_lock_duration_in_blocks: DURATION,
        },
    }]));
    let fee_calculator = Arc::new(NormalizedFeeCalculator::new(
        FeeCalculatorConfig {
            genesis_block_height: 0,
            initial_normalized_fee_in_satoshis: 1_000,
            fee_look_back_window_in_blocks: 1_000,
            fee_max_fluctuation_multiplier_per_block: 0.000002,
        },
        service.block_store.clone(),
    ));
    let resolver = Arc::new(LockResolver::new(
        service.client.clone(),
        fee_calculator,
        versions.clone(),
    ));
    let lock_store = Arc::new(MockLockTransactionStore::new());
    let monitor = LockMonitor::new(
        service.client.clone(),
        lock_store.clone(),
        resolver,
        versions,
        LockMonitorConfig {
            lock_enabled: true,
            desired_lock_amount_in_satoshis: DESIRED,
            transaction_fees_reserve_in_satoshis: 1_000,
        },
        Arc::new(NullEventSink),
    );

    // The wallet will build a genuine time-lock script.
    let script_hex = build_lock_script_hex(DURATION, &[5u8; 20]);
    service.client.queue_lock_transaction(BitcoinLockTransaction {
        transaction_id: "lifecycle-lock".to_string(),
        redeem_script_as_hex: script_hex.clone(),
        serialized_transaction: "raw-lifecycle-lock".to_string(),
        transaction_fee: 300,
    });
    service.client.set_balance(DESIRED + 2_000);

    // First poll: no lock yet, so one is created and broadcast.
    monitor.handle_periodic_poll().await.unwrap();
    assert_eq!(lock_store.all().len(), 1);
    assert_eq!(lock_store.all()[0].lock_type, SavedLockType::Create);
    assert_eq!(
        service.client.broadcast_log(),
        vec!["raw-lifecycle-lock".to_string()]
    );

    // Not mined yet: the lock reads as pending and gets rebroadcast.
    monitor.handle_periodic_poll().await.unwrap();
    assert_eq!(lock_store.all().len(), 1);
    assert_eq!(service.client.broadcast_log().len(), 2);

    // Mine it with a few confirmations.
    let redeem_script = hex::decode(&script_hex).unwrap();
    service.client.add_transaction(BitcoinTransactionModel {
        id: "lifecycle-lock".to_string(),
        block_hash: "hash1996".to_string(),
        confirmations: 5,
        inputs: vec![],
        outputs: vec![BitcoinOutputModel {
            satoshis: DESIRED + 1_300,
            script_pubkey_hex: p2sh_script_pubkey_hex(&redeem_script),
        }],
    });

    // Confirmed and far from its unlock height: nothing further happens.
    monitor.handle_periodic_poll().await.unwrap();
    assert_eq!(lock_store.all().len(), 1);
    assert_eq!(service.client.broadcast_log().len(), 2);

    let lock = monitor.get_active_value_time_lock().await.unwrap();
    assert_eq!(lock.amount_locked, DESIRED + 1_300);
    assert_eq!(lock.lock_transaction_time, TIP - 5 + 1);
    assert_eq!(lock.unlock_transaction_time, TIP - 5 + 1 + DURATION);
}
