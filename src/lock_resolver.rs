//! Value-time-lock resolution against the base chain
//!
//! A claimed lock is trusted only after re-verification: the redeem script
//! must have the exact time-lock shape, the referenced transaction must be
//! confirmed, its output must pay to the P2SH of that exact script, and the
//! lock duration must match the protocol version active at the lock's
//! starting height. Every failure path is a distinct error variant.

use std::sync::Arc;

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SidetreeError};
use crate::fee::NormalizedFeeCalculator;
use crate::lock_identifier::{self, LockIdentifier};
use crate::rpc::BitcoinClient;
use crate::types::ValueTimeLockModel;
use crate::version::VersionRegistry;

// Script opcodes used in the expected redeem-script shape.
const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
const OP_DROP: u8 = 0x75;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_EQUAL: u8 = 0x87;

const DURATION_PUSH_SIZE: u8 = 3;
const HASH160_SIZE: u8 = 20;
const LOCK_SCRIPT_SIZE: usize = 31;

/// hash160: RIPEMD-160 of SHA-256.
fn hash160(bytes: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(bytes);
    let ripe = Ripemd160::digest(sha);
    ripe.into()
}

/// Build a time-lock redeem script paying to the given pubkey hash after
/// `duration_in_blocks` blocks. The counterpart of [`parse_lock_script`].
pub fn build_lock_script_hex(duration_in_blocks: u64, owner_hash160: &[u8; 20]) -> String {
    let duration_bytes = (duration_in_blocks as u32).to_le_bytes();
    let mut script = Vec::with_capacity(LOCK_SCRIPT_SIZE);
    script.push(DURATION_PUSH_SIZE);
    script.extend_from_slice(&duration_bytes[..3]);
    script.push(OP_CHECKSEQUENCEVERIFY);
    script.push(OP_DROP);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(HASH160_SIZE);
    script.extend_from_slice(owner_hash160);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    hex::encode(script)
}

/// P2SH script pubkey hex wrapping the given redeem script bytes.
pub fn p2sh_script_pubkey_hex(redeem_script: &[u8]) -> String {
    let script_hash = hash160(redeem_script);
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    script.push(HASH160_SIZE);
    script.extend_from_slice(&script_hash);
    script.push(OP_EQUAL);
    hex::encode(script)
}

/// Parsed fields of a well-formed lock script.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockScript {
    duration_in_blocks: u64,
    owner_hash160: [u8; 20],
}

/// Verify the redeem script has exactly the time-lock shape:
/// push 3-byte LE duration; OP_CHECKSEQUENCEVERIFY; OP_DROP; P2PKH tail.
fn parse_lock_script(bytes: &[u8]) -> Result<LockScript> {
    let not_lock = |reason: &str| SidetreeError::RedeemScriptNotLock(reason.to_string());

    if bytes.len() != LOCK_SCRIPT_SIZE {
        return Err(not_lock("unexpected script length"));
    }
    if bytes[0] != DURATION_PUSH_SIZE {
        return Err(not_lock("expected 3-byte duration push"));
    }
    if bytes[4] != OP_CHECKSEQUENCEVERIFY || bytes[5] != OP_DROP {
        return Err(not_lock("missing OP_CHECKSEQUENCEVERIFY / OP_DROP"));
    }
    if bytes[6] != OP_DUP || bytes[7] != OP_HASH160 || bytes[8] != HASH160_SIZE {
        return Err(not_lock("missing pay-to-pubkey-hash prefix"));
    }
    if bytes[29] != OP_EQUALVERIFY || bytes[30] != OP_CHECKSIG {
        return Err(not_lock("missing pay-to-pubkey-hash suffix"));
    }

    let duration_in_blocks =
        u64::from(bytes[1]) | u64::from(bytes[2]) << 8 | u64::from(bytes[3]) << 16;
    let mut owner_hash160 = [0u8; 20];
    owner_hash160.copy_from_slice(&bytes[9..29]);

    Ok(LockScript {
        duration_in_blocks,
        owner_hash160,
    })
}

/// Resolves lock identifiers into verified [`ValueTimeLockModel`]s.
pub struct LockResolver {
    client: Arc<dyn BitcoinClient>,
    fee_calculator: Arc<NormalizedFeeCalculator>,
    versions: Arc<VersionRegistry>,
}

impl LockResolver {
    pub fn new(
        client: Arc<dyn BitcoinClient>,
        fee_calculator: Arc<NormalizedFeeCalculator>,
        versions: Arc<VersionRegistry>,
    ) -> Self {
        Self {
            client,
            fee_calculator,
            versions,
        }
    }

    /// Resolve and verify the lock the identifier points at.
    pub async fn resolve(&self, identifier: &LockIdentifier) -> Result<ValueTimeLockModel> {
        let redeem_script_bytes = hex::decode(&identifier.redeem_script_as_hex).map_err(|_| {
            SidetreeError::RedeemScriptNotLock("redeem script is not valid hex".to_string())
        })?;
        let script = parse_lock_script(&redeem_script_bytes)?;

        let transaction = self
            .client
            .get_raw_transaction(&identifier.transaction_id)
            .await
            .map_err(|_| {
                SidetreeError::LockTransactionNotFound(identifier.transaction_id.clone())
            })?;

        if transaction.confirmations < 1 {
            return Err(SidetreeError::LockTransactionNotConfirmed(
                identifier.transaction_id.clone(),
            ));
        }

        let current_height = self.client.get_current_block_height().await?;
        // More confirmations than blocks on the chain is inconsistent
        // client data, not a lock state.
        let lock_start_height = (current_height + 1)
            .checked_sub(transaction.confirmations)
            .ok_or_else(|| {
                SidetreeError::client(
                    "get_raw_transaction",
                    format!(
                        "transaction {} reports {} confirmations above chain height {}",
                        identifier.transaction_id, transaction.confirmations, current_height
                    ),
                )
            })?;

        let expected_script_pubkey = p2sh_script_pubkey_hex(&redeem_script_bytes);
        let pays_to_script = transaction
            .outputs
            .first()
            .is_some_and(|output| output.script_pubkey_hex == expected_script_pubkey);
        if !pays_to_script {
            return Err(SidetreeError::LockTransactionNotPayingToScript(
                identifier.transaction_id.clone(),
            ));
        }

        let required_duration = self.versions.lock_duration_at(lock_start_height)?;
        if script.duration_in_blocks != required_duration {
            return Err(SidetreeError::LockDurationInvalid {
                expected: required_duration,
                actual: script.duration_in_blocks,
            });
        }

        let normalized_fee = self
            .fee_calculator
            .get_normalized_fee(lock_start_height)
            .await?;

        debug!(
            transaction_id = %identifier.transaction_id,
            lock_start_height,
            "resolved value time lock"
        );

        Ok(ValueTimeLockModel {
            identifier: lock_identifier::serialize(identifier),
            owner: hex::encode(script.owner_hash160),
            amount_locked: transaction.outputs[0].satoshis,
            lock_transaction_time: lock_start_height,
            unlock_transaction_time: lock_start_height + script.duration_in_blocks,
            normalized_fee,
        })
    }
}
