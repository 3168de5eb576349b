//! Serialized lock identifier codec
//!
//! A lock identifier carries the lock transaction id and its redeem script
//! as hex, joined with a `.` delimiter and base64url-encoded (no padding)
//! so it travels safely in URLs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::constants::LOCK_IDENTIFIER_DELIMITER;
use crate::error::{Result, SidetreeError};

/// Identifies one on-chain value time lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockIdentifier {
    pub transaction_id: String,
    pub redeem_script_as_hex: String,
}

/// Serialize an identifier into its URL-safe string form.
pub fn serialize(identifier: &LockIdentifier) -> String {
    let delimited = format!(
        "{}{}{}",
        identifier.transaction_id, LOCK_IDENTIFIER_DELIMITER, identifier.redeem_script_as_hex
    );
    URL_SAFE_NO_PAD.encode(delimited.as_bytes())
}

/// Deserialize an identifier from its URL-safe string form.
///
/// Fails unless the decoded string splits into exactly two parts.
pub fn deserialize(serialized: &str) -> Result<LockIdentifier> {
    let decoded_bytes = URL_SAFE_NO_PAD
        .decode(serialized.as_bytes())
        .map_err(|e| SidetreeError::LockIdentifierFormat(e.to_string()))?;
    let decoded = String::from_utf8(decoded_bytes)
        .map_err(|e| SidetreeError::LockIdentifierFormat(e.to_string()))?;

    let parts: Vec<&str> = decoded.split(LOCK_IDENTIFIER_DELIMITER).collect();
    if parts.len() != 2 {
        return Err(SidetreeError::LockIdentifierFormat(format!(
            "expected 2 delimited parts, got {}",
            parts.len()
        )));
    }

    Ok(LockIdentifier {
        transaction_id: parts[0].to_string(),
        redeem_script_as_hex: parts[1].to_string(),
    })
}
