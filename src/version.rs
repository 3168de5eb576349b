//! Protocol-version registry keyed by chain height
//!
//! Versioned behavior is selected from a closed, sorted activation table
//! rather than loaded dynamically: each entry names the first block height
//! it applies to, and a lookup walks the table from newest to oldest.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SidetreeError};

/// Protocol parameters that vary by activation height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    /// Required duration of a value time lock, in blocks.
    pub value_time_lock_duration_in_blocks: u64,
}

/// One entry of the activation table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VersionedParameters {
    /// First block height this version applies to.
    pub starting_block_height: u64,
    pub parameters: ProtocolParameters,
}

/// Sorted activation table mapping block heights to protocol parameters.
#[derive(Debug, Clone)]
pub struct VersionRegistry {
    /// Entries sorted descending by starting height.
    entries: Vec<VersionedParameters>,
}

impl VersionRegistry {
    /// Build a registry from activation entries in any order.
    pub fn new(mut entries: Vec<VersionedParameters>) -> Self {
        entries.sort_by(|a, b| b.starting_block_height.cmp(&a.starting_block_height));
        Self { entries }
    }

    /// Parameters in effect at the given block height.
    ///
    /// Heights below the earliest activation are a data-integrity error.
    pub fn parameters_at(&self, block_height: u64) -> Result<&ProtocolParameters> {
        self.entries
            .iter()
            .find(|entry| entry.starting_block_height <= block_height)
            .map(|entry| &entry.parameters)
            .ok_or(SidetreeError::VersionNotFound(block_height))
    }

    /// Required lock duration at the given block height.
    pub fn lock_duration_at(&self, block_height: u64) -> Result<u64> {
        Ok(self
            .parameters_at(block_height)?
            .value_time_lock_duration_in_blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VersionRegistry {
        VersionRegistry::new(vec![
            VersionedParameters {
                starting_block_height: 500_000,
                parameters: ProtocolParameters {
                    value_time_lock_duration_in_blocks: 200,
                },
            },
            VersionedParameters {
                starting_block_height: 100,
                parameters: ProtocolParameters {
                    value_time_lock_duration_in_blocks: 100,
                },
            },
        ])
    }

    #[test]
    fn test_lookup_selects_newest_applicable_version() {
        let registry = registry();
        assert_eq!(registry.lock_duration_at(100).unwrap(), 100);
        assert_eq!(registry.lock_duration_at(499_999).unwrap(), 100);
        assert_eq!(registry.lock_duration_at(500_000).unwrap(), 200);
        assert_eq!(registry.lock_duration_at(9_000_000).unwrap(), 200);
    }

    #[test]
    fn test_lookup_below_earliest_version_fails() {
        let registry = registry();
        let result = registry.parameters_at(99);
        assert!(matches!(result, Err(SidetreeError::VersionNotFound(99))));
    }

    #[test]
    fn test_entries_sorted_regardless_of_input_order() {
        let registry = VersionRegistry::new(vec![
            VersionedParameters {
                starting_block_height: 0,
                parameters: ProtocolParameters {
                    value_time_lock_duration_in_blocks: 10,
                },
            },
            VersionedParameters {
                starting_block_height: 50,
                parameters: ProtocolParameters {
                    value_time_lock_duration_in_blocks: 20,
                },
            },
        ]);
        assert_eq!(registry.lock_duration_at(49).unwrap(), 10);
        assert_eq!(registry.lock_duration_at(50).unwrap(), 20);
    }
}
