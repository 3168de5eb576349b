//! Raw block-data file reading for fast bulk resync
//!
//! The base-chain node appends blocks to numbered files with a common
//! filename prefix. Each file holds a sequence of records: 4 magic bytes,
//! a 4-byte little-endian payload length, then the serialized block.
//! Blocks inside one file are not globally ordered; the iterator walks the
//! files themselves from newest to oldest so a bulk resync can reconcile
//! recent history first.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SidetreeError};
use crate::types::BitcoinBlockModel;

const RECORD_HEADER_SIZE: usize = 8;

/// List raw block-data files under `directory` with the given filename
/// prefix, sorted ascending by name.
pub fn list_block_files(directory: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(directory).map_err(|source| SidetreeError::BlockFileIo {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SidetreeError::BlockFileIo {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let matches_prefix = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix));
        if matches_prefix && path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Parse every block record in a raw block-data file.
pub fn parse_block_file(bytes: &[u8], magic: [u8; 4]) -> Result<Vec<BitcoinBlockModel>> {
    let mut blocks = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        if bytes.len() - offset < RECORD_HEADER_SIZE {
            return Err(SidetreeError::BlockFileCorruptLength(offset));
        }
        if bytes[offset..offset + 4] != magic {
            return Err(SidetreeError::BlockFileBadMagic(offset));
        }

        let length_bytes: [u8; 4] = bytes[offset + 4..offset + 8].try_into().expect("4 bytes");
        let length = u32::from_le_bytes(length_bytes) as usize;
        let payload_start = offset + RECORD_HEADER_SIZE;

        if length == 0 || payload_start + length > bytes.len() {
            return Err(SidetreeError::BlockFileCorruptLength(offset));
        }

        let payload = &bytes[payload_start..payload_start + length];
        let block: BitcoinBlockModel = serde_json::from_slice(payload).map_err(|e| {
            SidetreeError::BlockFileCorruptPayload {
                offset,
                reason: e.to_string(),
            }
        })?;
        blocks.push(block);

        offset = payload_start + length;
    }

    Ok(blocks)
}

/// Serialize one block into its file-record form. Used by tooling and tests
/// that produce block files.
pub fn encode_block_record(block: &BitcoinBlockModel, magic: [u8; 4]) -> Vec<u8> {
    let payload = serde_json::to_vec(block).expect("block models always serialize");
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    record.extend_from_slice(&magic);
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record
}

/// Reverse iterator over raw block-data files, newest file first.
pub struct BlockFileIterator {
    files: Vec<PathBuf>,
    /// Number of files not yet yielded; the next call reads `files[remaining - 1]`.
    remaining: usize,
    magic: [u8; 4],
}

impl BlockFileIterator {
    /// Build an iterator over the block files in `directory`.
    pub fn from_directory(directory: &Path, prefix: &str, magic: [u8; 4]) -> Result<Self> {
        let files = list_block_files(directory, prefix)?;
        let remaining = files.len();
        Ok(Self {
            files,
            remaining,
            magic,
        })
    }

    /// Whether an earlier (not yet yielded) file exists.
    pub fn has_previous(&self) -> bool {
        self.remaining > 0
    }

    /// Parse and yield the next file walking backward, or `None` when
    /// exhausted.
    pub fn previous(&mut self) -> Result<Option<Vec<BitcoinBlockModel>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let path = &self.files[self.remaining];

        let bytes = fs::read(path).map_err(|source| SidetreeError::BlockFileIo {
            path: path.clone(),
            source,
        })?;
        parse_block_file(&bytes, self.magic).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::REGTEST_BLOCK_FILE_MAGIC;
    use std::io::Write;

    fn block(height: u64) -> BitcoinBlockModel {
        BitcoinBlockModel {
            height,
            hash: format!("hash{height}"),
            previous_hash: format!("hash{}", height.wrapping_sub(1)),
            transactions: vec![],
        }
    }

    fn write_file(dir: &Path, name: &str, blocks: &[BitcoinBlockModel]) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        for b in blocks {
            file.write_all(&encode_block_record(b, REGTEST_BLOCK_FILE_MAGIC))
                .unwrap();
        }
    }

    #[test]
    fn test_parse_round_trips_multiple_records() {
        let blocks = vec![block(5), block(3), block(4)];
        let mut bytes = Vec::new();
        for b in &blocks {
            bytes.extend_from_slice(&encode_block_record(b, REGTEST_BLOCK_FILE_MAGIC));
        }

        let parsed = parse_block_file(&bytes, REGTEST_BLOCK_FILE_MAGIC).unwrap();
        assert_eq!(parsed, blocks);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut bytes = encode_block_record(&block(1), REGTEST_BLOCK_FILE_MAGIC);
        bytes[0] ^= 0xff;

        let result = parse_block_file(&bytes, REGTEST_BLOCK_FILE_MAGIC);
        assert!(matches!(result, Err(SidetreeError::BlockFileBadMagic(0))));
    }

    #[test]
    fn test_parse_rejects_truncated_record() {
        let mut bytes = encode_block_record(&block(1), REGTEST_BLOCK_FILE_MAGIC);
        bytes.truncate(bytes.len() - 1);

        let result = parse_block_file(&bytes, REGTEST_BLOCK_FILE_MAGIC);
        assert!(matches!(
            result,
            Err(SidetreeError::BlockFileCorruptLength(0))
        ));
    }

    #[test]
    fn test_parse_rejects_corrupt_payload() {
        let good = encode_block_record(&block(1), REGTEST_BLOCK_FILE_MAGIC);
        let payload_len = good.len() - RECORD_HEADER_SIZE;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&REGTEST_BLOCK_FILE_MAGIC);
        bytes.extend_from_slice(&(payload_len as u32).to_le_bytes());
        bytes.extend_from_slice(&vec![0u8; payload_len]);

        let result = parse_block_file(&bytes, REGTEST_BLOCK_FILE_MAGIC);
        assert!(matches!(
            result,
            Err(SidetreeError::BlockFileCorruptPayload { offset: 0, .. })
        ));
    }

    #[test]
    fn test_iterator_walks_files_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "blk00000.dat", &[block(1), block(2)]);
        write_file(dir.path(), "blk00001.dat", &[block(3), block(4)]);
        write_file(dir.path(), "other.dat", &[block(99)]);

        let mut iterator =
            BlockFileIterator::from_directory(dir.path(), "blk", REGTEST_BLOCK_FILE_MAGIC)
                .unwrap();

        assert!(iterator.has_previous());
        let newest = iterator.previous().unwrap().unwrap();
        assert_eq!(newest.iter().map(|b| b.height).collect::<Vec<_>>(), [3, 4]);

        assert!(iterator.has_previous());
        let oldest = iterator.previous().unwrap().unwrap();
        assert_eq!(oldest.iter().map(|b| b.height).collect::<Vec<_>>(), [1, 2]);

        assert!(!iterator.has_previous());
        assert!(iterator.previous().unwrap().is_none());
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let result = BlockFileIterator::from_directory(
            Path::new("/nonexistent/block/data"),
            "blk",
            REGTEST_BLOCK_FILE_MAGIC,
        );
        assert!(matches!(result, Err(SidetreeError::BlockFileIo { .. })));
    }
}
