//! # Sidetree-Bitcoin
//!
//! Fork-aware observation of a secondary protocol anchored on Bitcoin.
//!
//! This crate reconstructs an ordered, fork-resistant log of anchoring
//! transactions from the base chain, computes a proof-of-fee ("normalized
//! fee") per block, and manages this node's own value time lock with
//! crash-safe save-then-broadcast ordering.
//!
//! ## Architecture
//!
//! - [`processor::BitcoinProcessor`] — the fork-aware block walker: detects
//!   divergence from previously recorded state, reverts invalid history,
//!   and persists validated transactions and block metadata.
//! - [`fee::NormalizedFeeCalculator`] — sliding-window average fee per
//!   block with bounded per-block fluctuation, cached incrementally.
//! - [`lock_monitor::LockMonitor`] — creates, renews, and releases this
//!   node's value time lock, verified on chain by
//!   [`lock_resolver::LockResolver`].
//! - [`observer`] — timer-driven polling loops tying it together.
//!
//! The base-chain node, persistent stores, and anchoring-payload parser
//! are collaborators supplied by the embedding service; their contracts
//! live in [`rpc`], [`store`], and [`parser`], with seedable in-memory
//! implementations in [`mock`].
//!
//! ## Usage
//!
//! ```rust
//! use sidetree_bitcoin::lock_identifier::{self, LockIdentifier};
//! use sidetree_bitcoin::transaction_number;
//!
//! let number = transaction_number::construct(123_456_789, 777).unwrap();
//! assert_eq!(number, 123_456_789_000_777);
//! assert_eq!(transaction_number::block_height(number), 123_456_789);
//!
//! let identifier = LockIdentifier {
//!     transaction_id: "4d66c9c6d36f05a0".to_string(),
//!     redeem_script_as_hex: "03c80000b275".to_string(),
//! };
//! let serialized = lock_identifier::serialize(&identifier);
//! assert_eq!(lock_identifier::deserialize(&serialized).unwrap(), identifier);
//! ```

pub mod constants;
pub mod error;
pub mod event;
pub mod fee;
pub mod lock_identifier;
pub mod lock_monitor;
pub mod lock_resolver;
pub mod mock;
pub mod observer;
pub mod parser;
pub mod processor;
pub mod raw_block;
pub mod rpc;
pub mod spending_monitor;
pub mod store;
pub mod transaction_number;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use error::{Result, SidetreeError};
pub use types::*;
