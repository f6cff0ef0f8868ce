//! Transfer-event indexer with a derived points API.
//!
//! One scan task per watched contract walks the chain in bounded block
//! chunks, decodes ERC-20 `Transfer` logs and folds them into a durable
//! per-(account, contract) balance ledger. A small HTTP surface serves the
//! weighted points score computed from those balances.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod points;
pub mod storage;
pub mod utils;
pub mod watcher;
