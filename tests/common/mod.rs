#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, LogData, B256, U256};
use alloy::rpc::types::Log;
use pointsd::events::TRANSFER_EVENT_TOPIC;
use pointsd::storage::ledger::BalanceLedger;

pub fn scratch_ledger() -> (tempfile::TempDir, BalanceLedger) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = BalanceLedger::open(dir.path().join("ledger.db")).unwrap();
    (dir, ledger)
}

pub fn raw_log(emitter: Address, topics: Vec<B256>, data: Vec<u8>, block: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: emitter,
            data: LogData::new_unchecked(topics, Bytes::from(data)),
        },
        block_hash: None,
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: None,
        transaction_index: None,
        log_index: Some(0),
        removed: false,
    }
}

pub fn transfer_log(emitter: Address, from: Address, to: Address, value: u64, block: u64) -> Log {
    raw_log(
        emitter,
        vec![TRANSFER_EVENT_TOPIC, from.into_word(), to.into_word()],
        U256::from(value).to_be_bytes::<32>().to_vec(),
        block,
    )
}

/// A Transfer-shaped log with a truncated payload: decodes to an error and
/// must be skipped without stalling the batch.
pub fn malformed_transfer_log(emitter: Address, from: Address, to: Address, block: u64) -> Log {
    raw_log(
        emitter,
        vec![TRANSFER_EVENT_TOPIC, from.into_word(), to.into_word()],
        vec![0u8; 16],
        block,
    )
}
