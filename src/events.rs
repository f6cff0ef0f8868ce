use crate::error::DecodeError;
use alloy::primitives::{b256, Address, B256, U256};
use alloy::rpc::types::Log;

/// keccak-256 of `Transfer(address,address,uint256)`.
pub const TRANSFER_EVENT_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// A decoded ERC-20 transfer. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Transfer(TransferEvent),
    /// Topic shape does not match a Transfer; not an error, just not ours.
    NotATransfer,
}

/// Filter + decode a raw log into a [`TransferEvent`].
///
/// Logs whose topic count is not exactly 3 (signature + two indexed
/// addresses) or whose first topic is not the Transfer signature are
/// rejected as [`Decoded::NotATransfer`]. A matching log with a malformed
/// data payload is a [`DecodeError`], which callers treat as skippable.
pub fn decode_transfer(log: &Log) -> Result<Decoded, DecodeError> {
    let topics = log.topics();
    if topics.len() != 3 || topics[0] != TRANSFER_EVENT_TOPIC {
        return Ok(Decoded::NotATransfer);
    }

    let payload = log.inner.data.data.as_ref();
    if payload.len() != 32 {
        return Err(DecodeError::PayloadLength(payload.len()));
    }

    // Indexed addresses live in the rightmost 20 bytes of their topic words.
    Ok(Decoded::Transfer(TransferEvent {
        from: Address::from_word(topics[1]),
        to: Address::from_word(topics[2]),
        value: U256::from_be_slice(payload),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, keccak256, Bytes, LogData};

    fn raw_log(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: address!("35D8949372D46B7a3D5A56006AE77B215fc69bC0"),
                data: LogData::new_unchecked(topics, Bytes::from(data)),
            },
            block_hash: None,
            block_number: Some(100),
            block_timestamp: None,
            transaction_hash: None,
            transaction_index: None,
            log_index: Some(0),
            removed: false,
        }
    }

    fn value_word(value: u64) -> Vec<u8> {
        U256::from(value).to_be_bytes::<32>().to_vec()
    }

    #[test]
    fn test_signature_topic_matches_keccak() {
        assert_eq!(
            TRANSFER_EVENT_TOPIC,
            keccak256("Transfer(address,address,uint256)")
        );
    }

    #[test]
    fn test_decodes_well_formed_transfer() {
        let from = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let to = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let log = raw_log(
            vec![TRANSFER_EVENT_TOPIC, from.into_word(), to.into_word()],
            value_word(1000),
        );

        let decoded = decode_transfer(&log).unwrap();
        assert_eq!(
            decoded,
            Decoded::Transfer(TransferEvent {
                from,
                to,
                value: U256::from(1000),
            })
        );
    }

    #[test]
    fn test_rejects_foreign_signature_regardless_of_payload() {
        let topic0 = keccak256("Approval(address,address,uint256)");
        let from = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let to = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let log = raw_log(
            vec![topic0, from.into_word(), to.into_word()],
            value_word(1000),
        );
        assert_eq!(decode_transfer(&log).unwrap(), Decoded::NotATransfer);

        // Same signature mismatch with a garbage payload is still NotATransfer.
        let log = raw_log(vec![topic0, from.into_word(), to.into_word()], vec![1, 2]);
        assert_eq!(decode_transfer(&log).unwrap(), Decoded::NotATransfer);
    }

    #[test]
    fn test_rejects_wrong_topic_count() {
        let from = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let log = raw_log(vec![TRANSFER_EVENT_TOPIC, from.into_word()], value_word(1));
        assert_eq!(decode_transfer(&log).unwrap(), Decoded::NotATransfer);

        let log = raw_log(
            vec![
                TRANSFER_EVENT_TOPIC,
                from.into_word(),
                from.into_word(),
                from.into_word(),
            ],
            value_word(1),
        );
        assert_eq!(decode_transfer(&log).unwrap(), Decoded::NotATransfer);
    }

    #[test]
    fn test_malformed_payload_is_a_decode_error() {
        let from = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let to = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

        let short = raw_log(
            vec![TRANSFER_EVENT_TOPIC, from.into_word(), to.into_word()],
            vec![0u8; 31],
        );
        assert_eq!(
            decode_transfer(&short).unwrap_err(),
            DecodeError::PayloadLength(31)
        );

        let long = raw_log(
            vec![TRANSFER_EVENT_TOPIC, from.into_word(), to.into_word()],
            vec![0u8; 64],
        );
        assert_eq!(
            decode_transfer(&long).unwrap_err(),
            DecodeError::PayloadLength(64)
        );
    }
}
