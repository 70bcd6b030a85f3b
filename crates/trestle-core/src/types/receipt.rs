use crate::types::{header::bloom_serde, Address, BlockHeader, Hash256};
use alloy_rlp::{Decodable, Encodable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a receipt from its canonical encoding.
#[derive(Debug, Error)]
pub enum ReceiptDecodeError {
    #[error("empty receipt payload")]
    Empty,

    #[error("invalid receipt RLP: {0}")]
    InvalidRlp(alloy_rlp::Error),

    #[error("unknown receipt type {0:#04x}")]
    UnknownType(u8),
}

/// A transaction receipt as committed to the receipts trie.
///
/// The canonical encoding is the post-EIP-2718 envelope: a legacy receipt is
/// the bare RLP list `[status, cumulative gas, bloom, logs]`, a typed
/// receipt prefixes that list with its one type byte. [`Receipt::encoded`]
/// reproduces the exact leaf bytes stored in the trie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// EIP-2718 transaction type; 0 for legacy receipts.
    pub tx_type: u8,
    /// Whether the transaction succeeded (1) or failed (0).
    pub status: u8,
    /// Cumulative gas used in the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Bloom filter over this receipt's logs.
    #[serde(with = "bloom_serde")]
    pub logs_bloom: [u8; 256],
    /// The logs emitted by this transaction.
    pub logs: Vec<Log>,
}

/// Highest transaction type byte currently assigned.
const MAX_RECEIPT_TYPE: u8 = 0x04;

impl Receipt {
    /// Canonical encoding: the exact bytes stored as the receipts-trie leaf.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.rlp_length() + 1);
        if self.tx_type > 0 {
            out.push(self.tx_type);
        }
        alloy_rlp::Header { list: true, payload_length: self.rlp_payload_length() }
            .encode(&mut out);
        self.status.encode(&mut out);
        self.cumulative_gas_used.encode(&mut out);
        self.logs_bloom.encode(&mut out);
        self.logs.encode(&mut out);
        out
    }

    /// Decode a receipt from its canonical (enveloped) encoding.
    pub fn decode(data: &[u8]) -> Result<Self, ReceiptDecodeError> {
        let (tx_type, mut payload) = match data {
            [] => return Err(ReceiptDecodeError::Empty),
            // A leading byte below 0x80 is an EIP-2718 type prefix.
            [tx_type, rest @ ..] if *tx_type <= 0x7f => {
                if *tx_type == 0 || *tx_type > MAX_RECEIPT_TYPE {
                    return Err(ReceiptDecodeError::UnknownType(*tx_type));
                }
                (*tx_type, rest)
            }
            _ => (0, data),
        };

        let buf = &mut payload;
        let rlp_head = alloy_rlp::Header::decode(buf).map_err(ReceiptDecodeError::InvalidRlp)?;
        if !rlp_head.list {
            return Err(ReceiptDecodeError::InvalidRlp(alloy_rlp::Error::UnexpectedString));
        }
        let started_len = buf.len();

        let receipt = Self {
            tx_type,
            status: u8::decode(buf).map_err(ReceiptDecodeError::InvalidRlp)?,
            cumulative_gas_used: u64::decode(buf).map_err(ReceiptDecodeError::InvalidRlp)?,
            logs_bloom: <[u8; 256]>::decode(buf).map_err(ReceiptDecodeError::InvalidRlp)?,
            logs: Vec::<Log>::decode(buf).map_err(ReceiptDecodeError::InvalidRlp)?,
        };

        let consumed = started_len - buf.len();
        if consumed != rlp_head.payload_length {
            return Err(ReceiptDecodeError::InvalidRlp(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: consumed,
            }));
        }
        Ok(receipt)
    }

    fn rlp_payload_length(&self) -> usize {
        self.status.length()
            + self.cumulative_gas_used.length()
            + self.logs_bloom.length()
            + self.logs.length()
    }

    fn rlp_length(&self) -> usize {
        let payload_length = self.rlp_payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

/// A log entry emitted by a contract on the foreign chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Address of the contract that emitted the log.
    pub address: Address,
    /// Indexed topics, the first usually the event signature hash.
    pub topics: Vec<Hash256>,
    /// Non-indexed data.
    pub data: Vec<u8>,
}

impl Log {
    fn rlp_payload_length(&self) -> usize {
        self.address.length() + self.topics.length() + self.data.as_slice().length()
    }
}

impl Encodable for Log {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.rlp_payload_length() }.encode(out);
        self.address.encode(out);
        self.topics.encode(out);
        self.data.as_slice().encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.rlp_payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for Log {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = alloy_rlp::Header::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let log = Self {
            address: Decodable::decode(buf)?,
            topics: Decodable::decode(buf)?,
            data: alloy_primitives::Bytes::decode(buf)?.to_vec(),
        };
        let consumed = started_len - buf.len();
        if consumed != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: consumed,
            });
        }
        Ok(log)
    }
}

/// A foreign-chain block as seen by the bridge: the header plus the hashes
/// of its transactions. Bodies are never executed here, so transaction
/// payloads are not carried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block's header.
    pub header: BlockHeader,
    /// Hashes of the block's transactions, in block order.
    pub transactions: Vec<Hash256>,
}

impl Block {
    /// Hash of the block, which is the hash of its header.
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}
