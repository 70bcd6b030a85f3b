use crate::types::{keccak256, Address, Hash256};
use alloy_primitives::U256;
use alloy_rlp::{Decodable, Encodable};
use serde::{Deserialize, Serialize};

/// A foreign-chain block header.
///
/// Headers are decoded from untrusted input and immutable once constructed.
/// Identity is `(number, hash)`; the hash is keccak256 over the canonical
/// RLP encoding of every field in declaration order. Changing field order or
/// a field's type changes every header hash and is therefore a breaking
/// wire-format change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the parent header.
    pub parent_hash: Hash256,
    /// Block height, exactly parent height + 1.
    pub number: u64,
    /// Coinbase address of the block's author.
    pub author: Address,
    /// Root of the state trie after executing this block.
    pub state_root: Hash256,
    /// Root of the transactions trie.
    pub transactions_root: Hash256,
    /// Root of the receipts trie. Inclusion proofs verify against this.
    pub receipts_root: Hash256,
    /// Bloom filter over the logs of every receipt in the block.
    #[serde(with = "bloom_serde")]
    pub logs_bloom: [u8; 256],
    /// Proof-of-work difficulty of this single block.
    pub difficulty: U256,
    /// Gas limit for the block.
    pub gas_limit: u64,
    /// Gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Unix timestamp claimed by the miner.
    pub timestamp: u64,
    /// Opaque extra data, bounded by the chain's protocol maximum.
    pub extra_data: Vec<u8>,
    /// Mix digest of the proof-of-work seal.
    pub mix_digest: Hash256,
    /// Proof-of-work nonce.
    pub nonce: u64,
    /// Base fee per gas, present once the base-fee fork is active.
    pub base_fee: Option<u64>,
}

impl BlockHeader {
    /// Hash identifying this header: keccak256 of the canonical encoding.
    pub fn hash(&self) -> Hash256 {
        keccak256(&alloy_rlp::encode(self))
    }

    /// Hash the proof-of-work seals: keccak256 of the canonical encoding
    /// with the mix digest and nonce omitted.
    pub fn seal_hash(&self) -> Hash256 {
        let mut out = Vec::with_capacity(self.seal_payload_length() + 3);
        alloy_rlp::Header { list: true, payload_length: self.seal_payload_length() }
            .encode(&mut out);
        self.encode_fields(&mut out, false);
        keccak256(&out)
    }

    /// Epoch the header's seal verifies under, given the chain's epoch length.
    pub fn epoch(&self, epoch_length: u64) -> u64 {
        self.number / epoch_length
    }

    fn nonce_bytes(&self) -> [u8; 8] {
        self.nonce.to_be_bytes()
    }

    /// Encode all fields, optionally including the two seal fields.
    fn encode_fields(&self, out: &mut dyn alloy_rlp::BufMut, with_seal: bool) {
        self.parent_hash.encode(out);
        self.number.encode(out);
        self.author.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.logs_bloom.encode(out);
        self.difficulty.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.timestamp.encode(out);
        self.extra_data.as_slice().encode(out);
        if with_seal {
            self.mix_digest.encode(out);
            self.nonce_bytes().encode(out);
        }
        if let Some(base_fee) = self.base_fee {
            base_fee.encode(out);
        }
    }

    fn seal_payload_length(&self) -> usize {
        self.payload_length() - self.mix_digest.length() - self.nonce_bytes().length()
    }

    fn payload_length(&self) -> usize {
        let mut length = 0;
        length += self.parent_hash.length();
        length += self.number.length();
        length += self.author.length();
        length += self.state_root.length();
        length += self.transactions_root.length();
        length += self.receipts_root.length();
        length += self.logs_bloom.length();
        length += self.difficulty.length();
        length += self.gas_limit.length();
        length += self.gas_used.length();
        length += self.timestamp.length();
        length += self.extra_data.as_slice().length();
        length += self.mix_digest.length();
        length += self.nonce_bytes().length();
        if let Some(base_fee) = self.base_fee {
            length += base_fee.length();
        }
        length
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.encode_fields(out, true);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for BlockHeader {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = alloy_rlp::Header::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();

        let mut header = Self {
            parent_hash: Decodable::decode(buf)?,
            number: Decodable::decode(buf)?,
            author: Decodable::decode(buf)?,
            state_root: Decodable::decode(buf)?,
            transactions_root: Decodable::decode(buf)?,
            receipts_root: Decodable::decode(buf)?,
            logs_bloom: Decodable::decode(buf)?,
            difficulty: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            gas_used: Decodable::decode(buf)?,
            timestamp: Decodable::decode(buf)?,
            extra_data: alloy_primitives::Bytes::decode(buf)?.to_vec(),
            mix_digest: Decodable::decode(buf)?,
            nonce: u64::from_be_bytes(<[u8; 8]>::decode(buf)?),
            base_fee: None,
        };

        // A trailing field is the post-fork base fee.
        if started_len - buf.len() < rlp_head.payload_length {
            header.base_fee = Some(u64::decode(buf)?);
        }

        let consumed = started_len - buf.len();
        if consumed != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: consumed,
            });
        }
        Ok(header)
    }
}

pub(crate) mod bloom_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bloom: &[u8; 256], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bloom))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 256], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 256 {
            return Err(serde::de::Error::custom("bloom must be 256 bytes"));
        }
        let mut arr = [0u8; 256];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}
