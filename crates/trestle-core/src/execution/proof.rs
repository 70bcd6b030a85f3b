use crate::types::keccak256;
use thiserror::Error;

/// Errors during Merkle-Patricia trie proof verification.
/// Each variant is specific enough to diagnose exactly what went wrong.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("empty proof: no trie nodes provided")]
    EmptyProof,

    #[error("invalid RLP encoding in proof node {index}: {reason}")]
    InvalidRlp { index: usize, reason: String },

    #[error("proof verification failed: node {depth} hashes to {computed}, referenced as {expected}")]
    NodeHashMismatch {
        depth: usize,
        computed: String,
        expected: String,
    },

    #[error("invalid trie node type at depth {depth}: expected branch, extension or leaf, got {node_type}")]
    InvalidNodeType { depth: usize, node_type: String },

    #[error("proof path incomplete: traversal ended at depth {depth} without reaching the key")]
    IncompleteProof { depth: usize },

    #[error("no value in trie for the requested key")]
    ValueAbsent,

    #[error("no header for block {number} in the retained window")]
    UnknownHeader { number: u64 },

    #[error("proven receipt bytes do not match the claimed receipt")]
    ReceiptMismatch,
}

/// Outcome of a single verification step: either the key's value was
/// resolved, or the walk continues at the node with the given hash.
enum Step {
    Resolved(Option<Vec<u8>>),
    Descend([u8; 32]),
}

/// Verify a Merkle-Patricia proof for `key` against a trusted `root`.
///
/// `proof_nodes` is the untrusted node set, ordered root-first. Every node is
/// checked against the hash its parent committed to before it is decoded, so
/// a tampered, reordered or truncated set can never produce a false accept.
///
/// Returns `Some(value)` when the key is present, `None` for a valid proof
/// of non-existence.
pub fn verify_trie_proof(
    root: &[u8; 32],
    key: &[u8],
    proof_nodes: &[Vec<u8>],
) -> Result<Option<Vec<u8>>, ProofError> {
    if proof_nodes.is_empty() {
        return Err(ProofError::EmptyProof);
    }

    let nibbles = path_nibbles(key);
    let mut nibble_index = 0usize;
    let mut expected_hash = *root;

    for (depth, node_rlp) in proof_nodes.iter().enumerate() {
        let computed = keccak256(node_rlp);
        if computed != expected_hash {
            return Err(ProofError::NodeHashMismatch {
                depth,
                computed: hex::encode(computed),
                expected: hex::encode(expected_hash),
            });
        }

        match walk_node(node_rlp, &nibbles, &mut nibble_index, depth)? {
            Step::Resolved(value) => return Ok(value),
            Step::Descend(next_hash) => expected_hash = next_hash,
        }
    }

    Err(ProofError::IncompleteProof {
        depth: proof_nodes.len(),
    })
}

/// Process one node, descending through embedded (< 32 byte) children
/// in place since those are carried inline rather than by hash.
fn walk_node(
    node_rlp: &[u8],
    nibbles: &[u8],
    nibble_index: &mut usize,
    depth: usize,
) -> Result<Step, ProofError> {
    let items = decode_rlp_list(node_rlp).map_err(|e| ProofError::InvalidRlp {
        index: depth,
        reason: e,
    })?;

    match items.len() {
        17 => {
            // Branch node: 16 children + value.
            if *nibble_index >= nibbles.len() {
                let value = &items[16];
                if value.is_empty() {
                    return Ok(Step::Resolved(None));
                }
                return Ok(Step::Resolved(Some(value.clone())));
            }
            let child = &items[nibbles[*nibble_index] as usize];
            *nibble_index += 1;
            follow_child(child, nibbles, nibble_index, depth)
        }
        2 => {
            let (prefix_nibbles, is_leaf) =
                decode_compact_path(&items[0]).map_err(|e| ProofError::InvalidRlp {
                    index: depth,
                    reason: e,
                })?;

            if is_leaf {
                let remaining = &nibbles[*nibble_index..];
                if remaining == prefix_nibbles.as_slice() {
                    Ok(Step::Resolved(Some(items[1].clone())))
                } else {
                    // Key diverges from the leaf path: proof of non-existence.
                    Ok(Step::Resolved(None))
                }
            } else {
                let remaining = &nibbles[*nibble_index..];
                if !remaining.starts_with(&prefix_nibbles) {
                    return Ok(Step::Resolved(None));
                }
                *nibble_index += prefix_nibbles.len();
                follow_child(&items[1], nibbles, nibble_index, depth)
            }
        }
        other => Err(ProofError::InvalidNodeType {
            depth,
            node_type: format!("{}-element list", other),
        }),
    }
}

/// Resolve a child reference: absent, a 32-byte hash to descend to, or an
/// embedded node processed recursively without consuming a proof node.
fn follow_child(
    child: &[u8],
    nibbles: &[u8],
    nibble_index: &mut usize,
    depth: usize,
) -> Result<Step, ProofError> {
    if child.is_empty() {
        return Ok(Step::Resolved(None));
    }
    if child.len() == 32 {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(child);
        return Ok(Step::Descend(hash));
    }
    // Nodes whose encoding is shorter than a hash are embedded directly.
    walk_node(child, nibbles, nibble_index, depth)
}

/// Expand a key into its nibble path (4 bits per element).
pub(crate) fn path_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles
}

/// Decode compact (hex-prefix) encoding used in trie node paths.
/// Returns (nibbles, is_leaf).
fn decode_compact_path(encoded: &[u8]) -> Result<(Vec<u8>, bool), String> {
    if encoded.is_empty() {
        return Ok((vec![], false));
    }

    let first_nibble = encoded[0] >> 4;
    if first_nibble > 3 {
        return Err(format!("invalid hex-prefix flag nibble {}", first_nibble));
    }
    let is_leaf = first_nibble >= 2;
    let is_odd = first_nibble % 2 == 1;

    let mut nibbles = Vec::new();
    if is_odd {
        nibbles.push(encoded[0] & 0x0F);
    }
    for &byte in &encoded[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    Ok((nibbles, is_leaf))
}

/// Minimal RLP list decoder for raw trie nodes.
///
/// String items come back as their payload; nested list items come back as
/// their full raw encoding so embedded nodes can be walked in place.
pub(crate) fn decode_rlp_list(data: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    if data.is_empty() {
        return Err("empty RLP data".to_string());
    }

    let (items_data, _) = decode_rlp_list_payload(data)?;
    let mut items = Vec::new();
    let mut offset = 0;
    while offset < items_data.len() {
        let (item, consumed) = decode_rlp_item(&items_data[offset..])?;
        items.push(item);
        offset += consumed;
    }
    Ok(items)
}

/// Decode the payload portion of an RLP list.
fn decode_rlp_list_payload(data: &[u8]) -> Result<(&[u8], usize), String> {
    let prefix = data[0];

    if prefix < 0xC0 {
        return Err("expected list, got string".to_string());
    }

    if prefix <= 0xF7 {
        // Short list: length is prefix - 0xC0
        let length = (prefix - 0xC0) as usize;
        if data.len() < 1 + length {
            return Err("short list: insufficient data".to_string());
        }
        Ok((&data[1..1 + length], 1 + length))
    } else {
        // Long list: next (prefix - 0xF7) bytes are the length
        let len_bytes = (prefix - 0xF7) as usize;
        if data.len() < 1 + len_bytes {
            return Err("long list: insufficient length bytes".to_string());
        }
        let mut length: usize = 0;
        for i in 0..len_bytes {
            length = (length << 8) | (data[1 + i] as usize);
        }
        let total = 1 + len_bytes + length;
        if data.len() < total {
            return Err("long list: insufficient data".to_string());
        }
        Ok((&data[1 + len_bytes..total], total))
    }
}

/// Decode a single RLP item, returning the decoded bytes and how many bytes
/// were consumed.
fn decode_rlp_item(data: &[u8]) -> Result<(Vec<u8>, usize), String> {
    if data.is_empty() {
        return Err("empty data in RLP item".to_string());
    }

    let prefix = data[0];

    if prefix <= 0x7F {
        // Single byte
        Ok((vec![prefix], 1))
    } else if prefix <= 0xB7 {
        // Short string (0-55 bytes)
        let length = (prefix - 0x80) as usize;
        if length == 0 {
            return Ok((vec![], 1));
        }
        if data.len() < 1 + length {
            return Err("short string: insufficient data".to_string());
        }
        Ok((data[1..1 + length].to_vec(), 1 + length))
    } else if prefix <= 0xBF {
        // Long string (>55 bytes)
        let len_bytes = (prefix - 0xB7) as usize;
        if data.len() < 1 + len_bytes {
            return Err("long string: insufficient length bytes".to_string());
        }
        let mut length: usize = 0;
        for i in 0..len_bytes {
            length = (length << 8) | (data[1 + i] as usize);
        }
        let total = 1 + len_bytes + length;
        if data.len() < total {
            return Err("long string: insufficient data".to_string());
        }
        Ok((data[1 + len_bytes..total].to_vec(), total))
    } else {
        // Nested list: keep the raw encoding intact
        let (_, total) = decode_rlp_list_payload(data)?;
        Ok((data[..total].to_vec(), total))
    }
}
