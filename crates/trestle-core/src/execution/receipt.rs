use std::sync::Arc;

use crate::chain::store::HeaderChainStore;
use crate::execution::proof::{verify_trie_proof, ProofError};
use crate::types::Receipt;

/// Authenticates that a claimed receipt is included in the receipts trie of
/// an already-accepted header.
///
/// The receipts root is always resolved from the chain store; a caller can
/// never supply its own root. Proofs are adversarial input: every failure
/// mode is a typed error and there is no partial credit — either the
/// receipt's exact canonical bytes are proven or the claim is rejected.
pub struct ReceiptProofVerifier {
    store: Arc<HeaderChainStore>,
}

impl ReceiptProofVerifier {
    /// A verifier reading receipts roots from `store`.
    pub fn new(store: Arc<HeaderChainStore>) -> Self {
        Self { store }
    }

    /// Verify that `receipt` is stored at `tx_index` in the receipts trie of
    /// the canonical header at `block_number`.
    ///
    /// Returns the authenticated canonical receipt bytes on success.
    pub fn verify(
        &self,
        block_number: u64,
        receipt: &Receipt,
        proof_nodes: &[Vec<u8>],
        tx_index: u64,
    ) -> Result<Vec<u8>, ProofError> {
        let header = self
            .store
            .header_by_number(block_number)
            .ok_or(ProofError::UnknownHeader { number: block_number })?;
        verify_receipt_inclusion(&header.receipts_root, receipt, proof_nodes, tx_index)
    }
}

/// Proof verification against a trusted receipts root.
///
/// The trie key is the RLP-encoded transaction index, matching how the trie
/// was built; the proven leaf must equal the claimed receipt's canonical
/// encoding byte for byte, not merely hash to the same digest.
fn verify_receipt_inclusion(
    receipts_root: &[u8; 32],
    receipt: &Receipt,
    proof_nodes: &[Vec<u8>],
    tx_index: u64,
) -> Result<Vec<u8>, ProofError> {
    let key = alloy_rlp::encode(tx_index);
    let leaf = verify_trie_proof(receipts_root, &key, proof_nodes)?.ok_or(ProofError::ValueAbsent)?;
    if leaf != receipt.encoded() {
        return Err(ProofError::ReceiptMismatch);
    }
    Ok(leaf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::trie::Trie;
    use crate::storage::MemoryStore;
    use crate::types::{BlockHeader, Log};
    use alloy_primitives::U256;

    fn receipts(count: usize) -> Vec<Receipt> {
        (0..count)
            .map(|i| Receipt {
                tx_type: if i % 2 == 0 { 0 } else { 2 },
                status: 1,
                cumulative_gas_used: 30_000 * (i as u64 + 1),
                logs_bloom: [0; 256],
                logs: vec![Log {
                    address: [0xCC; 20],
                    topics: vec![[i as u8; 32]],
                    data: vec![0xAA, 0xBB],
                }],
            })
            .collect()
    }

    fn header_with_root(number: u64, receipts_root: [u8; 32]) -> BlockHeader {
        BlockHeader {
            parent_hash: [0; 32],
            number,
            author: [0; 20],
            state_root: [0x01; 32],
            transactions_root: [0x02; 32],
            receipts_root,
            logs_bloom: [0; 256],
            difficulty: U256::from(1u64),
            gas_limit: 8_000_000,
            gas_used: 0,
            timestamp: 1_600_000_000,
            extra_data: vec![],
            mix_digest: [0; 32],
            nonce: 0,
            base_fee: None,
        }
    }

    fn verifier_for(header: BlockHeader) -> ReceiptProofVerifier {
        let store = Arc::new(
            HeaderChainStore::new(2_000, header, U256::from(1u64), Arc::new(MemoryStore::new()))
                .unwrap(),
        );
        ReceiptProofVerifier::new(store)
    }

    #[test]
    fn test_honest_proof_returns_canonical_bytes() {
        let receipts = receipts(24);
        let trie = Trie::from_receipts(&receipts);
        let verifier = verifier_for(header_with_root(900, trie.root_hash()));

        for (index, receipt) in receipts.iter().enumerate() {
            let proof = trie.prove(&alloy_rlp::encode(index as u64));
            let bytes = verifier.verify(900, receipt, &proof, index as u64).unwrap();
            assert_eq!(bytes, receipt.encoded());
        }
    }

    #[test]
    fn test_unknown_block_number_rejected() {
        let receipts = receipts(2);
        let trie = Trie::from_receipts(&receipts);
        let verifier = verifier_for(header_with_root(900, trie.root_hash()));
        let proof = trie.prove(&alloy_rlp::encode(0u64));
        assert!(matches!(
            verifier.verify(901, &receipts[0], &proof, 0),
            Err(ProofError::UnknownHeader { number: 901 })
        ));
    }

    #[test]
    fn test_proof_against_wrong_root_rejected() {
        let receipts = receipts(8);
        let trie = Trie::from_receipts(&receipts);
        // The stored header commits to a different receipts trie.
        let verifier = verifier_for(header_with_root(900, [0x77; 32]));
        let proof = trie.prove(&alloy_rlp::encode(3u64));
        assert!(matches!(
            verifier.verify(900, &receipts[3], &proof, 3),
            Err(ProofError::NodeHashMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_receipt_rejected() {
        let receipts = receipts(8);
        let trie = Trie::from_receipts(&receipts);
        let verifier = verifier_for(header_with_root(900, trie.root_hash()));
        let proof = trie.prove(&alloy_rlp::encode(3u64));

        let mut tampered = receipts[3].clone();
        tampered.status = 0;
        assert!(matches!(
            verifier.verify(900, &tampered, &proof, 3),
            Err(ProofError::ReceiptMismatch)
        ));
    }

    #[test]
    fn test_truncated_proof_rejected() {
        let receipts = receipts(40);
        let trie = Trie::from_receipts(&receipts);
        let verifier = verifier_for(header_with_root(900, trie.root_hash()));
        let proof = trie.prove(&alloy_rlp::encode(17u64));
        assert!(proof.len() > 1);
        assert!(matches!(
            verifier.verify(900, &receipts[17], &proof[..proof.len() - 1], 17),
            Err(ProofError::IncompleteProof { .. })
        ));
    }

    #[test]
    fn test_index_outside_block_rejected() {
        let receipts = receipts(4);
        let trie = Trie::from_receipts(&receipts);
        let verifier = verifier_for(header_with_root(900, trie.root_hash()));
        let proof = trie.prove(&alloy_rlp::encode(200u64));
        assert!(matches!(
            verifier.verify(900, &receipts[0], &proof, 200),
            Err(ProofError::ValueAbsent)
        ));
    }

    #[test]
    fn test_proof_for_different_index_rejected() {
        let receipts = receipts(16);
        let trie = Trie::from_receipts(&receipts);
        let verifier = verifier_for(header_with_root(900, trie.root_hash()));
        // Claim receipt 5 at index 6 using index 6's honest proof.
        let proof = trie.prove(&alloy_rlp::encode(6u64));
        assert!(matches!(
            verifier.verify(900, &receipts[5], &proof, 6),
            Err(ProofError::ReceiptMismatch)
        ));
    }
}
