//! Data model for the foreign chain: headers, receipts, blocks.

pub mod header;
pub mod receipt;

pub use header::BlockHeader;
pub use receipt::{Block, Log, Receipt, ReceiptDecodeError};

use tiny_keccak::{Hasher, Keccak};

/// A 32-byte hash.
pub type Hash256 = [u8; 32];

/// A 20-byte account address.
pub type Address = [u8; 20];

/// Compute keccak256 hash of data.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// Compute keccak512 hash of data.
pub fn keccak512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Keccak::v512();
    let mut output = [0u8; 64];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}
