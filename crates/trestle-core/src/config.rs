//! Per-chain protocol parameters.
//!
//! Every supported foreign chain is a variant of [`ForeignChain`]; the
//! variant is resolved once when the bridge is constructed and carries the
//! constants the validator, store and cache manager need. Adding support for
//! a new chain means adding a variant here — there is no runtime dispatch on
//! chain identifiers anywhere else.

use serde::{Deserialize, Serialize};

/// Number of blocks sharing one proof-of-work verification cache.
pub const DEFAULT_EPOCH_LENGTH: u64 = 30_000;

/// Base fee of the first block after the base-fee fork activates.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

/// A foreign proof-of-work chain the bridge can follow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignChain {
    /// Ethereum mainnet (pre-merge rules).
    Mainnet,
    /// Ethereum Classic.
    Classic,
    /// A chain with explicit parameters, used for private networks and tests.
    Custom(ChainParams),
}

impl ForeignChain {
    /// Protocol parameters for this chain.
    pub fn params(&self) -> ChainParams {
        match self {
            Self::Mainnet => ChainParams {
                chain_id: 1,
                epoch_length: DEFAULT_EPOCH_LENGTH,
                base_fee_fork_block: Some(12_965_000),
                retention: 2_000,
                max_extra_data_len: 32,
                min_gas_limit: 5_000,
                gas_limit_bound_divisor: 1_024,
                elasticity_multiplier: 2,
                base_fee_change_denominator: 8,
                allowed_future_secs: 15,
            },
            Self::Classic => ChainParams {
                chain_id: 61,
                epoch_length: DEFAULT_EPOCH_LENGTH,
                // ETC never activated the base-fee fork.
                base_fee_fork_block: None,
                retention: 2_000,
                max_extra_data_len: 32,
                min_gas_limit: 5_000,
                gas_limit_bound_divisor: 1_024,
                elasticity_multiplier: 2,
                base_fee_change_denominator: 8,
                allowed_future_secs: 15,
            },
            Self::Custom(params) => params.clone(),
        }
    }
}

/// Protocol constants for one foreign chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Chain identifier, informational only.
    pub chain_id: u64,
    /// Blocks per proof-of-work cache epoch.
    pub epoch_length: u64,
    /// First block at which the base-fee rules apply, `None` if never.
    pub base_fee_fork_block: Option<u64>,
    /// How many distinct block numbers the store retains.
    pub retention: u64,
    /// Maximum length of a header's extra-data field in bytes.
    pub max_extra_data_len: usize,
    /// Lowest gas limit a header may carry.
    pub min_gas_limit: u64,
    /// Divisor bounding how far a gas limit may drift from its parent's.
    pub gas_limit_bound_divisor: u64,
    /// Gas-target multiplier applied at the base-fee fork block.
    pub elasticity_multiplier: u64,
    /// Divisor damping per-block base-fee movement.
    pub base_fee_change_denominator: u64,
    /// Tolerance for headers timestamped ahead of local time, in seconds.
    pub allowed_future_secs: u64,
}

impl ChainParams {
    /// Epoch of the cache covering `number`.
    pub fn epoch(&self, number: u64) -> u64 {
        number / self.epoch_length
    }

    /// Whether the base-fee rules are active at `number`.
    pub fn base_fee_active_at(&self, number: u64) -> bool {
        self.base_fee_fork_block.is_some_and(|fork| number >= fork)
    }

    /// Whether `number` is the base-fee fork transition block itself.
    pub fn base_fee_transition_at(&self, number: u64) -> bool {
        self.base_fee_fork_block == Some(number)
    }
}
