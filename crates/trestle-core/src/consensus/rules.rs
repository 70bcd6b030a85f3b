//! Per-header protocol rule checks.
//!
//! Each rule is a small standalone function taking the header and, where
//! needed, its resolved parent; [`validate_header`] composes them in the
//! order a failed check is cheapest to detect. Seal verification lives in
//! [`crate::consensus::seal`] because it needs the epoch cache.

use thiserror::Error;

use crate::config::{ChainParams, INITIAL_BASE_FEE};
use crate::types::BlockHeader;

/// Highest gas limit any header may declare.
pub const MAX_GAS_LIMIT: u64 = i64::MAX as u64;

/// Violations of the per-header protocol rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("extra-data length {len} exceeds maximum {max}")]
    ExtraDataTooLong { len: usize, max: usize },

    #[error("block number {number} does not follow parent number {parent}")]
    NonSequentialNumber { number: u64, parent: u64 },

    #[error("timestamp {timestamp} not newer than parent timestamp {parent}")]
    OlderThanParent { timestamp: u64, parent: u64 },

    #[error("timestamp {timestamp} is more than {tolerance}s ahead of local time {now}")]
    FutureBlock {
        timestamp: u64,
        now: u64,
        tolerance: u64,
    },

    #[error("gas used {gas_used} exceeds gas limit {gas_limit}")]
    GasUsedExceedsLimit { gas_used: u64, gas_limit: u64 },

    #[error("gas limit {gas_limit} outside protocol bounds [{min}, {max}]")]
    GasLimitOutOfBounds { gas_limit: u64, min: u64, max: u64 },

    #[error("gas limit {gas_limit} drifts from parent limit {parent} by {delta}, more than allowed {max_delta}")]
    GasLimitDeltaTooLarge {
        gas_limit: u64,
        parent: u64,
        delta: u64,
        max_delta: u64,
    },

    #[error("header omits the base fee after the base-fee fork")]
    BaseFeeMissing,

    #[error("header declares a base fee before the base-fee fork")]
    UnexpectedBaseFee,

    #[error("parent header omits its base fee")]
    ParentBaseFeeMissing,

    #[error("base fee {got} does not match the expected {expected}")]
    BaseFeeMismatch { got: u64, expected: u64 },
}

/// Extra-data must stay within the protocol maximum.
pub fn validate_extra_data(header: &BlockHeader, params: &ChainParams) -> Result<(), RuleError> {
    if header.extra_data.len() > params.max_extra_data_len {
        return Err(RuleError::ExtraDataTooLong {
            len: header.extra_data.len(),
            max: params.max_extra_data_len,
        });
    }
    Ok(())
}

/// Block number must be exactly parent number + 1.
pub fn validate_number(header: &BlockHeader, parent: &BlockHeader) -> Result<(), RuleError> {
    if header.number != parent.number + 1 {
        return Err(RuleError::NonSequentialNumber {
            number: header.number,
            parent: parent.number,
        });
    }
    Ok(())
}

/// Timestamp must strictly increase and stay within the future tolerance.
pub fn validate_timestamp(
    header: &BlockHeader,
    parent: &BlockHeader,
    now: u64,
    params: &ChainParams,
) -> Result<(), RuleError> {
    if header.timestamp <= parent.timestamp {
        return Err(RuleError::OlderThanParent {
            timestamp: header.timestamp,
            parent: parent.timestamp,
        });
    }
    if header.timestamp > now + params.allowed_future_secs {
        return Err(RuleError::FutureBlock {
            timestamp: header.timestamp,
            now,
            tolerance: params.allowed_future_secs,
        });
    }
    Ok(())
}

/// Gas used must fit the limit, and the limit must fit the protocol bounds.
pub fn validate_gas(header: &BlockHeader, params: &ChainParams) -> Result<(), RuleError> {
    if header.gas_used > header.gas_limit {
        return Err(RuleError::GasUsedExceedsLimit {
            gas_used: header.gas_used,
            gas_limit: header.gas_limit,
        });
    }
    if header.gas_limit < params.min_gas_limit || header.gas_limit > MAX_GAS_LIMIT {
        return Err(RuleError::GasLimitOutOfBounds {
            gas_limit: header.gas_limit,
            min: params.min_gas_limit,
            max: MAX_GAS_LIMIT,
        });
    }
    Ok(())
}

/// The gas limit may drift from the parent's by at most
/// `parent_limit / gas_limit_bound_divisor`. At the base-fee fork block the
/// parent limit is scaled by the elasticity multiplier before comparing.
pub fn validate_gas_limit_delta(
    header: &BlockHeader,
    parent: &BlockHeader,
    params: &ChainParams,
) -> Result<(), RuleError> {
    let mut parent_limit = parent.gas_limit;
    if params.base_fee_transition_at(header.number) {
        parent_limit = parent_limit.saturating_mul(params.elasticity_multiplier);
    }
    let max_delta = parent_limit / params.gas_limit_bound_divisor;
    let delta = header.gas_limit.abs_diff(parent_limit);
    if delta >= max_delta {
        return Err(RuleError::GasLimitDeltaTooLarge {
            gas_limit: header.gas_limit,
            parent: parent_limit,
            delta,
            max_delta,
        });
    }
    Ok(())
}

/// Base fee the header at `parent.number + 1` must declare, or `None`
/// before the fork.
pub fn expected_base_fee(parent: &BlockHeader, params: &ChainParams) -> Result<Option<u64>, RuleError> {
    let number = parent.number + 1;
    if !params.base_fee_active_at(number) {
        return Ok(None);
    }
    if params.base_fee_transition_at(number) {
        return Ok(Some(INITIAL_BASE_FEE));
    }

    let parent_base_fee = parent.base_fee.ok_or(RuleError::ParentBaseFeeMissing)?;
    let gas_target = parent.gas_limit / params.elasticity_multiplier;

    let expected = match parent.gas_used.cmp(&gas_target) {
        std::cmp::Ordering::Equal => parent_base_fee,
        std::cmp::Ordering::Greater => {
            let delta = (parent_base_fee as u128 * (parent.gas_used - gas_target) as u128
                / gas_target as u128
                / params.base_fee_change_denominator as u128)
                .max(1) as u64;
            parent_base_fee + delta
        }
        std::cmp::Ordering::Less => {
            let delta = (parent_base_fee as u128 * (gas_target - parent.gas_used) as u128
                / gas_target as u128
                / params.base_fee_change_denominator as u128) as u64;
            parent_base_fee.saturating_sub(delta)
        }
    };
    Ok(Some(expected))
}

/// Verify the declared base fee matches the deterministic computation from
/// the parent, and that it is present exactly when the fork is active.
pub fn validate_base_fee(
    header: &BlockHeader,
    parent: &BlockHeader,
    params: &ChainParams,
) -> Result<(), RuleError> {
    match (expected_base_fee(parent, params)?, header.base_fee) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(RuleError::UnexpectedBaseFee),
        (Some(_), None) => Err(RuleError::BaseFeeMissing),
        (Some(expected), Some(got)) if got != expected => {
            Err(RuleError::BaseFeeMismatch { got, expected })
        }
        _ => Ok(()),
    }
}

/// Run every protocol rule for a header against its resolved parent.
/// `now` is the local wall-clock time in Unix seconds.
pub fn validate_header(
    header: &BlockHeader,
    parent: &BlockHeader,
    now: u64,
    params: &ChainParams,
) -> Result<(), RuleError> {
    validate_extra_data(header, params)?;
    validate_number(header, parent)?;
    validate_timestamp(header, parent, now, params)?;
    validate_gas(header, params)?;
    validate_gas_limit_delta(header, parent, params)?;
    validate_base_fee(header, parent, params)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn params() -> ChainParams {
        ChainParams {
            chain_id: 1_337,
            epoch_length: 100,
            base_fee_fork_block: Some(2_000),
            retention: 2_000,
            max_extra_data_len: 32,
            min_gas_limit: 5_000,
            gas_limit_bound_divisor: 1_024,
            elasticity_multiplier: 2,
            base_fee_change_denominator: 8,
            allowed_future_secs: 15,
        }
    }

    fn header_at(number: u64) -> BlockHeader {
        BlockHeader {
            parent_hash: [0x01; 32],
            number,
            author: [0x02; 20],
            state_root: [0x03; 32],
            transactions_root: [0x04; 32],
            receipts_root: [0x05; 32],
            logs_bloom: [0; 256],
            difficulty: U256::from(100u64),
            gas_limit: 8_000_000,
            gas_used: 4_000_000,
            timestamp: 1_600_000_000,
            extra_data: vec![],
            mix_digest: [0; 32],
            nonce: 0,
            base_fee: None,
        }
    }

    fn pair_at(number: u64) -> (BlockHeader, BlockHeader) {
        let parent = header_at(number - 1);
        let mut header = header_at(number);
        header.parent_hash = parent.hash();
        header.timestamp = parent.timestamp + 13;
        (parent, header)
    }

    const NOW: u64 = 1_600_001_000;

    #[test]
    fn test_valid_pre_fork_header() {
        let (parent, header) = pair_at(100);
        assert_eq!(validate_header(&header, &parent, NOW, &params()), Ok(()));
    }

    #[test]
    fn test_extra_data_bound() {
        let (parent, mut header) = pair_at(100);
        header.extra_data = vec![0; 33];
        assert_eq!(
            validate_header(&header, &parent, NOW, &params()),
            Err(RuleError::ExtraDataTooLong { len: 33, max: 32 })
        );
    }

    #[test]
    fn test_number_sequence() {
        let (parent, mut header) = pair_at(100);
        header.number = 102;
        assert!(matches!(
            validate_number(&header, &parent),
            Err(RuleError::NonSequentialNumber { number: 102, parent: 99 })
        ));
    }

    #[test]
    fn test_timestamp_must_increase() {
        let (parent, mut header) = pair_at(100);
        header.timestamp = parent.timestamp;
        assert!(matches!(
            validate_timestamp(&header, &parent, NOW, &params()),
            Err(RuleError::OlderThanParent { .. })
        ));
    }

    #[test]
    fn test_future_block_tolerance() {
        let (parent, mut header) = pair_at(100);
        header.timestamp = NOW + 15;
        assert_eq!(validate_timestamp(&header, &parent, NOW, &params()), Ok(()));
        header.timestamp = NOW + 16;
        assert!(matches!(
            validate_timestamp(&header, &parent, NOW, &params()),
            Err(RuleError::FutureBlock { .. })
        ));
    }

    #[test]
    fn test_gas_bounds() {
        let (_, mut header) = pair_at(100);
        header.gas_used = header.gas_limit + 1;
        assert!(matches!(
            validate_gas(&header, &params()),
            Err(RuleError::GasUsedExceedsLimit { .. })
        ));

        let (_, mut header) = pair_at(100);
        header.gas_limit = 4_999;
        header.gas_used = 0;
        assert!(matches!(
            validate_gas(&header, &params()),
            Err(RuleError::GasLimitOutOfBounds { .. })
        ));

        let (_, mut header) = pair_at(100);
        header.gas_limit = MAX_GAS_LIMIT + 1;
        assert!(matches!(
            validate_gas(&header, &params()),
            Err(RuleError::GasLimitOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_gas_limit_delta() {
        let (parent, mut header) = pair_at(100);
        // Parent limit 8_000_000, divisor 1024: max delta 7812.
        header.gas_limit = parent.gas_limit + 7_811;
        assert_eq!(validate_gas_limit_delta(&header, &parent, &params()), Ok(()));
        header.gas_limit = parent.gas_limit + 7_812;
        assert!(matches!(
            validate_gas_limit_delta(&header, &parent, &params()),
            Err(RuleError::GasLimitDeltaTooLarge { .. })
        ));
    }

    #[test]
    fn test_gas_limit_elasticity_at_fork() {
        let (parent, mut header) = pair_at(2_000);
        // At the fork block the limit may double against the scaled parent.
        header.gas_limit = parent.gas_limit * 2;
        header.base_fee = Some(INITIAL_BASE_FEE);
        assert_eq!(validate_gas_limit_delta(&header, &parent, &params()), Ok(()));
    }

    #[test]
    fn test_base_fee_absent_pre_fork() {
        let (parent, mut header) = pair_at(100);
        header.base_fee = Some(1);
        assert_eq!(
            validate_base_fee(&header, &parent, &params()),
            Err(RuleError::UnexpectedBaseFee)
        );
    }

    #[test]
    fn test_base_fee_required_at_fork() {
        let (parent, mut header) = pair_at(2_000);
        assert_eq!(
            validate_base_fee(&header, &parent, &params()),
            Err(RuleError::BaseFeeMissing)
        );
        header.base_fee = Some(INITIAL_BASE_FEE);
        assert_eq!(validate_base_fee(&header, &parent, &params()), Ok(()));
    }

    #[test]
    fn test_base_fee_unchanged_at_target() {
        let (mut parent, mut header) = pair_at(2_001);
        parent.base_fee = Some(1_000_000_000);
        parent.gas_used = parent.gas_limit / 2; // exactly the target
        header.base_fee = Some(1_000_000_000);
        assert_eq!(validate_base_fee(&header, &parent, &params()), Ok(()));
    }

    #[test]
    fn test_base_fee_increases_above_target() {
        let (mut parent, mut header) = pair_at(2_001);
        parent.base_fee = Some(1_000_000_000);
        parent.gas_used = parent.gas_limit; // double the target
        // delta = base * target / target / 8 = base / 8
        header.base_fee = Some(1_125_000_000);
        assert_eq!(validate_base_fee(&header, &parent, &params()), Ok(()));
        header.base_fee = Some(1_125_000_001);
        assert!(matches!(
            validate_base_fee(&header, &parent, &params()),
            Err(RuleError::BaseFeeMismatch { .. })
        ));
    }

    #[test]
    fn test_base_fee_decreases_below_target() {
        let (mut parent, mut header) = pair_at(2_001);
        parent.base_fee = Some(1_000_000_000);
        parent.gas_used = 0;
        // Empty parent: full downward step of base / 8.
        header.base_fee = Some(875_000_000);
        assert_eq!(validate_base_fee(&header, &parent, &params()), Ok(()));
    }

    #[test]
    fn test_base_fee_increase_is_at_least_one() {
        let (mut parent, mut header) = pair_at(2_001);
        parent.base_fee = Some(1);
        parent.gas_used = parent.gas_limit / 2 + 1;
        header.base_fee = Some(2);
        assert_eq!(validate_base_fee(&header, &parent, &params()), Ok(()));
    }

    #[test]
    fn test_base_fee_floor_is_zero() {
        let (mut parent, mut header) = pair_at(2_001);
        parent.base_fee = Some(0);
        parent.gas_used = 0;
        header.base_fee = Some(0);
        assert_eq!(validate_base_fee(&header, &parent, &params()), Ok(()));
    }
}
