// src/calculations.rs

use crate::constants::{int224_max, int224_min, HUNDRED_PERCENT};
use ethers::abi::{ParamType, Token};
use ethers::types::{Bytes, I256, U256};

/// Decodes an ABI `int256` beacon value, rejecting anything outside `int224`.
///
/// Mirrors the range check `DataFeedServer` performs before storing a value, so
/// anything rejected here would revert on-chain anyway.
pub fn decode_beacon_value(encoded_value: &Bytes) -> Option<I256> {
    let token = ethers::abi::decode(&[ParamType::Int(256)], encoded_value)
        .ok()?
        .into_iter()
        .next()?;
    let value = match token {
        Token::Int(raw) => I256::from_raw(raw),
        _ => return None,
    };
    if value > int224_max() || value < int224_min() {
        return None;
    }
    Some(value)
}

/// Median of `values`, `None` when empty.
///
/// Even-length inputs average the two middle elements and truncate toward zero,
/// which is how the contract's signed integer division rounds.
pub fn median(values: &[I256]) -> Option<I256> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / I256::from(2i64))
    }
}

/// Median of unix timestamps, same rounding as [`median`].
pub fn median_timestamp(timestamps: &[u64]) -> Option<u64> {
    if timestamps.is_empty() {
        return None;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        return Some(sorted[mid]);
    }
    // u128 so two large timestamps cannot overflow
    let sum = u128::from(sorted[mid - 1]) + u128::from(sorted[mid]);
    u64::try_from(sum / 2).ok()
}

/// Relative change from `initial` to `updated`, scaled so `HUNDRED_PERCENT` is 100%.
///
/// A zero `initial` counts any nonzero `updated` as a 100% change.
pub fn calculate_update_in_percentage(initial: I256, updated: I256) -> U256 {
    if initial.is_zero() {
        return if updated.is_zero() {
            U256::zero()
        } else {
            U256::from(HUNDRED_PERCENT)
        };
    }
    let absolute_delta = (updated - initial).unsigned_abs();
    absolute_delta * U256::from(HUNDRED_PERCENT) / initial.unsigned_abs()
}
