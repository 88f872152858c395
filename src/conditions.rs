// src/conditions.rs

use crate::calculations::calculate_update_in_percentage;
use crate::constants::HUNDRED_PERCENT;
use crate::types::UpdateTrigger;
use ethers::types::{I256, U256};
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Deviation threshold in percent converted to the `HUNDRED_PERCENT` scale, truncated.
pub fn scaled_deviation_threshold(deviation_threshold: Decimal) -> U256 {
    let scaled = (deviation_threshold * Decimal::from(HUNDRED_PERCENT) / Decimal::from(100u8)).trunc();
    scaled.to_u128().map(U256::from).unwrap_or(U256::zero())
}

pub fn is_fulfillment_newer(on_chain_timestamp: u64, candidate_timestamp: u64) -> bool {
    candidate_timestamp > on_chain_timestamp
}

/// On-chain data is stale once it is older than `now - heartbeat_interval`.
pub fn is_heartbeat_due(on_chain_timestamp: u64, heartbeat_interval: u64, now: u64) -> bool {
    on_chain_timestamp < now.saturating_sub(heartbeat_interval)
}

pub fn exceeds_deviation_threshold(on_chain_value: I256, deviation_threshold: Decimal, candidate_value: I256) -> bool {
    calculate_update_in_percentage(on_chain_value, candidate_value) >= scaled_deviation_threshold(deviation_threshold)
}

/// Decides whether `candidate_*` may overwrite the on-chain reading.
///
/// 1. A candidate that is not strictly newer is always rejected.
/// 2. Stale on-chain data (past its heartbeat) is always refreshed.
/// 3. Otherwise the relative change must reach the trigger's deviation threshold.
pub fn check_conditions<T: UpdateTrigger>(
    on_chain_value: I256,
    on_chain_timestamp: u64,
    candidate_timestamp: u64,
    trigger: &T,
    candidate_value: I256,
    now: u64,
) -> bool {
    if !is_fulfillment_newer(on_chain_timestamp, candidate_timestamp) {
        debug!(
            "Fulfillment data older than on-chain data (candidate {} <= on-chain {}). Skipping.",
            candidate_timestamp, on_chain_timestamp
        );
        return false;
    }

    if is_heartbeat_due(on_chain_timestamp, trigger.heartbeat_interval(), now) {
        debug!("On-chain data timestamp older than heartbeat. Updating without condition check.");
        return true;
    }

    if !exceeds_deviation_threshold(on_chain_value, trigger.deviation_threshold(), candidate_value) {
        debug!("Deviation threshold not reached. Skipping.");
        return false;
    }

    true
}
