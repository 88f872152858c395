// src/constants.rs

use ethers::types::{I256, U256};
use std::time::Duration;

/// Fixed-point representation of 100% used by deviation calculations.
pub const HUNDRED_PERCENT: u64 = 100_000_000;

/// Number of `dataFeeds` reads packed into one `tryMulticall`.
pub const DATAFEED_READ_BATCH_SIZE: usize = 100;
/// Number of update instructions emitted per write batch.
pub const DATAFEED_UPDATE_BATCH_SIZE: usize = 10;

pub const GATEWAY_TIMEOUT_MS: u64 = 5_000;
pub const GATEWAY_MAX_CONCURRENCY_DEFAULT: usize = 10;
pub const GATEWAY_MIN_TIME_DEFAULT_MS: u64 = 20;
pub const DIRECT_GATEWAY_MAX_CONCURRENCY_DEFAULT: usize = 10;
pub const DIRECT_GATEWAY_MIN_TIME_DEFAULT_MS: u64 = 20;

/// Chain calls are retried this many times before the batch is given up on.
pub const CHAIN_CALL_RETRIES: usize = 2;
pub const CHAIN_CALL_ATTEMPT_TIMEOUT_MS: u64 = 5_000;
pub const RANDOM_BACKOFF_MAX_MS: u64 = 2_500;
/// Kept free at the end of every update interval so the cycle finishes in time.
pub const TOTAL_TIMEOUT_HEADROOM_DEFAULT_MS: u64 = 1_000;

pub const NO_FETCH_EXIT_CODE: i32 = 1;
pub const NO_DATA_FEEDS_EXIT_CODE: i32 = 2;

pub fn gateway_timeout() -> Duration {
    Duration::from_millis(GATEWAY_TIMEOUT_MS)
}

/// Largest value representable by the contract's `int224` storage.
pub fn int224_max() -> I256 {
    I256::from_raw((U256::one() << 223) - U256::one())
}

/// Smallest value representable by the contract's `int224` storage.
pub fn int224_min() -> I256 {
    -I256::from_raw(U256::one() << 223)
}
