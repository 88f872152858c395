// Contracts Module - Api3ServerV1 surface used by the update engine

pub mod api3_server_v1;

pub use api3_server_v1::{
    Api3ServerV1, DataFeedsCall, ReadDataFeedWithIdCall, TryMulticallCall,
    UpdateBeaconSetWithBeaconsCall, UpdateBeaconWithSignedDataCall,
};

use crate::types::{Beacon, BeaconId, BeaconSetId, SignedData};
use ethers::abi::{AbiEncode, ParamType, Token};
use ethers::types::{Bytes, I256, U256};

pub fn encode_data_feeds(data_feed_id: BeaconSetId) -> Bytes {
    DataFeedsCall {
        data_feed_id: data_feed_id.0,
    }
    .encode()
    .into()
}

pub fn encode_read_data_feed_with_id(data_feed_id: BeaconId) -> Bytes {
    ReadDataFeedWithIdCall {
        data_feed_id: data_feed_id.0,
    }
    .encode()
    .into()
}

/// Fails only when the signed timestamp is not a decimal integer.
pub fn encode_update_beacon_with_signed_data(
    beacon: &Beacon,
    signed_data: &SignedData,
) -> anyhow::Result<Bytes> {
    let timestamp = U256::from_dec_str(&signed_data.timestamp).map_err(|e| {
        anyhow::anyhow!("invalid signed data timestamp {:?}: {}", signed_data.timestamp, e)
    })?;
    Ok(UpdateBeaconWithSignedDataCall {
        airnode: beacon.airnode,
        template_id: beacon.template_id.0,
        timestamp,
        data: signed_data.encoded_value.clone(),
        signature: signed_data.signature.clone(),
    }
    .encode()
    .into())
}

pub fn encode_update_beacon_set_with_beacons(beacon_ids: &[BeaconId]) -> Bytes {
    UpdateBeaconSetWithBeaconsCall {
        beacon_ids: beacon_ids.iter().map(|id| id.0).collect(),
    }
    .encode()
    .into()
}

pub fn encode_try_multicall(calldatas: Vec<Bytes>) -> Bytes {
    TryMulticallCall { data: calldatas }.encode().into()
}

/// Decodes the `(int224 value, uint32 timestamp)` returned by `dataFeeds` and
/// `readDataFeedWithId`.
pub fn decode_data_feed_reading(returndata: &Bytes) -> Option<(I256, u64)> {
    let mut tokens = ethers::abi::decode(&[ParamType::Int(224), ParamType::Uint(32)], returndata)
        .ok()?
        .into_iter();
    let value = match tokens.next()? {
        Token::Int(raw) => I256::from_raw(raw),
        _ => return None,
    };
    let timestamp = match tokens.next()? {
        Token::Uint(raw) => raw.low_u64(),
        _ => return None,
    };
    Some((value, timestamp))
}
