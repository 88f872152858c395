// src/types.rs

use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type BeaconId = H256;
pub type BeaconSetId = H256;
pub type TemplateId = H256;
pub type EndpointId = H256;

/// Signed beacon observation, normalized from either gateway response format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedData {
    /// Unix seconds, kept as the decimal string the airnode signed
    pub timestamp: String,
    /// ABI-encoded `int256`
    pub encoded_value: Bytes,
    pub signature: Bytes,
}

impl SignedData {
    pub fn timestamp_secs(&self) -> Option<u64> {
        self.timestamp.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Beacon {
    pub airnode: Address,
    pub template_id: TemplateId,
}

impl Beacon {
    pub fn id(&self) -> BeaconId {
        derive_beacon_id(self.airnode, self.template_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Template {
    pub endpoint_id: EndpointId,
    pub parameters: Bytes,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Gateway {
    pub api_key: String,
    pub url: String,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BeaconTrigger {
    pub beacon_id: BeaconId,
    /// Percentage, e.g. `0.5` for half a percent
    pub deviation_threshold: Decimal,
    /// Seconds
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BeaconSetTrigger {
    pub beacon_set_id: BeaconSetId,
    pub deviation_threshold: Decimal,
    pub heartbeat_interval: u64,
}

/// Deviation and heartbeat parameters shared by both trigger kinds.
pub trait UpdateTrigger {
    fn deviation_threshold(&self) -> Decimal;
    fn heartbeat_interval(&self) -> u64;
}

impl UpdateTrigger for BeaconTrigger {
    fn deviation_threshold(&self) -> Decimal {
        self.deviation_threshold
    }
    fn heartbeat_interval(&self) -> u64 {
        self.heartbeat_interval
    }
}

impl UpdateTrigger for BeaconSetTrigger {
    fn deviation_threshold(&self) -> Decimal {
        self.deviation_threshold
    }
    fn heartbeat_interval(&self) -> u64 {
        self.heartbeat_interval
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFeedType {
    Beacon,
    BeaconSet,
}

impl DataFeedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFeedType::Beacon => "Beacon",
            DataFeedType::BeaconSet => "BeaconSet",
        }
    }
}

impl fmt::Display for DataFeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `keccak256(abi.encodePacked(airnode, templateId))`
pub fn derive_beacon_id(airnode: Address, template_id: TemplateId) -> BeaconId {
    H256(keccak256([airnode.as_bytes(), template_id.as_bytes()].concat()))
}

/// `keccak256(abi.encode(beaconIds))`
pub fn derive_beacon_set_id(beacon_ids: &[BeaconId]) -> BeaconSetId {
    let tokens = beacon_ids
        .iter()
        .map(|id| Token::FixedBytes(id.as_bytes().to_vec()))
        .collect();
    H256(keccak256(ethers::abi::encode(&[Token::Array(tokens)])))
}

/// `keccak256(abi.encode(oisTitle, endpointName))`
pub fn derive_endpoint_id(ois_title: &str, endpoint_name: &str) -> EndpointId {
    H256(keccak256(ethers::abi::encode(&[
        Token::String(ois_title.to_string()),
        Token::String(endpoint_name.to_string()),
    ])))
}

/// `0x1234...abcd`, for log prefixes.
pub fn shorten_address(address: &Address) -> String {
    let full = format!("{:?}", address);
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}
