use crate::types::{
    derive_beacon_id, derive_beacon_set_id, Beacon, BeaconId, BeaconSetId, BeaconSetTrigger,
    BeaconTrigger, Gateway, Template, TemplateId,
};
use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ChainContracts {
    pub api3_server_v1: Address,
}

/// RPC endpoint the binary connects to; the library receives connected readers instead.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ChainProviderConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Chain {
    pub contracts: ChainContracts,
    #[serde(default)]
    pub providers: Vec<ChainProviderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OisEndpoint {
    pub name: String,
}

/// API specification served directly (without a signed data gateway).
#[derive(Debug, Deserialize, Clone)]
pub struct Ois {
    pub title: String,
    #[serde(default)]
    pub endpoints: Vec<OisEndpoint>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterConfig {
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// Minimum milliseconds between two request starts
    #[serde(default)]
    pub min_time: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RateLimitingOverrides {
    /// Keyed by airnode address
    #[serde(default)]
    pub signed_data_gateways: HashMap<Address, LimiterConfig>,
    /// Keyed by OIS title, matched ignoring ASCII case
    #[serde(default)]
    pub direct_gateways: HashMap<String, LimiterConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RateLimiting {
    #[serde(default)]
    pub max_gateway_concurrency: Option<usize>,
    #[serde(default)]
    pub min_gateway_time: Option<u64>,
    #[serde(default)]
    pub overrides: RateLimitingOverrides,
}

impl RateLimiting {
    pub fn signed_data_gateway_override(&self, airnode: &Address) -> Option<&LimiterConfig> {
        self.overrides.signed_data_gateways.get(airnode)
    }

    pub fn direct_gateway_override(&self, ois_title: &str) -> Option<&LimiterConfig> {
        self.overrides
            .direct_gateways
            .iter()
            .find(|(title, _)| title.eq_ignore_ascii_case(ois_title))
            .map(|(_, limiter)| limiter)
    }
}

/// Data feeds one sponsor pays for on one chain.
#[derive(Debug, Deserialize, Clone)]
pub struct DataFeedUpdate {
    /// Seconds every update cycle for this sponsor has to finish in
    pub update_interval: u64,
    #[serde(default)]
    pub beacons: Vec<BeaconTrigger>,
    #[serde(default)]
    pub beacon_sets: Vec<BeaconSetTrigger>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Triggers {
    /// chain id -> sponsor address -> data feeds
    #[serde(default)]
    pub data_feed_updates: BTreeMap<String, BTreeMap<Address, DataFeedUpdate>>,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("chain {0} has no Api3ServerV1 contract configured")]
    MissingChain(String),
    #[error("beacon {0:?} is not configured")]
    UnknownBeacon(BeaconId),
    #[error("beacon set {0:?} is not configured")]
    UnknownBeaconSet(BeaconSetId),
    #[error("template {template_id:?} of beacon {beacon_id:?} is not configured")]
    UnknownTemplate {
        beacon_id: BeaconId,
        template_id: TemplateId,
    },
    #[error("beacon id {configured:?} does not match derived id {derived:?}")]
    BeaconIdMismatch {
        configured: BeaconId,
        derived: BeaconId,
    },
    #[error("beacon set id {configured:?} does not match derived id {derived:?}")]
    BeaconSetIdMismatch {
        configured: BeaconSetId,
        derived: BeaconSetId,
    },
}

/// Airseeker configuration, deserialized once per process and shared read-only
/// by every update cycle.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Keyed by chain id
    pub chains: HashMap<String, Chain>,
    #[serde(default)]
    pub beacons: HashMap<BeaconId, Beacon>,
    #[serde(default)]
    pub beacon_sets: HashMap<BeaconSetId, Vec<BeaconId>>,
    #[serde(default)]
    pub templates: HashMap<TemplateId, Template>,
    /// Keyed by airnode address
    #[serde(default)]
    pub gateways: HashMap<Address, Vec<Gateway>>,
    #[serde(default)]
    pub ois: Vec<Ois>,
    #[serde(default)]
    pub triggers: Triggers,
    #[serde(default)]
    pub rate_limiting: RateLimiting,
}

impl Settings {
    /// Loads `Config.toml` from the working directory.
    pub fn new() -> Result<Self, SettingsError> {
        Self::load("Config.toml")
    }

    /// Loads any format the `config` crate recognises by extension, then applies env overrides.
    pub fn load(path: &str) -> Result<Self, SettingsError> {
        let s = Config::builder().add_source(File::with_name(path)).build()?;
        let mut settings: Self = s.try_deserialize()?;
        settings.apply_overrides(|key| env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup("AIRSEEKER_GATEWAY_API_KEY").filter(|k| !k.trim().is_empty()) {
            for gateway in self.gateways.values_mut().flatten() {
                gateway.api_key = api_key.trim().to_string();
            }
        }
        if let Some(raw) = lookup("AIRSEEKER_MAX_GATEWAY_CONCURRENCY") {
            match raw.trim().parse() {
                Ok(value) => self.rate_limiting.max_gateway_concurrency = Some(value),
                Err(e) => log::warn!("Ignoring AIRSEEKER_MAX_GATEWAY_CONCURRENCY={}: {}", raw, e),
            }
        }
        if let Some(raw) = lookup("AIRSEEKER_MIN_GATEWAY_TIME_MS") {
            match raw.trim().parse() {
                Ok(value) => self.rate_limiting.min_gateway_time = Some(value),
                Err(e) => log::warn!("Ignoring AIRSEEKER_MIN_GATEWAY_TIME_MS={}: {}", raw, e),
            }
        }
        // AIRSEEKER_CHAIN_<ID>_RPC_URLS replaces the configured providers of that chain
        for (chain_id, chain) in self.chains.iter_mut() {
            if let Some(raw) = lookup(&format!("AIRSEEKER_CHAIN_{}_RPC_URLS", chain_id)) {
                let urls = parse_string_list(&raw);
                if !urls.is_empty() {
                    chain.providers = urls
                        .into_iter()
                        .enumerate()
                        .map(|(i, url)| ChainProviderConfig {
                            name: format!("env-{}", i),
                            url,
                        })
                        .collect();
                }
            }
        }
    }

    /// Checks that every reference in the trigger tree resolves.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (beacon_id, beacon) in &self.beacons {
            let derived = derive_beacon_id(beacon.airnode, beacon.template_id);
            if derived != *beacon_id {
                return Err(SettingsError::BeaconIdMismatch {
                    configured: *beacon_id,
                    derived,
                });
            }
            if !self.templates.contains_key(&beacon.template_id) {
                return Err(SettingsError::UnknownTemplate {
                    beacon_id: *beacon_id,
                    template_id: beacon.template_id,
                });
            }
        }
        for (beacon_set_id, members) in &self.beacon_sets {
            let derived = derive_beacon_set_id(members);
            if derived != *beacon_set_id {
                return Err(SettingsError::BeaconSetIdMismatch {
                    configured: *beacon_set_id,
                    derived,
                });
            }
            if let Some(missing) = members.iter().find(|id| !self.beacons.contains_key(id)) {
                return Err(SettingsError::UnknownBeacon(*missing));
            }
        }
        for (chain_id, sponsors) in &self.triggers.data_feed_updates {
            if !self.chains.contains_key(chain_id) {
                return Err(SettingsError::MissingChain(chain_id.clone()));
            }
            for update in sponsors.values() {
                if let Some(trigger) = update
                    .beacons
                    .iter()
                    .find(|t| !self.beacons.contains_key(&t.beacon_id))
                {
                    return Err(SettingsError::UnknownBeacon(trigger.beacon_id));
                }
                if let Some(trigger) = update
                    .beacon_sets
                    .iter()
                    .find(|t| !self.beacon_sets.contains_key(&t.beacon_set_id))
                {
                    return Err(SettingsError::UnknownBeaconSet(trigger.beacon_set_id));
                }
            }
        }
        Ok(())
    }

    pub fn beacon(&self, beacon_id: &BeaconId) -> Option<&Beacon> {
        self.beacons.get(beacon_id)
    }

    pub fn beacon_set(&self, beacon_set_id: &BeaconSetId) -> Option<&[BeaconId]> {
        self.beacon_sets.get(beacon_set_id).map(Vec::as_slice)
    }

    pub fn template(&self, template_id: &TemplateId) -> Option<&Template> {
        self.templates.get(template_id)
    }

    pub fn api3_server_v1(&self, chain_id: &str) -> Option<Address> {
        self.chains.get(chain_id).map(|c| c.contracts.api3_server_v1)
    }
}

fn parse_string_list(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    if trimmed.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
            return list;
        }
    }
    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
