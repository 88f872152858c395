// src/beacon_fetcher.rs

use crate::engine::EngineError;
use crate::gateway::{fetch_signed_data, GatewayError, SignedDataTransport};
use crate::metrics;
use crate::settings::Settings;
use crate::state::CycleState;
use crate::types::BeaconId;
use ethers::types::Address;
use futures::future::join_all;
use indexmap::IndexSet;
use log::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("beacon {0:?} is not configured")]
    UnknownBeacon(BeaconId),
    #[error("template of beacon {0:?} is not configured")]
    UnknownTemplate(BeaconId),
    #[error("airnode {0:?} has no gateways")]
    NoGateways(Address),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub requested: usize,
    pub fetched: usize,
}

/// Every beacon some trigger depends on, directly or as a beacon set member,
/// deduplicated in first-seen order.
pub fn beacon_ids_to_fetch(settings: &Settings) -> IndexSet<BeaconId> {
    settings
        .triggers
        .data_feed_updates
        .values()
        .flat_map(|sponsors| sponsors.values())
        .flat_map(|update| {
            let direct = update.beacons.iter().map(|trigger| trigger.beacon_id);
            let members = update.beacon_sets.iter().flat_map(|trigger| {
                settings
                    .beacon_set(&trigger.beacon_set_id)
                    .unwrap_or(&[])
                    .iter()
                    .copied()
            });
            direct.chain(members).collect::<Vec<_>>()
        })
        .collect()
}

/// Fetches signed data for one beacon and stores it in the cycle cache.
pub async fn fetch_beacon_data(
    state: &CycleState,
    transport: &dyn SignedDataTransport,
    beacon_id: BeaconId,
) -> Result<(), FetchError> {
    let prefix = format!("[cycle {}] [beacon {:?}]", state.log_id(), beacon_id);
    debug!("{} Fetching beacon data", prefix);

    let beacon = state
        .settings
        .beacon(&beacon_id)
        .ok_or(FetchError::UnknownBeacon(beacon_id))?;
    let template = state
        .settings
        .template(&beacon.template_id)
        .ok_or(FetchError::UnknownTemplate(beacon_id))?;
    let gateways = state.gateways_for(&beacon.airnode);
    if gateways.is_empty() {
        return Err(FetchError::NoGateways(beacon.airnode));
    }

    // gateway requests are throttled per gateway only
    let signed_data = fetch_signed_data(transport, gateways, template).await?;

    debug!("{} Fetched signed data with timestamp {}", prefix, signed_data.timestamp);
    state.beacon_values.insert(beacon_id, signed_data);
    Ok(())
}

/// Fetches every beacon the configured triggers need, concurrently.
///
/// Individual failures are logged and leave the beacon without a fresh value;
/// only a configuration with nothing to fetch stops the cycle.
pub async fn initiate_fetching_beacon_data(
    state: &CycleState,
    transport: &dyn SignedDataTransport,
) -> Result<FetchSummary, EngineError> {
    info!("[cycle {}] Initiating fetching all beacon data", state.log_id());
    let beacon_ids = beacon_ids_to_fetch(&state.settings);
    if beacon_ids.is_empty() {
        warn!("[cycle {}] No beacons to fetch data for found. Stopping.", state.log_id());
        return Err(EngineError::NoBeaconsToFetch);
    }

    let results = join_all(
        beacon_ids
            .iter()
            .map(|beacon_id| fetch_beacon_data(state, transport, *beacon_id)),
    )
    .await;

    let mut fetched = 0;
    for (beacon_id, result) in beacon_ids.iter().zip(results) {
        match result {
            Ok(()) => {
                fetched += 1;
                metrics::increment_beacon_fetch("fetched");
            }
            Err(e) => {
                metrics::increment_beacon_fetch("failed");
                warn!(
                    "[cycle {}] Failed to fetch data for beacon {:?}. Error: {}",
                    state.log_id(),
                    beacon_id,
                    e
                );
            }
        }
    }

    info!(
        "[cycle {}] Fetched signed data for {}/{} beacons",
        state.log_id(),
        fetched,
        beacon_ids.len()
    );
    Ok(FetchSummary {
        requested: beacon_ids.len(),
        fetched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{LimiterConfig, Ois, OisEndpoint};
    use crate::types::{derive_beacon_id, derive_beacon_set_id, derive_endpoint_id};
    use anyhow::Result;
    use async_trait::async_trait;
    use ethers::types::{Bytes, H256};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CHAIN: &str = "31337";

    struct EchoTransport {
        failing_url: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SignedDataTransport for EchoTransport {
        async fn post_signed_data(&self, url: &str, _api_key: &str, _encoded_parameters: &Bytes) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_url.as_deref().map_or(false, |failing| url.starts_with(failing)) {
                anyhow::bail!("gateway down");
            }
            Ok(json!({
                "data": { "timestamp": "1700000000", "encodedValue": "0x00" },
                "signature": "0x01"
            }))
        }
    }

    fn transport(failing_url: Option<&str>) -> EchoTransport {
        EchoTransport {
            failing_url: failing_url.map(str::to_string),
            calls: AtomicUsize::new(0),
        }
    }

    /// Three beacons on two airnodes: `b1` and `b2` triggered directly, and a set of `b2` and `b3`.
    fn settings() -> (Settings, [BeaconId; 3]) {
        let airnode_a = Address::repeat_byte(0xa1);
        let airnode_b = Address::repeat_byte(0xb2);
        let templates = [H256::repeat_byte(1), H256::repeat_byte(2), H256::repeat_byte(3)];
        let b1 = derive_beacon_id(airnode_a, templates[0]);
        let b2 = derive_beacon_id(airnode_a, templates[1]);
        let b3 = derive_beacon_id(airnode_b, templates[2]);
        let set = derive_beacon_set_id(&[b2, b3]);
        let endpoint = derive_endpoint_id("Prices", "spot");
        let raw = json!({
            "chains": { CHAIN: { "contracts": { "api3_server_v1": format!("{:?}", Address::repeat_byte(0x5e)) } } },
            "beacons": {
                format!("{:?}", b1): { "airnode": format!("{:?}", airnode_a), "template_id": format!("{:?}", templates[0]) },
                format!("{:?}", b2): { "airnode": format!("{:?}", airnode_a), "template_id": format!("{:?}", templates[1]) },
                format!("{:?}", b3): { "airnode": format!("{:?}", airnode_b), "template_id": format!("{:?}", templates[2]) }
            },
            "beacon_sets": { format!("{:?}", set): [format!("{:?}", b2), format!("{:?}", b3)] },
            "templates": {
                format!("{:?}", templates[0]): { "endpoint_id": format!("{:?}", endpoint), "parameters": "0x" },
                format!("{:?}", templates[1]): { "endpoint_id": format!("{:?}", endpoint), "parameters": "0x" },
                format!("{:?}", templates[2]): { "endpoint_id": format!("{:?}", endpoint), "parameters": "0x" }
            },
            "gateways": {
                format!("{:?}", airnode_a): [{ "api_key": "k", "url": "https://a.example" }],
                format!("{:?}", airnode_b): [{ "api_key": "k", "url": "https://b.example" }]
            },
            "triggers": { "data_feed_updates": { CHAIN: {
                format!("{:?}", Address::repeat_byte(0x5b)): {
                    "update_interval": 30,
                    "beacons": [
                        { "beacon_id": format!("{:?}", b1), "deviation_threshold": "1", "heartbeat_interval": 60 },
                        { "beacon_id": format!("{:?}", b2), "deviation_threshold": "1", "heartbeat_interval": 60 }
                    ],
                    "beacon_sets": [
                        { "beacon_set_id": format!("{:?}", set), "deviation_threshold": "1", "heartbeat_interval": 60 }
                    ]
                }
            } } }
        });
        (Settings::from_json_str(&raw.to_string()).unwrap(), [b1, b2, b3])
    }

    #[test]
    fn collects_unique_beacons_in_order() {
        let (settings, [b1, b2, b3]) = settings();
        let ids: Vec<_> = beacon_ids_to_fetch(&settings).into_iter().collect();
        assert_eq!(ids, vec![b1, b2, b3]);
    }

    #[tokio::test]
    async fn stores_fetched_values_and_tolerates_failures() {
        let (mut settings, [b1, b2, b3]) = settings();
        settings.ois = vec![Ois {
            title: "Prices".to_string(),
            endpoints: vec![OisEndpoint { name: "spot".to_string() }],
        }];
        let state = CycleState::initialize(Arc::new(settings));
        assert_eq!(state.api_limiters.len(), 3);

        let transport = transport(Some("https://b.example"));
        let summary = initiate_fetching_beacon_data(&state, &transport).await.unwrap();

        assert_eq!(summary, FetchSummary { requested: 3, fetched: 2 });
        assert!(state.beacon_values.get(&b1).is_some());
        assert!(state.beacon_values.get(&b2).is_some());
        assert!(state.beacon_values.get(&b3).is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    /// Counts how many requests are in flight at once.
    struct SlowTransport {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SignedDataTransport for SlowTransport {
        async fn post_signed_data(&self, _url: &str, _api_key: &str, _encoded_parameters: &Bytes) -> Result<Value> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({
                "data": { "timestamp": "1700000000", "encodedValue": "0x00" },
                "signature": "0x01"
            }))
        }
    }

    #[tokio::test]
    async fn api_limiter_does_not_throttle_gateway_requests() {
        let (mut settings, _) = settings();
        settings.ois = vec![Ois {
            title: "Prices".to_string(),
            endpoints: vec![OisEndpoint { name: "spot".to_string() }],
        }];
        settings.rate_limiting.overrides.direct_gateways.insert(
            "Prices".to_string(),
            LimiterConfig {
                max_concurrent: Some(1),
                min_time: Some(0),
            },
        );
        settings.rate_limiting.max_gateway_concurrency = Some(10);
        settings.rate_limiting.min_gateway_time = Some(0);
        let state = CycleState::initialize(Arc::new(settings));
        assert_eq!(state.api_limiters.values().next().map(|l| l.max_concurrent()), Some(1));

        let transport = SlowTransport {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let summary = initiate_fetching_beacon_data(&state, &transport).await.unwrap();

        assert_eq!(summary.fetched, 3);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_when_nothing_is_triggered() {
        let (mut settings, _) = settings();
        settings.triggers.data_feed_updates.clear();
        let state = CycleState::initialize(Arc::new(settings));
        let result = initiate_fetching_beacon_data(&state, &transport(None)).await;
        assert!(matches!(result, Err(EngineError::NoBeaconsToFetch)));
    }

    #[tokio::test]
    async fn airnode_without_gateways_is_reported() {
        let (mut settings, [b1, ..]) = settings();
        settings.gateways.clear();
        let state = CycleState::initialize(Arc::new(settings));
        let err = fetch_beacon_data(&state, &transport(None), b1).await.unwrap_err();
        assert!(matches!(err, FetchError::NoGateways(_)));
    }
}
