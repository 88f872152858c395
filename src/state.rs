// src/state.rs

use crate::multicall::DataFeedReader;
use crate::rate_limiter::{build_api_limiters, build_gateway_limiters, GatewayWithLimiter, Limiter};
use crate::settings::Settings;
use crate::types::{BeaconId, SignedData, TemplateId};
use dashmap::DashMap;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Latest signed data fetched for each beacon during one cycle.
///
/// Fetch tasks write concurrently, each under its own beacon id.
#[derive(Debug, Default)]
pub struct BeaconValueCache {
    values: DashMap<BeaconId, SignedData>,
}

impl BeaconValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, beacon_id: BeaconId, signed_data: SignedData) {
        self.values.insert(beacon_id, signed_data);
    }

    pub fn get(&self, beacon_id: &BeaconId) -> Option<SignedData> {
        self.values.get(beacon_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything one update cycle reads and writes. Built fresh at the start of
/// every cycle so nothing leaks from one invocation into the next.
#[derive(Debug)]
pub struct CycleState {
    pub cycle_id: Uuid,
    pub settings: Arc<Settings>,
    pub beacon_values: BeaconValueCache,
    /// Keyed by airnode address
    pub gateways_with_limiters: HashMap<Address, Vec<GatewayWithLimiter>>,
    /// Keyed by template id; templates of one OIS share a limiter
    pub api_limiters: HashMap<TemplateId, Arc<Limiter>>,
}

impl CycleState {
    pub fn initialize(settings: Arc<Settings>) -> Self {
        let gateways_with_limiters = build_gateway_limiters(&settings.gateways, &settings.rate_limiting);
        let api_limiters = build_api_limiters(&settings);
        Self {
            cycle_id: Uuid::new_v4(),
            settings,
            beacon_values: BeaconValueCache::new(),
            gateways_with_limiters,
            api_limiters,
        }
    }

    pub fn gateways_for(&self, airnode: &Address) -> &[GatewayWithLimiter] {
        self.gateways_with_limiters
            .get(airnode)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Short id used to tag every log line of this cycle.
    pub fn log_id(&self) -> String {
        self.cycle_id.simple().to_string()[..8].to_string()
    }
}

/// A connected chain provider handed in by the host.
#[derive(Clone)]
pub struct ChainProvider {
    pub chain_id: String,
    pub provider_name: String,
    pub reader: Arc<dyn DataFeedReader>,
}

impl std::fmt::Debug for ChainProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainProvider")
            .field("chain_id", &self.chain_id)
            .field("provider_name", &self.provider_name)
            .finish()
    }
}

/// Host-provided context of one invocation: chain id -> connected providers.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub providers: HashMap<String, Vec<ChainProvider>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: ChainProvider) -> Self {
        self.providers
            .entry(provider.chain_id.clone())
            .or_default()
            .push(provider);
        self
    }

    pub fn providers_for(&self, chain_id: &str) -> &[ChainProvider] {
        self.providers.get(chain_id).map(Vec::as_slice).unwrap_or(&[])
    }
}
