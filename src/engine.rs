// src/engine.rs

use crate::beacon_fetcher::initiate_fetching_beacon_data;
use crate::constants::{NO_DATA_FEEDS_EXIT_CODE, NO_FETCH_EXIT_CODE};
use crate::gateway::{HttpGatewayTransport, SignedDataTransport};
use crate::orchestrator::{initiate_data_feed_updates, UpdateOutcome};
use crate::settings::Settings;
use crate::state::{CycleState, ExecutionContext};
use log::info;
use std::sync::Arc;
use std::time::Instant;

/// Deliberate early stops of a cycle. Anything else is logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No beacons to fetch data for found")]
    NoBeaconsToFetch,
    #[error("No data feed for processing found")]
    NoDataFeeds,
}

impl EngineError {
    /// Process exit code the binary reports for this stop.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::NoBeaconsToFetch => NO_FETCH_EXIT_CODE,
            EngineError::NoDataFeeds => NO_DATA_FEEDS_EXIT_CODE,
        }
    }
}

/// Entry point: one call to [`Airseeker::run_cycle`] per invocation.
pub struct Airseeker {
    settings: Arc<Settings>,
    transport: Arc<dyn SignedDataTransport>,
}

impl Airseeker {
    pub fn new(settings: Arc<Settings>, transport: Arc<dyn SignedDataTransport>) -> Self {
        Self { settings, transport }
    }

    /// Uses the `reqwest` gateway transport.
    pub fn with_http_transport(settings: Arc<Settings>) -> anyhow::Result<Self> {
        Ok(Self::new(settings, Arc::new(HttpGatewayTransport::new()?)))
    }

    /// Fetches fresh beacon values, then decides which data feeds to update.
    ///
    /// Every call starts from an empty cache and fresh limiters.
    pub async fn run_cycle(&self, context: &ExecutionContext) -> Result<UpdateOutcome, EngineError> {
        let started = Instant::now();
        let state = CycleState::initialize(Arc::clone(&self.settings));
        info!("[cycle {}] Starting update cycle {}", state.log_id(), state.cycle_id);

        let summary = initiate_fetching_beacon_data(&state, self.transport.as_ref()).await?;
        let outcome = initiate_data_feed_updates(&state, context).await?;

        info!(
            "[cycle {}] Finished in {:?}: {}/{} beacons fetched, {} write(s)",
            state.log_id(),
            started.elapsed(),
            summary.fetched,
            summary.requested,
            outcome.writes().len()
        );
        Ok(outcome)
    }
}
