//! # Data Feed Update Orchestrator
//!
//! Turns the beacon values fetched during a cycle into `Api3ServerV1` write
//! instructions.
//!
//! ## Overview
//!
//! Work is split into provider/sponsor groups: every sponsor of every chain, once
//! per provider the host connected for that chain. Each group then runs two passes
//! concurrently:
//!
//! - **Beacons**: read `dataFeeds(beaconId)` in batches through `tryMulticall`,
//!   check deviation/heartbeat against the fetched value, emit one
//!   `updateBeaconWithSignedData` per beacon that qualifies.
//! - **Beacon sets**: read `dataFeeds(beaconSetId)`, then every member with
//!   `readDataFeedWithId`; aggregate members (fresh value when cached, on-chain
//!   value otherwise) into a median candidate and emit one
//!   `tryMulticall([member updates.., updateBeaconSetWithBeacons])` per set.
//!
//! A failed batch, feed or group only drops its own writes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let state = CycleState::initialize(settings);
//! initiate_fetching_beacon_data(&state, &transport).await?;
//! match initiate_data_feed_updates(&state, &context).await? {
//!     UpdateOutcome::Executable { writes } => submit(writes),
//!     UpdateOutcome::NotExecutable { reason } => info!("{}", reason),
//! }
//! ```

use crate::calculations::{decode_beacon_value, median, median_timestamp};
use crate::conditions::check_conditions;
use crate::constants::{DATAFEED_READ_BATCH_SIZE, DATAFEED_UPDATE_BATCH_SIZE};
use crate::contracts::{
    decode_data_feed_reading, encode_data_feeds, encode_read_data_feed_with_id,
    encode_try_multicall, encode_update_beacon_set_with_beacons,
    encode_update_beacon_with_signed_data,
};
use crate::engine::EngineError;
use crate::go::{go, GoOptions, GoResult};
use crate::metrics;
use crate::multicall::TryMulticallOutcome;
use crate::settings::Settings;
use crate::state::{ChainProvider, CycleState, ExecutionContext};
use crate::types::{
    shorten_address, Beacon, BeaconId, BeaconSetTrigger, BeaconTrigger, DataFeedType, SignedData,
};
use ethers::types::{Address, Bytes, I256};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::time::{Duration, Instant};

pub const NOTHING_TO_UPDATE_REASON: &str = "No data feeds to update";

/// Everything one sponsor wants updated on one chain, bound to one provider.
#[derive(Debug, Clone)]
pub struct ProviderSponsorDataFeeds {
    pub provider: ChainProvider,
    pub sponsor_address: Address,
    /// Seconds
    pub update_interval: u64,
    pub beacon_triggers: Vec<BeaconTrigger>,
    pub beacon_set_triggers: Vec<BeaconSetTrigger>,
}

/// Groups in configuration order: chain, then sponsor, then provider.
pub fn group_data_feeds_by_provider_sponsor(
    settings: &Settings,
    context: &ExecutionContext,
) -> Vec<ProviderSponsorDataFeeds> {
    let mut groups = Vec::new();
    for (chain_id, sponsors) in &settings.triggers.data_feed_updates {
        let providers = context.providers_for(chain_id);
        if providers.is_empty() {
            warn!("[chain {}] No providers available for chain. Skipping.", chain_id);
            continue;
        }
        for (sponsor, update) in sponsors {
            groups.extend(providers.iter().map(|provider| ProviderSponsorDataFeeds {
                provider: provider.clone(),
                sponsor_address: *sponsor,
                update_interval: update.update_interval,
                beacon_triggers: update.beacons.clone(),
                beacon_set_triggers: update.beacon_sets.clone(),
            }));
        }
    }
    groups
}

/// One call the host should submit to the chain.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WriteInstruction {
    pub to: Address,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Executable { writes: Vec<WriteInstruction> },
    NotExecutable { reason: String },
}

impl UpdateOutcome {
    fn from_writes(writes: Vec<WriteInstruction>) -> Self {
        if writes.is_empty() {
            UpdateOutcome::NotExecutable {
                reason: NOTHING_TO_UPDATE_REASON.to_string(),
            }
        } else {
            UpdateOutcome::Executable { writes }
        }
    }

    pub fn is_executable(&self) -> bool {
        matches!(self, UpdateOutcome::Executable { .. })
    }

    pub fn writes(&self) -> &[WriteInstruction] {
        match self {
            UpdateOutcome::Executable { writes } => writes,
            UpdateOutcome::NotExecutable { .. } => &[],
        }
    }
}

// {"executable":true,"writes":[..]} or {"executable":false,"reason":".."}
impl Serialize for UpdateOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("UpdateOutcome", 2)?;
        match self {
            UpdateOutcome::Executable { writes } => {
                state.serialize_field("executable", &true)?;
                state.serialize_field("writes", writes)?;
            }
            UpdateOutcome::NotExecutable { reason } => {
                state.serialize_field("executable", &false)?;
                state.serialize_field("reason", reason)?;
            }
        }
        state.end()
    }
}

/// Per-pass context shared by every read and write of one group and data feed type.
#[derive(Debug)]
pub struct UpdateCycle<'a> {
    pub group: &'a ProviderSponsorDataFeeds,
    pub data_feed_type: DataFeedType,
    pub server: Address,
    pub log_prefix: String,
    pub start: Instant,
    pub total_timeout: Duration,
    /// Unix seconds, fixed for the whole pass
    pub now: u64,
}

impl UpdateCycle<'_> {
    /// Every chain call shares what is left of the group's update interval.
    pub fn go_options(&self) -> GoOptions {
        GoOptions::for_cycle(self.start, self.total_timeout)
    }

    async fn try_multicall(&self, calldatas: Vec<Bytes>) -> GoResult<TryMulticallOutcome> {
        let reader = &self.group.provider.reader;
        let server = self.server;
        let calldatas = &calldatas;
        go(self.go_options(), move || reader.try_multicall(server, calldatas.clone())).await
    }
}

/// Prepares one pass, or `None` when the group has nothing of `data_feed_type`
/// or its chain has no server contract.
pub fn initialize_update_cycle<'a>(
    state: &CycleState,
    group: &'a ProviderSponsorDataFeeds,
    data_feed_type: DataFeedType,
    start: Instant,
) -> Option<UpdateCycle<'a>> {
    let log_prefix = format!(
        "[cycle {}] [chain {}] [{}] [sponsor {}] [{}]",
        state.log_id(),
        group.provider.chain_id,
        group.provider.provider_name,
        shorten_address(&group.sponsor_address),
        data_feed_type
    );

    let empty = match data_feed_type {
        DataFeedType::Beacon => group.beacon_triggers.is_empty(),
        DataFeedType::BeaconSet => group.beacon_set_triggers.is_empty(),
    };
    if empty {
        debug!("{} No {} found, skipping initialization cycle", log_prefix, data_feed_type);
        return None;
    }

    let Some(server) = state.settings.api3_server_v1(&group.provider.chain_id) else {
        warn!("{} No Api3ServerV1 configured for chain. Skipping.", log_prefix);
        return None;
    };

    Some(UpdateCycle {
        group,
        data_feed_type,
        server,
        log_prefix,
        start,
        total_timeout: Duration::from_secs(group.update_interval),
        now: chrono::Utc::now().timestamp().max(0) as u64,
    })
}

struct BeaconUpdate<'a> {
    trigger: &'a BeaconTrigger,
    beacon: &'a Beacon,
    signed_data: SignedData,
    value: I256,
    timestamp: u64,
}

fn skip(cycle: &UpdateCycle<'_>, reason: &'static str) {
    let kind = match cycle.data_feed_type {
        DataFeedType::Beacon => "beacon",
        DataFeedType::BeaconSet => "beacon_set",
    };
    metrics::increment_data_feed_skip(kind, reason);
}

fn beacon_update<'a>(
    cycle: &UpdateCycle<'_>,
    state: &'a CycleState,
    trigger: &'a BeaconTrigger,
) -> Option<BeaconUpdate<'a>> {
    let prefix = format!("{} [beacon {:?}]", cycle.log_prefix, trigger.beacon_id);
    let Some(signed_data) = state.beacon_values.get(&trigger.beacon_id) else {
        warn!("{} No data available for beacon. Skipping.", prefix);
        skip(cycle, "no_data");
        return None;
    };
    let Some(value) = decode_beacon_value(&signed_data.encoded_value) else {
        warn!("{} New beacon value is out of type range. Skipping.", prefix);
        skip(cycle, "out_of_range");
        return None;
    };
    let Some(timestamp) = signed_data.timestamp_secs() else {
        warn!("{} Signed data timestamp {:?} is not a number. Skipping.", prefix, signed_data.timestamp);
        skip(cycle, "invalid_timestamp");
        return None;
    };
    let beacon = state.settings.beacon(&trigger.beacon_id)?;
    Some(BeaconUpdate {
        trigger,
        beacon,
        signed_data,
        value,
        timestamp,
    })
}

async fn select_beacon_updates<'u, 'a>(
    cycle: &UpdateCycle<'_>,
    batch: &'u [BeaconUpdate<'a>],
) -> Vec<&'u BeaconUpdate<'a>> {
    let calldatas = batch
        .iter()
        .map(|update| encode_data_feeds(update.trigger.beacon_id))
        .collect();
    let outcome = match cycle.try_multicall(calldatas).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("{} Unable to read beacon data using tryMulticall. Error: {}", cycle.log_prefix, e);
            metrics::increment_batch_failure("read");
            return Vec::new();
        }
    };

    let mut selected = Vec::new();
    for (i, update) in batch.iter().enumerate() {
        let reading = outcome.success_at(i).and_then(decode_data_feed_reading);
        let Some((on_chain_value, on_chain_timestamp)) = reading else {
            warn!(
                "{} [beacon {:?}] Unable to read data feed. Error: {:?}",
                cycle.log_prefix,
                update.trigger.beacon_id,
                outcome.returndata_at(i)
            );
            skip(cycle, "read_failed");
            continue;
        };
        if check_conditions(
            on_chain_value,
            on_chain_timestamp,
            update.timestamp,
            update.trigger,
            update.value,
            cycle.now,
        ) {
            selected.push(update);
        } else {
            skip(cycle, "conditions_not_met");
        }
    }
    selected
}

/// Write instructions for the beacons of `group` whose fetched value qualifies.
pub async fn update_beacons(
    state: &CycleState,
    group: &ProviderSponsorDataFeeds,
    start: Instant,
) -> Vec<WriteInstruction> {
    let Some(cycle) = initialize_update_cycle(state, group, DataFeedType::Beacon, start) else {
        return Vec::new();
    };

    // only beacons with a usable fresh value are worth an on-chain read
    let candidates: Vec<BeaconUpdate> = group
        .beacon_triggers
        .iter()
        .filter_map(|trigger| beacon_update(&cycle, state, trigger))
        .collect();

    let selected: Vec<&BeaconUpdate> = join_all(
        candidates
            .chunks(DATAFEED_READ_BATCH_SIZE)
            .map(|batch| select_beacon_updates(&cycle, batch)),
    )
    .await
    .into_iter()
    .flatten()
    .collect();

    let mut writes = Vec::new();
    for batch in selected.chunks(DATAFEED_UPDATE_BATCH_SIZE) {
        let beacon_ids: Vec<String> = batch
            .iter()
            .map(|update| format!("{:?}", update.trigger.beacon_id))
            .collect();
        debug!(
            "{} About to update {} beacon(s). Beacon id(s): {}",
            cycle.log_prefix,
            batch.len(),
            beacon_ids.join(", ")
        );
        let encoded: anyhow::Result<Vec<WriteInstruction>> = batch
            .iter()
            .map(|update| {
                encode_update_beacon_with_signed_data(update.beacon, &update.signed_data).map(|data| {
                    WriteInstruction {
                        to: cycle.server,
                        data,
                    }
                })
            })
            .collect();
        match encoded {
            Ok(batch_writes) => writes.extend(batch_writes),
            Err(e) => {
                warn!("{} Unable to encode beacon update batch. Error: {:#}", cycle.log_prefix, e);
                metrics::increment_batch_failure("write");
            }
        }
    }

    info!("{} Prepared {} beacon update(s)", cycle.log_prefix, writes.len());
    writes
}

/// Reads every member of one set and, if the aggregated candidate qualifies,
/// returns the `tryMulticall` calldata that updates the members and then the set.
async fn prepare_beacon_set_update(
    cycle: &UpdateCycle<'_>,
    state: &CycleState,
    trigger: &BeaconSetTrigger,
    members: &[BeaconId],
    on_chain: (I256, u64),
) -> Option<Bytes> {
    let prefix = format!("{} [beacon set {:?}]", cycle.log_prefix, trigger.beacon_set_id);
    debug!("{} Processing beacon set update", prefix);

    let calldatas = members.iter().map(|id| encode_read_data_feed_with_id(*id)).collect();
    let member_readings = match cycle.try_multicall(calldatas).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("{} Unable to read beacon data using tryMulticall. Error: {}", prefix, e);
            metrics::increment_batch_failure("read");
            return None;
        }
    };

    let mut values = Vec::with_capacity(members.len());
    let mut timestamps = Vec::with_capacity(members.len());
    let mut member_updates = Vec::new();
    for (i, beacon_id) in members.iter().enumerate() {
        match state.beacon_values.get(beacon_id) {
            Some(signed_data) => {
                let Some(value) = decode_beacon_value(&signed_data.encoded_value) else {
                    warn!("{} New value of beacon {:?} is out of type range. Skipping.", prefix, beacon_id);
                    skip(cycle, "out_of_range");
                    return None;
                };
                let timestamp = signed_data.timestamp_secs()?;
                let beacon = state.settings.beacon(beacon_id)?;
                match encode_update_beacon_with_signed_data(beacon, &signed_data) {
                    Ok(calldata) => member_updates.push(calldata),
                    Err(e) => {
                        warn!("{} Unable to encode update of beacon {:?}. Error: {:#}", prefix, beacon_id, e);
                        return None;
                    }
                }
                values.push(value);
                timestamps.push(timestamp);
            }
            None => match member_readings.success_at(i).and_then(decode_data_feed_reading) {
                Some((value, timestamp)) => {
                    values.push(value);
                    timestamps.push(timestamp);
                }
                None => {
                    warn!(
                        "{} No data for beacon {:?}. Error: {:?}",
                        prefix,
                        beacon_id,
                        member_readings.returndata_at(i)
                    );
                    skip(cycle, "missing_member");
                    return None;
                }
            },
        }
    }

    let candidate_value = median(&values)?;
    let candidate_timestamp = median_timestamp(&timestamps)?;
    let (on_chain_value, on_chain_timestamp) = on_chain;
    if !check_conditions(
        on_chain_value,
        on_chain_timestamp,
        candidate_timestamp,
        trigger,
        candidate_value,
        cycle.now,
    ) {
        skip(cycle, "conditions_not_met");
        return None;
    }

    // the contract derives the set id from the full ordered member list
    member_updates.push(encode_update_beacon_set_with_beacons(members));
    Some(encode_try_multicall(member_updates))
}

async fn select_beacon_set_updates(
    cycle: &UpdateCycle<'_>,
    state: &CycleState,
    batch: &[(&BeaconSetTrigger, &[BeaconId])],
) -> Vec<Bytes> {
    let calldatas = batch
        .iter()
        .map(|(trigger, _)| encode_data_feeds(trigger.beacon_set_id))
        .collect();
    let outcome = match cycle.try_multicall(calldatas).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("{} Unable to read beacon set data using tryMulticall. Error: {}", cycle.log_prefix, e);
            metrics::increment_batch_failure("read");
            return Vec::new();
        }
    };

    let prepared = batch.iter().enumerate().filter_map(|(i, (trigger, members))| {
        match outcome.success_at(i).and_then(decode_data_feed_reading) {
            Some(on_chain) => Some(prepare_beacon_set_update(cycle, state, trigger, members, on_chain)),
            None => {
                warn!(
                    "{} [beacon set {:?}] Unable to read data feed. Error: {:?}",
                    cycle.log_prefix,
                    trigger.beacon_set_id,
                    outcome.returndata_at(i)
                );
                skip(cycle, "read_failed");
                None
            }
        }
    });

    join_all(prepared).await.into_iter().flatten().collect()
}

/// Write instructions for the beacon sets of `group` whose aggregate qualifies.
pub async fn update_beacon_sets(
    state: &CycleState,
    group: &ProviderSponsorDataFeeds,
    start: Instant,
) -> Vec<WriteInstruction> {
    let Some(cycle) = initialize_update_cycle(state, group, DataFeedType::BeaconSet, start) else {
        return Vec::new();
    };

    let triggers: Vec<(&BeaconSetTrigger, &[BeaconId])> = group
        .beacon_set_triggers
        .iter()
        .filter_map(|trigger| match state.settings.beacon_set(&trigger.beacon_set_id) {
            Some(members) if !members.is_empty() => Some((trigger, members)),
            _ => {
                warn!(
                    "{} [beacon set {:?}] Beacon set has no members configured. Skipping.",
                    cycle.log_prefix, trigger.beacon_set_id
                );
                None
            }
        })
        .collect();

    let calldatas: Vec<Bytes> = join_all(
        triggers
            .chunks(DATAFEED_READ_BATCH_SIZE)
            .map(|batch| select_beacon_set_updates(&cycle, state, batch)),
    )
    .await
    .into_iter()
    .flatten()
    .collect();

    let mut writes = Vec::with_capacity(calldatas.len());
    for batch in calldatas.chunks(DATAFEED_UPDATE_BATCH_SIZE) {
        debug!("{} About to update {} beacon set(s)", cycle.log_prefix, batch.len());
        writes.extend(batch.iter().map(|data| WriteInstruction {
            to: cycle.server,
            data: data.clone(),
        }));
    }

    info!("{} Prepared {} beacon set update(s)", cycle.log_prefix, writes.len());
    writes
}

/// Runs both passes of every group and gathers their writes in configuration order.
pub async fn initiate_data_feed_updates(
    state: &CycleState,
    context: &ExecutionContext,
) -> Result<UpdateOutcome, EngineError> {
    debug!("[cycle {}] Initiating data feed updates", state.log_id());
    let groups = group_data_feeds_by_provider_sponsor(&state.settings, context);
    if groups.is_empty() {
        warn!("[cycle {}] No data feed for processing found. Stopping.", state.log_id());
        return Err(EngineError::NoDataFeeds);
    }

    let group_writes = join_all(groups.iter().map(|group| async move {
        let start = Instant::now();
        let (beacons, beacon_sets) = tokio::join!(
            update_beacons(state, group, start),
            update_beacon_sets(state, group, start)
        );
        beacons.into_iter().chain(beacon_sets).collect::<Vec<_>>()
    }))
    .await;

    let writes: Vec<WriteInstruction> = group_writes.into_iter().flatten().collect();
    metrics::set_pending_writes(writes.len());
    info!(
        "[cycle {}] {} write instruction(s) across {} group(s)",
        state.log_id(),
        writes.len(),
        groups.len()
    );
    Ok(UpdateOutcome::from_writes(writes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::int224_max;
    use crate::contracts::{TryMulticallCall, UpdateBeaconSetWithBeaconsCall, UpdateBeaconWithSignedDataCall};
    use crate::multicall::DataFeedReader;
    use crate::types::{derive_beacon_id, derive_beacon_set_id};
    use anyhow::Result;
    use async_trait::async_trait;
    use ethers::abi::{AbiDecode, AbiEncode, Token};
    use ethers::types::{H256, U256};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    const CHAIN: &str = "31337";

    /// Answers each calldata from a fixed table; unknown calldata reverts.
    #[derive(Default)]
    struct TableReader {
        readings: HashMap<Bytes, Bytes>,
    }

    impl TableReader {
        fn reading(mut self, calldata: Bytes, value: i64, timestamp: u64) -> Self {
            let returndata = ethers::abi::encode(&[
                Token::Int(I256::from(value).into_raw()),
                Token::Uint(U256::from(timestamp)),
            ]);
            self.readings.insert(calldata, returndata.into());
            self
        }
    }

    #[async_trait]
    impl DataFeedReader for TableReader {
        async fn try_multicall(&self, _server: Address, calldatas: Vec<Bytes>) -> Result<TryMulticallOutcome> {
            let (successes, returndata) = calldatas
                .iter()
                .map(|calldata| match self.readings.get(calldata) {
                    Some(data) => (true, data.clone()),
                    None => (false, Bytes::default()),
                })
                .unzip();
            Ok(TryMulticallOutcome { successes, returndata })
        }
    }

    struct Fixture {
        settings: Settings,
        server: Address,
        beacons: Vec<BeaconId>,
        set: H256,
    }

    fn fixture() -> Fixture {
        let airnode = Address::repeat_byte(0xa1);
        let server = Address::repeat_byte(0x5e);
        let templates: Vec<H256> = (1..=3).map(H256::repeat_byte).collect();
        let beacons: Vec<BeaconId> = templates.iter().map(|t| derive_beacon_id(airnode, *t)).collect();
        let set = derive_beacon_set_id(&beacons);
        let beacon_entries: serde_json::Map<String, serde_json::Value> = beacons
            .iter()
            .zip(&templates)
            .map(|(id, t)| {
                let entry = json!({ "airnode": format!("{:?}", airnode), "template_id": format!("{:?}", t) });
                (format!("{:?}", id), entry)
            })
            .collect();
        let template_entries: serde_json::Map<String, serde_json::Value> = templates
            .iter()
            .map(|t| {
                let entry = json!({ "endpoint_id": format!("{:?}", H256::zero()), "parameters": "0x" });
                (format!("{:?}", t), entry)
            })
            .collect();
        let members: Vec<String> = beacons.iter().map(|id| format!("{:?}", id)).collect();
        let beacon_triggers: Vec<serde_json::Value> = beacons
            .iter()
            .map(|id| {
                json!({ "beacon_id": format!("{:?}", id), "deviation_threshold": "1", "heartbeat_interval": 86400 })
            })
            .collect();
        let raw = json!({
            "chains": { CHAIN: { "contracts": { "api3_server_v1": format!("{:?}", server) } } },
            "beacons": beacon_entries,
            "beacon_sets": { format!("{:?}", set): members },
            "templates": template_entries,
            "triggers": { "data_feed_updates": { CHAIN: {
                format!("{:?}", Address::repeat_byte(0x5b)): {
                    "update_interval": 30,
                    "beacons": beacon_triggers,
                    "beacon_sets": [
                        { "beacon_set_id": format!("{:?}", set), "deviation_threshold": "1", "heartbeat_interval": 86400 }
                    ]
                }
            } } }
        });
        Fixture {
            settings: Settings::from_json_str(&raw.to_string()).unwrap(),
            server,
            beacons,
            set,
        }
    }

    fn fresh_raw_value(state: &CycleState, beacon_id: BeaconId, value: I256, timestamp: u64) {
        state.beacon_values.insert(
            beacon_id,
            SignedData {
                timestamp: timestamp.to_string(),
                encoded_value: value.encode().into(),
                signature: Bytes::from(vec![0x51; 65]),
            },
        );
    }

    fn fresh_value(state: &CycleState, beacon_id: BeaconId, value: i64, timestamp: u64) {
        fresh_raw_value(state, beacon_id, I256::from(value), timestamp);
    }

    fn beyond_int224() -> I256 {
        int224_max() + I256::from(1i64)
    }

    fn context(reader: TableReader) -> ExecutionContext {
        ExecutionContext::new().with_provider(ChainProvider {
            chain_id: CHAIN.to_string(),
            provider_name: "local".to_string(),
            reader: Arc::new(reader),
        })
    }

    fn now() -> u64 {
        chrono::Utc::now().timestamp() as u64
    }

    #[test]
    fn groups_every_sponsor_per_provider() {
        let fixture = fixture();
        let context = context(TableReader::default()).with_provider(ChainProvider {
            chain_id: CHAIN.to_string(),
            provider_name: "backup".to_string(),
            reader: Arc::new(TableReader::default()),
        });
        let groups = group_data_feeds_by_provider_sponsor(&fixture.settings, &context);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].provider.provider_name, "local");
        assert_eq!(groups[1].provider.provider_name, "backup");
        assert_eq!(groups[0].beacon_triggers.len(), 3);

        let groups = group_data_feeds_by_provider_sponsor(&fixture.settings, &ExecutionContext::new());
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn no_groups_is_an_early_stop() {
        let fixture = fixture();
        let state = CycleState::initialize(Arc::new(fixture.settings));
        let result = initiate_data_feed_updates(&state, &ExecutionContext::new()).await;
        assert!(matches!(result, Err(EngineError::NoDataFeeds)));
    }

    #[tokio::test]
    async fn updates_only_deviating_beacons() {
        let fixture = fixture();
        let t = now();
        let [b1, b2, b3] = [fixture.beacons[0], fixture.beacons[1], fixture.beacons[2]];
        let reader = TableReader::default()
            .reading(encode_data_feeds(b1), 100, t - 60)
            .reading(encode_data_feeds(b2), 100, t - 60)
            .reading(encode_data_feeds(b3), 100, t - 60);
        let group = group_data_feeds_by_provider_sponsor(&fixture.settings, &context(reader)).remove(0);
        let state = CycleState::initialize(Arc::new(fixture.settings));
        fresh_value(&state, b1, 150, t);
        // within threshold
        fresh_value(&state, b2, 100, t);
        // b3 has no fresh value

        let writes = update_beacons(&state, &group, Instant::now()).await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].to, fixture.server);
        let call = UpdateBeaconWithSignedDataCall::decode(&writes[0].data).unwrap();
        assert_eq!(call.timestamp, U256::from(t));
        assert_eq!(call.data, Bytes::from(I256::from(150i64).encode()));
    }

    #[tokio::test]
    async fn beacon_set_update_wraps_member_updates() {
        let fixture = fixture();
        let t = now();
        let [b1, b2, b3] = [fixture.beacons[0], fixture.beacons[1], fixture.beacons[2]];
        let reader = TableReader::default()
            .reading(encode_data_feeds(fixture.set), 100, t - 60)
            .reading(encode_read_data_feed_with_id(b3), 200, t - 60);
        let group = group_data_feeds_by_provider_sponsor(&fixture.settings, &context(reader)).remove(0);
        let state = CycleState::initialize(Arc::new(fixture.settings));
        fresh_value(&state, b1, 200, t);
        fresh_value(&state, b2, 200, t);

        let writes = update_beacon_sets(&state, &group, Instant::now()).await;
        assert_eq!(writes.len(), 1);
        let call = TryMulticallCall::decode(&writes[0].data).unwrap();
        assert_eq!(call.data.len(), 3);
        assert!(UpdateBeaconWithSignedDataCall::decode(&call.data[0]).is_ok());
        let set_update = UpdateBeaconSetWithBeaconsCall::decode(&call.data[2]).unwrap();
        assert_eq!(set_update.beacon_ids, vec![b1.0, b2.0, b3.0]);
    }

    #[tokio::test]
    async fn beacon_set_is_skipped_when_a_member_has_no_data() {
        let fixture = fixture();
        let t = now();
        let reader = TableReader::default().reading(encode_data_feeds(fixture.set), 100, t - 60);
        let group = group_data_feeds_by_provider_sponsor(&fixture.settings, &context(reader)).remove(0);
        let state = CycleState::initialize(Arc::new(fixture.settings));
        fresh_value(&state, fixture.beacons[0], 500, t);
        fresh_value(&state, fixture.beacons[1], 500, t);

        let writes = update_beacon_sets(&state, &group, Instant::now()).await;
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn beacon_with_out_of_range_value_is_skipped() {
        let fixture = fixture();
        let t = now();
        let [b1, b2, _] = [fixture.beacons[0], fixture.beacons[1], fixture.beacons[2]];
        let reader = TableReader::default()
            .reading(encode_data_feeds(b1), 100, t - 60)
            .reading(encode_data_feeds(b2), 100, t - 60);
        let group = group_data_feeds_by_provider_sponsor(&fixture.settings, &context(reader)).remove(0);
        let state = CycleState::initialize(Arc::new(fixture.settings));
        fresh_raw_value(&state, b1, beyond_int224(), t);
        fresh_value(&state, b2, 150, t);

        let writes = update_beacons(&state, &group, Instant::now()).await;
        assert_eq!(writes.len(), 1);
        let call = UpdateBeaconWithSignedDataCall::decode(&writes[0].data).unwrap();
        assert_eq!(call.data, Bytes::from(I256::from(150i64).encode()));
    }

    #[tokio::test]
    async fn beacon_set_is_skipped_when_a_member_value_is_out_of_range() {
        let fixture = fixture();
        let t = now();
        let [b1, b2, b3] = [fixture.beacons[0], fixture.beacons[1], fixture.beacons[2]];
        let reader = TableReader::default().reading(encode_data_feeds(fixture.set), 100, t - 60);
        let group = group_data_feeds_by_provider_sponsor(&fixture.settings, &context(reader)).remove(0);
        let state = CycleState::initialize(Arc::new(fixture.settings));
        fresh_raw_value(&state, b1, beyond_int224(), t);
        fresh_value(&state, b2, 500, t);
        fresh_value(&state, b3, 500, t);

        let writes = update_beacon_sets(&state, &group, Instant::now()).await;
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn beacon_set_needs_a_newer_median_timestamp() {
        let fixture = fixture();
        let t = now();
        let [b1, b2, b3] = [fixture.beacons[0], fixture.beacons[1], fixture.beacons[2]];
        let reader = TableReader::default().reading(encode_data_feeds(fixture.set), 100, t - 60);
        let group = group_data_feeds_by_provider_sponsor(&fixture.settings, &context(reader)).remove(0);
        let state = CycleState::initialize(Arc::new(fixture.settings));
        // one member is newer than the set, but the median is not
        fresh_value(&state, b1, 500, t);
        fresh_value(&state, b2, 500, t - 120);
        fresh_value(&state, b3, 500, t - 60);

        let writes = update_beacon_sets(&state, &group, Instant::now()).await;
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn beacon_set_prefers_fresh_member_values() {
        let fixture = fixture();
        let t = now();
        let [b1, b2, b3] = [fixture.beacons[0], fixture.beacons[1], fixture.beacons[2]];
        // with b3's on-chain 100 the median would stay at 100 and nothing would deviate
        let reader = TableReader::default()
            .reading(encode_data_feeds(fixture.set), 100, t - 60)
            .reading(encode_read_data_feed_with_id(b3), 100, t - 60);
        let group = group_data_feeds_by_provider_sponsor(&fixture.settings, &context(reader)).remove(0);
        let state = CycleState::initialize(Arc::new(fixture.settings));
        fresh_value(&state, b1, 100, t);
        fresh_value(&state, b2, 300, t);
        fresh_value(&state, b3, 300, t);

        let writes = update_beacon_sets(&state, &group, Instant::now()).await;
        assert_eq!(writes.len(), 1);
        let call = TryMulticallCall::decode(&writes[0].data).unwrap();
        assert_eq!(call.data.len(), 4);
        let b3_update = UpdateBeaconWithSignedDataCall::decode(&call.data[2]).unwrap();
        assert_eq!(b3_update.data, Bytes::from(I256::from(300i64).encode()));
        let set_update = UpdateBeaconSetWithBeaconsCall::decode(&call.data[3]).unwrap();
        assert_eq!(set_update.beacon_ids, vec![b1.0, b2.0, b3.0]);
    }

    #[tokio::test]
    async fn nothing_to_update_is_not_executable() {
        let fixture = fixture();
        let state = CycleState::initialize(Arc::new(fixture.settings));
        let outcome = initiate_data_feed_updates(&state, &context(TableReader::default()))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::NotExecutable {
                reason: NOTHING_TO_UPDATE_REASON.to_string()
            }
        );
        assert!(outcome.writes().is_empty());
    }

    #[test]
    fn outcome_serializes_flat() {
        let outcome = UpdateOutcome::Executable {
            writes: vec![WriteInstruction {
                to: Address::repeat_byte(1),
                data: Bytes::from(vec![0xab]),
            }],
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["executable"], json!(true));
        assert_eq!(value["writes"][0]["data"], json!("0xab"));

        let value = serde_json::to_value(UpdateOutcome::from_writes(Vec::new())).unwrap();
        assert_eq!(value, json!({ "executable": false, "reason": NOTHING_TO_UPDATE_REASON }));
    }
}
