//! # Airseeker
//!
//! Runs one update cycle against the chains configured in the settings file and
//! prints the resulting write instructions as JSON.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin airseeker -- --config Config.toml
//! ```
//!
//! Exit code 1 means no beacons are triggered, 2 means no data feed group could
//! be formed (e.g. no provider configured for any triggered chain).

use airseeker_engine::{
    multicall::EthersDataFeedReader, Airseeker, ChainProvider, ExecutionContext, Settings,
};
use anyhow::Result;
use clap::Parser;
use ethers::prelude::{Http, Provider};
use log::{error, info, warn};
use std::process;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "airseeker", about = "Prepares Api3 data feed updates")]
struct Args {
    /// Settings file, any format the config crate understands
    #[arg(short, long, default_value = "Config.toml")]
    config: String,

    /// Prometheus exporter listen address
    #[cfg(feature = "observability")]
    #[arg(long, default_value = "0.0.0.0:9090")]
    metrics_addr: std::net::SocketAddr,
}

fn execution_context(settings: &Settings) -> ExecutionContext {
    let mut context = ExecutionContext::new();
    for (chain_id, chain) in &settings.chains {
        for provider in &chain.providers {
            match Provider::<Http>::try_from(provider.url.as_str()) {
                Ok(client) => {
                    context = context.with_provider(ChainProvider {
                        chain_id: chain_id.clone(),
                        provider_name: provider.name.clone(),
                        reader: Arc::new(EthersDataFeedReader::new(Arc::new(client))),
                    });
                }
                Err(e) => warn!(
                    "[chain {}] Skipping provider {}: invalid url. Error: {}",
                    chain_id, provider.name, e
                ),
            }
        }
    }
    context
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    #[cfg(feature = "observability")]
    {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(args.metrics_addr)
            .install()?;
        airseeker_engine::metrics::describe_metrics();
        info!("Prometheus exporter listening on {}", args.metrics_addr);
    }

    let settings = Arc::new(Settings::load(&args.config)?);
    let context = execution_context(&settings);
    info!(
        "Loaded {} chain(s), {} beacon(s), {} beacon set(s)",
        settings.chains.len(),
        settings.beacons.len(),
        settings.beacon_sets.len()
    );

    let airseeker = Airseeker::with_http_transport(settings)?;
    match airseeker.run_cycle(&context).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(e) => {
            error!("{}. Stopping.", e);
            process::exit(e.exit_code());
        }
    }
}
