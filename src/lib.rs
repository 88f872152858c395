//! # Airseeker Engine
//!
//! Update engine for Api3 data feeds. Each invocation fetches signed beacon
//! observations from airnode gateways, compares them with what `Api3ServerV1`
//! currently stores, and returns the update call data worth submitting.
//!
//! ## Overview
//!
//! One cycle runs in two phases:
//!
//! - **Fetch**: every beacon some trigger depends on is requested from all of its
//!   airnode's gateways at once; the first valid signed response is cached.
//! - **Update**: per chain, sponsor and provider, on-chain readings are batched
//!   through `tryMulticall` and checked against deviation and heartbeat triggers.
//!   Qualifying beacons and beacon sets become [`orchestrator::WriteInstruction`]s.
//!
//! The engine never signs or sends transactions; the host submits the returned
//! instructions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use airseeker_engine::{Airseeker, ExecutionContext, Settings};
//! use std::sync::Arc;
//!
//! # async fn run(context: ExecutionContext) -> anyhow::Result<()> {
//! let settings = Arc::new(Settings::new()?);
//! let airseeker = Airseeker::with_http_transport(settings)?;
//! let outcome = airseeker.run_cycle(&context).await?;
//! println!("{}", serde_json::to_string(&outcome)?);
//! # Ok(())
//! # }
//! ```

// Core Types
/// Protocol constants (batch sizes, timeouts, exit codes)
pub mod constants;
/// Beacons, templates, gateways, triggers and id derivation
pub mod types;
/// Median and deviation math
pub mod calculations;
/// Deviation and heartbeat update conditions
pub mod conditions;

// Fetch Layer
/// Per-gateway and per-API rate limiting
pub mod rate_limiter;
/// Signed data gateway requests with first-success racing
pub mod gateway;
/// Fetches signed data for every triggered beacon
pub mod beacon_fetcher;

// Update Layer
/// Per-cycle state and host execution context
pub mod state;
/// Retry and timeout wrapper for chain calls
pub mod go;
/// `tryMulticall` reads against `Api3ServerV1`
pub mod multicall;
/// Data feed update orchestration
pub mod orchestrator;
/// Cycle entry point
pub mod engine;

// Contracts (Public ABIs Only)
/// `Api3ServerV1` bindings and call data encoders
pub mod contracts;

// Infrastructure
/// Metrics and observability
pub mod metrics;
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use engine::{Airseeker, EngineError};
pub use orchestrator::{UpdateOutcome, WriteInstruction};
pub use settings::Settings;
pub use state::{ChainProvider, ExecutionContext};
