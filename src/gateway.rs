// src/gateway.rs

use crate::constants::gateway_timeout;
use crate::metrics;
use crate::rate_limiter::GatewayWithLimiter;
use crate::types::{SignedData, Template};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;

/// Joins a gateway base url and an endpoint id with exactly one `/`.
pub fn url_join(base_url: &str, endpoint_id: &str) -> String {
    if base_url.ends_with('/') {
        format!("{}{}", base_url, endpoint_id)
    } else {
        format!("{}/{}", base_url, endpoint_id)
    }
}

/// Posts encoded template parameters to one signed data gateway and returns the raw JSON body.
#[async_trait]
pub trait SignedDataTransport: Send + Sync {
    async fn post_signed_data(&self, url: &str, api_key: &str, encoded_parameters: &Bytes) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct HttpGatewayTransport {
    client: reqwest::Client,
}

impl HttpGatewayTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(gateway_timeout())
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SignedDataTransport for HttpGatewayTransport {
    async fn post_signed_data(&self, url: &str, api_key: &str, encoded_parameters: &Bytes) -> Result<Value> {
        let url = url::Url::parse(url).map_err(|e| anyhow!("Invalid gateway url {:?}: {}", url, e))?;
        let response = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("x-api-key", api_key)
            .json(&json!({ "encodedParameters": encoded_parameters }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

// Airnode gateways before v0.8.0 answer with `data.value`
#[derive(Deserialize)]
struct LegacySignedDataResponse {
    data: LegacySignedDataPayload,
    signature: Bytes,
}

#[derive(Deserialize)]
struct LegacySignedDataPayload {
    timestamp: String,
    value: Bytes,
}

#[derive(Deserialize)]
struct SignedDataResponse {
    data: SignedDataPayload,
    signature: Bytes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedDataPayload {
    timestamp: String,
    encoded_value: Bytes,
}

type SignedDataDecoder = fn(&Value) -> Option<SignedData>;

fn decode_legacy(value: &Value) -> Option<SignedData> {
    let response = LegacySignedDataResponse::deserialize(value).ok()?;
    Some(SignedData {
        timestamp: response.data.timestamp,
        encoded_value: response.data.value,
        signature: response.signature,
    })
}

fn decode_current(value: &Value) -> Option<SignedData> {
    let response = SignedDataResponse::deserialize(value).ok()?;
    Some(SignedData {
        timestamp: response.data.timestamp,
        encoded_value: response.data.encoded_value,
        signature: response.signature,
    })
}

/// Tried in order; the first decoder that accepts the body wins.
const SIGNED_DATA_DECODERS: &[SignedDataDecoder] = &[decode_legacy, decode_current];

/// Normalizes a gateway response body into [`SignedData`].
pub fn parse_signed_data(value: &Value) -> Option<SignedData> {
    SIGNED_DATA_DECODERS
        .iter()
        .find_map(|decode| decode(value))
        .filter(|signed_data| signed_data.timestamp_secs().is_some())
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no gateways configured")]
    NoGateways,
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("unrecognized signed data response from {url}")]
    InvalidResponse { url: String },
    #[error("all {attempted} gateway request(s) failed")]
    AllGatewaysFailed { attempted: usize },
}

async fn request_gateway(
    transport: &dyn SignedDataTransport,
    gateway: &GatewayWithLimiter,
    template: &Template,
) -> Result<SignedData, GatewayError> {
    let url = url_join(&gateway.gateway.url, &format!("{:?}", template.endpoint_id));
    let started = Instant::now();
    let body = gateway
        .limiter
        .schedule(transport.post_signed_data(&url, &gateway.gateway.api_key, &template.parameters))
        .await
        .map_err(|e| {
            metrics::increment_gateway_request("error");
            GatewayError::Request {
                url: url.clone(),
                reason: format!("{:#}", e),
            }
        })?;

    match parse_signed_data(&body) {
        Some(signed_data) => {
            metrics::increment_gateway_request("ok");
            metrics::record_gateway_latency(started.elapsed());
            Ok(signed_data)
        }
        None => {
            metrics::increment_gateway_request("invalid_response");
            Err(GatewayError::InvalidResponse { url })
        }
    }
}

/// Queries every gateway concurrently and resolves with the first valid response.
///
/// A failing gateway never preempts a slower one that succeeds; only when all
/// of them fail does this return [`GatewayError::AllGatewaysFailed`].
pub async fn fetch_signed_data(
    transport: &dyn SignedDataTransport,
    gateways: &[GatewayWithLimiter],
    template: &Template,
) -> Result<SignedData, GatewayError> {
    if gateways.is_empty() {
        return Err(GatewayError::NoGateways);
    }

    let mut requests: FuturesUnordered<_> = gateways
        .iter()
        .map(|gateway| request_gateway(transport, gateway, template))
        .collect();

    while let Some(result) = requests.next().await {
        match result {
            Ok(signed_data) => {
                debug!(
                    "Using signed data response for endpoint {:?}: {}",
                    template.endpoint_id,
                    serde_json::to_string(&signed_data).unwrap_or_default()
                );
                return Ok(signed_data);
            }
            Err(e) => warn!("Failed to make signed data gateway request. Error: {}", e),
        }
    }

    Err(GatewayError::AllGatewaysFailed {
        attempted: gateways.len(),
    })
}
