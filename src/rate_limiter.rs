// src/rate_limiter.rs

use crate::constants::{
    DIRECT_GATEWAY_MAX_CONCURRENCY_DEFAULT, DIRECT_GATEWAY_MIN_TIME_DEFAULT_MS,
    GATEWAY_MAX_CONCURRENCY_DEFAULT, GATEWAY_MIN_TIME_DEFAULT_MS,
};
use crate::settings::{LimiterConfig, RateLimiting, Settings};
use crate::types::{derive_endpoint_id, EndpointId, Gateway, TemplateId};
use ethers::types::Address;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Throttles jobs against one external endpoint.
///
/// At most `max_concurrent` jobs run at once and consecutive job starts are at
/// least `min_time` apart.
pub struct Limiter {
    semaphore: Semaphore,
    spacing: Option<DefaultDirectRateLimiter>,
    max_concurrent: usize,
    min_time: Duration,
}

impl Limiter {
    pub fn new(max_concurrent: usize, min_time: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Semaphore::new(max_concurrent),
            spacing: Quota::with_period(min_time).map(RateLimiter::direct),
            max_concurrent,
            min_time,
        }
    }

    fn from_config(config: Option<&LimiterConfig>, max_concurrent: usize, min_time_ms: u64) -> Self {
        Self::new(
            config.and_then(|c| c.max_concurrent).unwrap_or(max_concurrent),
            Duration::from_millis(config.and_then(|c| c.min_time).unwrap_or(min_time_ms)),
        )
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn min_time(&self) -> Duration {
        self.min_time
    }

    /// Waits for a free slot, then runs `job` while holding it.
    pub async fn schedule<F: Future>(&self, job: F) -> F::Output {
        // the semaphore is never closed, so a permit is always eventually granted
        let _permit = self.semaphore.acquire().await.ok();
        if let Some(spacing) = &self.spacing {
            spacing.until_ready().await;
        }
        job.await
    }
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("max_concurrent", &self.max_concurrent)
            .field("min_time", &self.min_time)
            .finish()
    }
}

/// A gateway together with the limiter every request to it goes through.
#[derive(Debug, Clone)]
pub struct GatewayWithLimiter {
    pub gateway: Gateway,
    pub limiter: Arc<Limiter>,
}

/// Attaches a fresh limiter to every gateway of `airnode`.
///
/// Limits come from the per-airnode override, then the global gateway settings,
/// then the built-in defaults.
pub fn build_gateway_limiter(
    airnode: &Address,
    gateways: &[Gateway],
    rate_limiting: &RateLimiting,
) -> Vec<GatewayWithLimiter> {
    let airnode_override = rate_limiting.signed_data_gateway_override(airnode);
    let max_concurrent = rate_limiting
        .max_gateway_concurrency
        .unwrap_or(GATEWAY_MAX_CONCURRENCY_DEFAULT);
    let min_time = rate_limiting
        .min_gateway_time
        .unwrap_or(GATEWAY_MIN_TIME_DEFAULT_MS);

    gateways
        .iter()
        .map(|gateway| GatewayWithLimiter {
            gateway: gateway.clone(),
            limiter: Arc::new(Limiter::from_config(airnode_override, max_concurrent, min_time)),
        })
        .collect()
}

pub fn build_gateway_limiters(
    gateways: &HashMap<Address, Vec<Gateway>>,
    rate_limiting: &RateLimiting,
) -> HashMap<Address, Vec<GatewayWithLimiter>> {
    gateways
        .iter()
        .map(|(airnode, gateways)| {
            (
                *airnode,
                build_gateway_limiter(airnode, gateways, rate_limiting),
            )
        })
        .collect()
}

/// One limiter per OIS, shared by every template whose endpoint that OIS serves.
pub fn build_api_limiters(settings: &Settings) -> HashMap<TemplateId, Arc<Limiter>> {
    let ois_limiters: HashMap<&str, Arc<Limiter>> = settings
        .ois
        .iter()
        .map(|ois| {
            let limiter = Limiter::from_config(
                settings.rate_limiting.direct_gateway_override(&ois.title),
                DIRECT_GATEWAY_MAX_CONCURRENCY_DEFAULT,
                DIRECT_GATEWAY_MIN_TIME_DEFAULT_MS,
            );
            (ois.title.as_str(), Arc::new(limiter))
        })
        .collect();

    let endpoint_titles: HashMap<EndpointId, &str> = settings
        .ois
        .iter()
        .flat_map(|ois| {
            ois.endpoints
                .iter()
                .map(move |endpoint| (derive_endpoint_id(&ois.title, &endpoint.name), ois.title.as_str()))
        })
        .collect();

    settings
        .templates
        .iter()
        .filter_map(|(template_id, template)| {
            let title = endpoint_titles.get(&template.endpoint_id)?;
            let limiter = ois_limiters.get(title)?;
            Some((*template_id, Arc::clone(limiter)))
        })
        .inspect(|(template_id, _)| debug!("Template {:?} routed through its OIS limiter", template_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Ois, OisEndpoint};
    use crate::types::Template;
    use ethers::types::{Bytes, H256};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn gateway(url: &str) -> Gateway {
        Gateway {
            api_key: "key".to_string(),
            url: url.to_string(),
        }
    }

    fn empty_settings() -> Settings {
        serde_json::from_str(r#"{ "chains": {} }"#).unwrap()
    }

    #[test]
    fn gateway_limits_fall_back_to_defaults() {
        let airnode = Address::repeat_byte(1);
        let limiters = build_gateway_limiter(&airnode, &[gateway("a"), gateway("b")], &RateLimiting::default());
        assert_eq!(limiters.len(), 2);
        assert_eq!(limiters[0].limiter.max_concurrent(), GATEWAY_MAX_CONCURRENCY_DEFAULT);
        assert_eq!(
            limiters[0].limiter.min_time(),
            Duration::from_millis(GATEWAY_MIN_TIME_DEFAULT_MS)
        );
        assert!(!Arc::ptr_eq(&limiters[0].limiter, &limiters[1].limiter));
    }

    #[test]
    fn airnode_override_beats_global_settings() {
        let airnode = Address::repeat_byte(1);
        let other = Address::repeat_byte(2);
        let mut rate_limiting = RateLimiting {
            max_gateway_concurrency: Some(4),
            min_gateway_time: Some(100),
            ..Default::default()
        };
        rate_limiting.overrides.signed_data_gateways.insert(
            airnode,
            LimiterConfig {
                max_concurrent: Some(1),
                min_time: None,
            },
        );
        let gateways = HashMap::from([(airnode, vec![gateway("a")]), (other, vec![gateway("b")])]);
        let limiters = build_gateway_limiters(&gateways, &rate_limiting);

        let overridden = &limiters[&airnode][0].limiter;
        assert_eq!(overridden.max_concurrent(), 1);
        assert_eq!(overridden.min_time(), Duration::from_millis(100));

        let global = &limiters[&other][0].limiter;
        assert_eq!(global.max_concurrent(), 4);
        assert_eq!(global.min_time(), Duration::from_millis(100));
    }

    #[test]
    fn templates_of_one_ois_share_a_limiter() {
        let mut settings = empty_settings();
        settings.ois = vec![
            Ois {
                title: "Prices".to_string(),
                endpoints: vec![
                    OisEndpoint { name: "spot".to_string() },
                    OisEndpoint { name: "twap".to_string() },
                ],
            },
            Ois {
                title: "Weather".to_string(),
                endpoints: vec![OisEndpoint { name: "temperature".to_string() }],
            },
        ];
        settings.rate_limiting.overrides.direct_gateways.insert(
            "prices".to_string(),
            LimiterConfig {
                max_concurrent: Some(2),
                min_time: Some(0),
            },
        );
        let template = |title: &str, endpoint: &str| Template {
            endpoint_id: derive_endpoint_id(title, endpoint),
            parameters: Bytes::default(),
        };
        let spot = H256::repeat_byte(1);
        let twap = H256::repeat_byte(2);
        let weather = H256::repeat_byte(3);
        let orphan = H256::repeat_byte(4);
        settings.templates.insert(spot, template("Prices", "spot"));
        settings.templates.insert(twap, template("Prices", "twap"));
        settings.templates.insert(weather, template("Weather", "temperature"));
        settings.templates.insert(orphan, template("Unknown", "x"));

        let limiters = build_api_limiters(&settings);
        assert!(Arc::ptr_eq(&limiters[&spot], &limiters[&twap]));
        assert!(!Arc::ptr_eq(&limiters[&spot], &limiters[&weather]));
        assert!(!limiters.contains_key(&orphan));
        assert_eq!(limiters[&spot].max_concurrent(), 2);
        assert_eq!(limiters[&weather].max_concurrent(), DIRECT_GATEWAY_MAX_CONCURRENCY_DEFAULT);
    }

    #[tokio::test]
    async fn limiter_spaces_job_starts() {
        let limiter = Limiter::new(10, Duration::from_millis(50));
        let start = Instant::now();
        let starts: Vec<Duration> = futures::future::join_all(
            (0..3).map(|_| limiter.schedule(async { start.elapsed() })),
        )
        .await;
        let mut starts = starts;
        starts.sort();
        assert!(starts[2] >= Duration::from_millis(90), "starts: {:?}", starts);
    }

    #[tokio::test]
    async fn limiter_caps_concurrency() {
        let limiter = Limiter::new(2, Duration::ZERO);
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        futures::future::join_all((0..6).map(|_| {
            limiter.schedule(async {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
        }))
        .await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}
