//! Read-through mirror of a remote price server.
//!
//! Downstream services keep a local copy of one provider's catalog, reload
//! it on an interval or on request, and fetch single instance types from
//! the remote when the local copy misses them.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{PricingError, PricingResult};
use crate::models::{CloudProvider, InstanceTypePrice, PriceCatalog, RegionalInstancePrice};
use crate::store::PriceStore;

/// Default reload period of the mirror
pub const DEFAULT_MIRROR_INTERVAL: Duration = Duration::from_secs(30 * 60);

const REFRESH_REQUEST_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Base URL of the remote price server, e.g. `http://price-server:8080`
    pub endpoint: String,
    pub provider: CloudProvider,
    /// Mirror only this region instead of the whole catalog
    pub region: Option<String>,
    pub interval: Duration,
}

impl MirrorConfig {
    pub fn new(endpoint: impl Into<String>, provider: CloudProvider) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            provider,
            region: None,
            interval: DEFAULT_MIRROR_INTERVAL,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn base_url(&self) -> String {
        format!("{}{}", self.endpoint, self.provider.api_prefix())
    }
}

/// Local copy of a remote provider catalog
#[derive(Debug, Clone)]
pub struct MirrorClient {
    http: reqwest::Client,
    config: Arc<MirrorConfig>,
    store: PriceStore,
    refresh_tx: mpsc::Sender<()>,
}

/// Background reload loop of a [`MirrorClient`]
#[derive(Debug)]
pub struct MirrorRefreshLoop {
    client: MirrorClient,
    refresh_rx: mpsc::Receiver<()>,
}

impl MirrorClient {
    /// Create the mirror and load the remote catalog once.
    ///
    /// Fails when the initial load fails, so a mirror never starts empty.
    pub async fn connect(config: MirrorConfig) -> PricingResult<(Self, MirrorRefreshLoop)> {
        Self::connect_with(reqwest::Client::new(), config).await
    }

    pub async fn connect_with(
        http: reqwest::Client,
        config: MirrorConfig,
    ) -> PricingResult<(Self, MirrorRefreshLoop)> {
        let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_REQUEST_CAPACITY);
        let client = Self {
            http,
            config: Arc::new(config),
            store: PriceStore::new(),
            refresh_tx,
        };
        client.refresh().await?;

        let refresh_loop = MirrorRefreshLoop {
            client: client.clone(),
            refresh_rx,
        };
        Ok((client, refresh_loop))
    }

    /// Reload the mirrored regions from the remote
    pub async fn refresh(&self) -> PricingResult<()> {
        let base = self.config.base_url();
        let url = match &self.config.region {
            Some(region) => format!("{base}/regions/{}/price", urlencoding::encode(region)),
            None => format!("{base}/price"),
        };

        let catalog: PriceCatalog = self.fetch(&url).await?;
        debug!(
            provider = %self.config.provider,
            regions = catalog.len(),
            "Mirror reloaded"
        );
        self.store.replace_regions(catalog).await;
        Ok(())
    }

    /// Ask the refresh loop for a reload without waiting for it
    pub fn request_refresh(&self) {
        if self.refresh_tx.try_send(()).is_err() {
            debug!(provider = %self.config.provider, "Mirror refresh already pending");
        }
    }

    pub async fn list_instances_price(&self, region: &str) -> Option<RegionalInstancePrice> {
        self.store.get(region).await
    }

    /// Price of one instance type, fetched from the remote on a local miss
    pub async fn get_instance_price(&self, region: &str, instance_type: &str) -> Option<InstanceTypePrice> {
        if let Some(price) = self.store.get_instance(region, instance_type).await {
            return Some(price);
        }

        let url = format!(
            "{}/regions/{}/types/{}/price",
            self.config.base_url(),
            urlencoding::encode(region),
            urlencoding::encode(instance_type)
        );
        match self.fetch::<InstanceTypePrice>(&url).await {
            Ok(price) => {
                self.store
                    .replace_instance(region, instance_type, price.clone())
                    .await;
                Some(price)
            }
            Err(e) => {
                debug!(
                    provider = %self.config.provider,
                    region = region,
                    instance_type = instance_type,
                    error = %e,
                    "Remote has no price for instance type"
                );
                None
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> PricingResult<T> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PricingError::UpstreamStatus(status.as_u16()));
        }
        Ok(response.json::<T>().await?)
    }
}

impl MirrorRefreshLoop {
    /// Reload on every interval tick and refresh request until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.client.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let provider = self.client.config.provider;

        info!(provider = %provider, endpoint = %self.client.config.endpoint, "Starting price mirror");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(provider = %provider, "Price mirror shutting down");
                    break;
                }
                Some(()) = self.refresh_rx.recv() => self.reload().await,
                _ = ticker.tick() => self.reload().await,
            }
        }
    }

    async fn reload(&self) {
        if let Err(e) = self.client.refresh().await {
            warn!(provider = %self.client.config.provider, error = %e, "Mirror reload failed");
        }
    }
}
