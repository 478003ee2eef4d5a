//! Alibaba Cloud Pricing Provider
//!
//! Instance types and spot prices come from the ECS RPC API, signed with a
//! credential pair picked at random from the pool on every call. On-demand
//! prices come from the public price manifest behind the ECS pricing page.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use domain_pricing::{
    map_bounded, Arch, CloudProvider, InstanceSpec, PriceRefresher, PriceStore, PriceUpdate, RegionTypeKey,
};
use hmac::{Hmac, Mac};
use observability::{PricingMetrics, RefreshTimer};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha1::Sha1;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{parse_price, report_catalog_size, tally_region_outcomes, Page, ProviderError, ProviderResult};
use crate::config::AccessKeyPair;

type HmacSha1 = Hmac<Sha1>;

/// Region used to list every other region
pub const BOOTSTRAP_REGION: &str = "cn-hangzhou";
/// Regions listed by the API that are out of service
pub const REGION_DENYLIST: [&str; 1] = ["ap-southeast-2"];

pub const PRICING_PAGE_URL: &str = "https://www.aliyun.com/price/ecs/ecs-pricing/zh";
const MANIFEST_URL_PATTERN: &str = r"https://g\.alicdn\.com/aliyun/ecs-price-info/[0-9.]+";
const MANIFEST_PATH: &str = "price/download/instancePrice.json";

const PROVIDER: &str = "alibabacloud";
const API_VERSION: &str = "2014-05-26";
const INSTANCE_TYPES_PAGE_SIZE: &str = "1600";
/// Any instant in the past yields one current price per zone
const SPOT_HISTORY_START: &str = "2024-10-09T06:00:00Z";

/// Hardware description returned by `DescribeInstanceTypes`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceTypeInfo {
    pub instance_type_id: String,
    #[serde(default)]
    pub cpu_core_count: f64,
    #[serde(default)]
    pub memory_size: f64,
    #[serde(rename = "GPUAmount", default)]
    pub gpu_amount: f64,
    #[serde(default)]
    pub cpu_architecture: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZoneSpotPrice {
    pub zone_id: String,
    pub spot_price: f64,
}

/// Remote Alibaba Cloud operations used by the refresh pipelines
#[async_trait]
pub trait AlibabaCloudApi: Send + Sync + 'static {
    async fn describe_regions(&self) -> ProviderResult<Vec<String>>;

    async fn describe_zones(&self, region: &str) -> ProviderResult<Vec<String>>;

    async fn describe_instance_types_page(
        &self,
        region: &str,
        next_token: Option<String>,
    ) -> ProviderResult<Page<InstanceTypeInfo>>;

    /// Instance types that can be launched pay-as-you-go somewhere in the region
    async fn describe_available_instance_types(&self, region: &str) -> ProviderResult<Vec<String>>;

    async fn describe_spot_prices(&self, region: &str, instance_type: &str) -> ProviderResult<Vec<ZoneSpotPrice>>;

    /// Plain GET of a public document
    async fn fetch_text(&self, url: &str) -> ProviderResult<String>;
}

pub fn ecs_arch(cpu_architecture: &str) -> Arch {
    match cpu_architecture {
        "ARM" => Arch::Arm64,
        _ => Arch::Amd64,
    }
}

/// Locate the versioned price manifest base URL on the pricing page
pub fn find_manifest_url(page: &str) -> ProviderResult<String> {
    let pattern = Regex::new(MANIFEST_URL_PATTERN).map_err(|e| ProviderError::ParseError(e.to_string()))?;
    pattern
        .find(page)
        .map(|m| format!("{}/{}", m.as_str().trim_end_matches('/'), MANIFEST_PATH))
        .ok_or_else(|| ProviderError::ParseError("price manifest URL not found on pricing page".to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceManifest {
    #[serde(default)]
    pricing_info: BTreeMap<String, PriceManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct PriceManifestEntry {
    #[serde(default)]
    hours: Vec<HourlyPrice>,
}

#[derive(Debug, Deserialize)]
struct HourlyPrice {
    #[serde(default)]
    price: String,
}

/// On-demand Linux prices by region, then instance type.
///
/// Manifest keys read `region::instanceType::<network>::os`; records of other
/// operating systems and records without a usable price are skipped.
pub fn parse_price_manifest(raw: &str) -> ProviderResult<BTreeMap<String, BTreeMap<String, f64>>> {
    let manifest: PriceManifest = serde_json::from_str(raw).map_err(|e| ProviderError::ParseError(e.to_string()))?;

    let mut prices: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for (key, entry) in manifest.pricing_info {
        let parts: Vec<&str> = key.split("::").collect();
        let [region, instance_type, _, os, ..] = parts.as_slice() else {
            debug!(provider = PROVIDER, key = %key, "Skipping malformed manifest key");
            continue;
        };
        if *os != "linux" {
            continue;
        }
        let Some(price) = entry.hours.first().and_then(|h| parse_price(&h.price)) else {
            debug!(provider = PROVIDER, key = %key, "Skipping manifest record without price");
            continue;
        };
        prices
            .entry(region.to_string())
            .or_default()
            .insert(instance_type.to_string(), price);
    }
    Ok(prices)
}

/// Instance types of a region with their hardware description.
///
/// Only types launchable pay-as-you-go in the region are kept; every type
/// is attributed all zones of the region.
pub async fn list_instance_types<A: AlibabaCloudApi + ?Sized>(
    api: &A,
    region: &str,
) -> ProviderResult<BTreeMap<String, InstanceSpec>> {
    let zones = api.describe_zones(region).await?;

    let mut types = Vec::new();
    let mut token = None;
    loop {
        let page = api.describe_instance_types_page(region, token).await?;
        token = page.next();
        types.extend(page.items);
        if token.is_none() {
            break;
        }
    }

    let available: BTreeSet<String> = api.describe_available_instance_types(region).await?.into_iter().collect();

    Ok(types
        .into_iter()
        .filter(|t| available.contains(&t.instance_type_id))
        .map(|t| {
            let spec = InstanceSpec {
                arch: ecs_arch(&t.cpu_architecture),
                vcpu: t.cpu_core_count,
                memory: t.memory_size,
                gpu: t.gpu_amount,
                zones: zones.clone(),
            };
            (t.instance_type_id, spec)
        })
        .collect())
}

/// Alibaba Cloud price client: refreshes one store from the ECS API and
/// the public price manifest
pub struct AlibabaCloudPriceClient<A> {
    api: Arc<A>,
    store: PriceStore,
    regions: Vec<String>,
    region_concurrency: usize,
    instance_concurrency: usize,
}

impl<A: AlibabaCloudApi> AlibabaCloudPriceClient<A> {
    /// Resolve the region list once; failing to list regions is fatal
    pub async fn connect(
        api: A,
        store: PriceStore,
        region_concurrency: usize,
        instance_concurrency: usize,
    ) -> ProviderResult<Self> {
        let regions: Vec<String> = api
            .describe_regions()
            .await?
            .into_iter()
            .filter(|region| !REGION_DENYLIST.contains(&region.as_str()))
            .collect();
        info!(provider = PROVIDER, regions = regions.len(), "Resolved Alibaba Cloud regions");

        Ok(Self {
            api: Arc::new(api),
            store,
            regions,
            region_concurrency,
            instance_concurrency,
        })
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn store(&self) -> &PriceStore {
        &self.store
    }

    fn target_regions(&self, target: &RegionTypeKey) -> Vec<String> {
        match target.region() {
            Some(region) => vec![region.to_string()],
            None => self.regions.clone(),
        }
    }

    async fn fetch_on_demand_prices(&self) -> ProviderResult<BTreeMap<String, BTreeMap<String, f64>>> {
        let page = self.api.fetch_text(PRICING_PAGE_URL).await?;
        let manifest_url = find_manifest_url(&page)?;
        debug!(provider = PROVIDER, url = %manifest_url, "Fetching price manifest");
        let manifest = self.api.fetch_text(&manifest_url).await?;
        parse_price_manifest(&manifest)
    }
}

#[async_trait]
impl<A: AlibabaCloudApi> PriceRefresher for AlibabaCloudPriceClient<A> {
    fn provider(&self) -> CloudProvider {
        CloudProvider::AlibabaCloud
    }

    async fn refresh_on_demand(&self, target: &RegionTypeKey) {
        let mut timer = RefreshTimer::start(PROVIDER, "on_demand");
        let prices = match self.fetch_on_demand_prices().await {
            Ok(prices) => Arc::new(prices),
            Err(e) => {
                warn!(provider = PROVIDER, error = %e, "Failed to fetch on-demand price manifest, skipping refresh");
                return;
            }
        };
        let regions = self.target_regions(target);
        info!(provider = PROVIDER, regions = regions.len(), "Refreshing on-demand prices");

        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let outcomes = map_bounded(self.region_concurrency, regions, move |region| {
            let api = Arc::clone(&api);
            let store = store.clone();
            let prices = Arc::clone(&prices);
            async move {
                let outcome = async {
                    let types = list_instance_types(api.as_ref(), &region).await?;
                    let regional = prices.get(&region);
                    let updates: Vec<(String, PriceUpdate)> = types
                        .into_iter()
                        .map(|(instance_type, spec)| {
                            let mut update = PriceUpdate::spec(spec);
                            update.on_demand_price_per_hour =
                                regional.and_then(|p| p.get(&instance_type)).copied();
                            (instance_type, update)
                        })
                        .collect();
                    let merged = updates.len();
                    store.merge_many(&region, updates).await;
                    Ok::<_, ProviderError>(merged)
                }
                .await;
                (region, outcome)
            }
        })
        .await;

        timer.set_units(tally_region_outcomes(PROVIDER, "on_demand", outcomes));
        timer.finish();
        report_catalog_size(CloudProvider::AlibabaCloud, &self.store).await;
    }

    async fn refresh_spot(&self, target: &RegionTypeKey) {
        let mut timer = RefreshTimer::start(PROVIDER, "spot");
        let regions = self.target_regions(target);
        info!(provider = PROVIDER, regions = regions.len(), "Refreshing spot prices");

        let api = Arc::clone(&self.api);
        let listed = map_bounded(self.region_concurrency, regions, move |region| {
            let api = Arc::clone(&api);
            async move {
                let outcome = list_instance_types(api.as_ref(), &region).await;
                (region, outcome)
            }
        })
        .await;

        let mut units = Vec::new();
        for (region, outcome) in listed {
            match outcome {
                Ok(types) => units.extend(
                    types
                        .into_iter()
                        .filter(|(instance_type, _)| target.instance_type().is_none_or(|t| t == instance_type.as_str()))
                        .map(|(instance_type, spec)| (region.clone(), instance_type, spec)),
                ),
                Err(e) => {
                    warn!(provider = PROVIDER, region = %region, error = %e, "Failed to list instance types");
                    PricingMetrics::record_unit_failed(PROVIDER, "spot", &region, &e.to_string());
                }
            }
        }
        debug!(provider = PROVIDER, units = units.len(), "Fetching spot prices");

        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let outcomes = map_bounded(self.instance_concurrency, units, move |(region, instance_type, spec)| {
            let api = Arc::clone(&api);
            let store = store.clone();
            async move {
                match api.describe_spot_prices(&region, &instance_type).await {
                    Ok(points) => {
                        let prices: BTreeMap<String, f64> = points
                            .into_iter()
                            .filter(|p| p.spot_price > 0.0)
                            .map(|p| (p.zone_id, p.spot_price))
                            .collect();
                        if prices.is_empty() {
                            debug!(provider = PROVIDER, region = %region, instance_type = %instance_type, "No spot price available");
                        }
                        store
                            .merge(&region, &instance_type, PriceUpdate::spec(spec).with_spot_prices(prices))
                            .await;
                        true
                    }
                    Err(e) => {
                        warn!(provider = PROVIDER, region = %region, instance_type = %instance_type, error = %e, "Failed to fetch spot price");
                        PricingMetrics::record_unit_failed(PROVIDER, "spot", &region, &e.to_string());
                        false
                    }
                }
            }
        })
        .await;

        timer.set_units(outcomes.into_iter().filter(|ok| *ok).count());
        timer.finish();
        report_catalog_size(CloudProvider::AlibabaCloud, &self.store).await;
    }
}

fn percent_encode(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// Sorted, percent-encoded `key=value` pairs joined with `&`
pub fn canonical_query(params: &BTreeMap<&str, &str>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn string_to_sign(canonical_query: &str) -> String {
    format!("GET&{}&{}", percent_encode("/"), percent_encode(canonical_query))
}

/// Base64 HMAC-SHA1 of `string_to_sign` keyed with `secret&`
pub fn sign(secret_access_key: &str, string_to_sign: &str) -> ProviderResult<String> {
    let mut mac = HmacSha1::new_from_slice(format!("{secret_access_key}&").as_bytes())
        .map_err(|e| ProviderError::AuthError(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Signed query string of one RPC call
pub fn signed_query(
    credentials: &AccessKeyPair,
    action: &str,
    region: &str,
    params: &[(&str, &str)],
    timestamp: DateTime<Utc>,
    nonce: &str,
) -> ProviderResult<String> {
    let timestamp = timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let mut all = BTreeMap::from([
        ("AccessKeyId", credentials.access_key_id.as_str()),
        ("Action", action),
        ("Format", "JSON"),
        ("RegionId", region),
        ("SignatureMethod", "HMAC-SHA1"),
        ("SignatureNonce", nonce),
        ("SignatureVersion", "1.0"),
        ("Timestamp", timestamp.as_str()),
        ("Version", API_VERSION),
    ]);
    all.extend(params.iter().copied());

    let canonical = canonical_query(&all);
    let signature = sign(&credentials.secret_access_key, &string_to_sign(&canonical))?;
    Ok(format!("{canonical}&Signature={}", percent_encode(&signature)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeRegionsResponse {
    #[serde(default)]
    regions: RegionList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionList {
    #[serde(default)]
    region: Vec<RegionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionItem {
    region_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeZonesResponse {
    #[serde(default)]
    zones: ZoneList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ZoneList {
    #[serde(default)]
    zone: Vec<ZoneItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ZoneItem {
    zone_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstanceTypesResponse {
    #[serde(default)]
    instance_types: InstanceTypeList,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceTypeList {
    #[serde(default)]
    instance_type: Vec<InstanceTypeInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeAvailableResourceResponse {
    #[serde(default)]
    available_zones: AvailableZoneList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AvailableZoneList {
    #[serde(default)]
    available_zone: Vec<AvailableZone>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AvailableZone {
    #[serde(default)]
    available_resources: AvailableResourceList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AvailableResourceList {
    #[serde(default)]
    available_resource: Vec<AvailableResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AvailableResource {
    #[serde(default)]
    supported_resources: SupportedResourceList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupportedResourceList {
    #[serde(default)]
    supported_resource: Vec<SupportedResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupportedResource {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSpotPriceHistoryResponse {
    #[serde(default)]
    spot_prices: SpotPriceList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpotPriceList {
    #[serde(default)]
    spot_price_type: Vec<ZoneSpotPrice>,
}

/// [`AlibabaCloudApi`] over signed ECS RPC calls
pub struct RpcAlibabaCloudApi {
    http: reqwest::Client,
    credentials: Vec<AccessKeyPair>,
    endpoint: Option<String>,
}

impl RpcAlibabaCloudApi {
    pub fn new(credentials: Vec<AccessKeyPair>) -> ProviderResult<Self> {
        Self::with_client(reqwest::Client::new(), credentials)
    }

    pub fn with_client(http: reqwest::Client, credentials: Vec<AccessKeyPair>) -> ProviderResult<Self> {
        if credentials.is_empty() {
            return Err(ProviderError::AuthError("empty credential pool".to_string()));
        }
        Ok(Self {
            http,
            credentials,
            endpoint: None,
        })
    }

    /// Send every RPC call to `endpoint` instead of the regional ECS endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn pick_credentials(&self) -> ProviderResult<&AccessKeyPair> {
        let index = rand::random_range(0..self.credentials.len().max(1));
        self.credentials
            .get(index)
            .ok_or_else(|| ProviderError::AuthError("empty credential pool".to_string()))
    }

    fn endpoint(&self, region: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://ecs.{region}.aliyuncs.com"),
        }
    }

    async fn call<T: DeserializeOwned>(&self, region: &str, action: &str, params: &[(&str, &str)]) -> ProviderResult<T> {
        let credentials = self.pick_credentials()?;
        let query = signed_query(
            credentials,
            action,
            region,
            params,
            Utc::now(),
            &Uuid::new_v4().to_string(),
        )?;
        let url = format!("{}/?{query}", self.endpoint(region));

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::ApiError(format!("{action} in {region} returned {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| ProviderError::ParseError(format!("{action}: {e}")))
    }
}

#[async_trait]
impl AlibabaCloudApi for RpcAlibabaCloudApi {
    async fn describe_regions(&self) -> ProviderResult<Vec<String>> {
        let response: DescribeRegionsResponse = self.call(BOOTSTRAP_REGION, "DescribeRegions", &[]).await?;
        Ok(response.regions.region.into_iter().map(|r| r.region_id).collect())
    }

    async fn describe_zones(&self, region: &str) -> ProviderResult<Vec<String>> {
        let response: DescribeZonesResponse = self.call(region, "DescribeZones", &[]).await?;
        Ok(response.zones.zone.into_iter().map(|z| z.zone_id).collect())
    }

    async fn describe_instance_types_page(
        &self,
        region: &str,
        next_token: Option<String>,
    ) -> ProviderResult<Page<InstanceTypeInfo>> {
        let mut params = vec![("MaxResults", INSTANCE_TYPES_PAGE_SIZE)];
        if let Some(token) = next_token.as_deref() {
            params.push(("NextToken", token));
        }
        let response: DescribeInstanceTypesResponse = self.call(region, "DescribeInstanceTypes", &params).await?;
        Ok(Page {
            items: response.instance_types.instance_type,
            next_token: response.next_token,
        })
    }

    async fn describe_available_instance_types(&self, region: &str) -> ProviderResult<Vec<String>> {
        let response: DescribeAvailableResourceResponse = self
            .call(
                region,
                "DescribeAvailableResource",
                &[("DestinationResource", "InstanceType"), ("InstanceChargeType", "PostPaid")],
            )
            .await?;

        let supported: BTreeSet<String> = response
            .available_zones
            .available_zone
            .into_iter()
            .flat_map(|zone| zone.available_resources.available_resource)
            .flat_map(|resource| resource.supported_resources.supported_resource)
            .map(|r| r.value)
            .filter(|value| !value.is_empty())
            .collect();
        Ok(supported.into_iter().collect())
    }

    async fn describe_spot_prices(&self, region: &str, instance_type: &str) -> ProviderResult<Vec<ZoneSpotPrice>> {
        let response: DescribeSpotPriceHistoryResponse = self
            .call(
                region,
                "DescribeSpotPriceHistory",
                &[
                    ("InstanceType", instance_type),
                    ("NetworkType", "vpc"),
                    ("StartTime", SPOT_HISTORY_START),
                ],
            )
            .await?;
        Ok(response.spot_prices.spot_price_type)
    }

    async fn fetch_text(&self, url: &str) -> ProviderResult<String> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}
