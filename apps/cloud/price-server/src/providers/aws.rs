//! AWS Pricing Provider
//!
//! - On-demand prices and hardware specs: Price List query API (`GetProducts`)
//! - Spot prices: EC2 `DescribeSpotPriceHistory`
//! - Savings plan rates: `DescribeSavingsPlansOfferingRates`
//!
//! Regions of the China partition are served with their own credentials
//! and priced in CNY.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ec2::config::Credentials;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::Filter as Ec2Filter;
use aws_sdk_pricing::types::{Filter as PricingFilter, FilterType};
use aws_sdk_savingsplans::types::{
    SavingsPlanOfferingRateFilterElement, SavingsPlanPaymentOption, SavingsPlanRateFilterAttribute,
    SavingsPlanType,
};
use chrono::{DateTime, Utc};
use domain_pricing::{
    commitment_key, map_bounded, Arch, CloudProvider, InstanceSpec, PaymentOption, PriceRefresher,
    PriceStore, PriceUpdate, RegionTypeKey,
};
use observability::RefreshTimer;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{parse_price, report_catalog_size, tally_region_outcomes, Page, ProviderError, ProviderResult};
use crate::config::AwsCredentials;

/// Region used to list the regions of the global partition
pub const GLOBAL_BOOTSTRAP_REGION: &str = "us-east-2";
/// Region used to list the regions of the China partition
pub const CHINA_BOOTSTRAP_REGION: &str = "cn-north-1";

const PROVIDER: &str = "aws";
const SPOT_PRODUCT_DESCRIPTION: &str = "Linux/UNIX";

/// TERM_MATCH filters shared by every on-demand price query
const ON_DEMAND_FILTERS: [(&str, &str); 7] = [
    ("tenancy", "Shared"),
    ("productFamily", "Compute Instance"),
    ("serviceCode", "AmazonEC2"),
    ("preInstalledSw", "NA"),
    ("operatingSystem", "Linux"),
    ("capacitystatus", "Used"),
    ("marketoption", "OnDemand"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ProductsQuery {
    /// Region hosting the Price List endpoint
    pub endpoint_region: String,
    pub region: String,
    pub instance_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotPriceQuery {
    pub region: String,
    pub instance_type: Option<String>,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavingsPlanQuery {
    pub region: String,
    pub instance_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotPricePoint {
    pub instance_type: String,
    pub zone: String,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavingsPlanRate {
    pub plan_type: String,
    pub duration_seconds: i64,
    pub payment_option: PaymentOption,
    pub instance_type: Option<String>,
    pub rate: String,
}

/// Remote AWS operations used by the refresh pipelines
#[async_trait]
pub trait AwsPriceApi: Send + Sync + 'static {
    /// Regions of the partition `bootstrap_region` belongs to
    async fn describe_regions(&self, bootstrap_region: &str) -> ProviderResult<Vec<String>>;

    async fn availability_zones(&self, region: &str) -> ProviderResult<Vec<String>>;

    /// One page of raw Price List JSON documents
    async fn products_page(
        &self,
        query: &ProductsQuery,
        next_token: Option<String>,
    ) -> ProviderResult<Page<String>>;

    async fn spot_price_page(
        &self,
        query: &SpotPriceQuery,
        next_token: Option<String>,
    ) -> ProviderResult<Page<SpotPricePoint>>;

    async fn savings_plan_rates_page(
        &self,
        query: &SavingsPlanQuery,
        next_token: Option<String>,
    ) -> ProviderResult<Page<SavingsPlanRate>>;
}

/// Region hosting the Price List endpoint that serves `region`
pub fn pricing_endpoint_region(region: &str) -> &'static str {
    if region.starts_with("ap-") {
        "ap-south-1"
    } else if region.starts_with("cn-") {
        "cn-northwest-1"
    } else if region.starts_with("eu-") {
        "eu-central-1"
    } else {
        "us-east-1"
    }
}

/// Currency of the on-demand price list of `region`
pub fn currency_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") { "CNY" } else { "USD" }
}

/// Architecture from the instance type name: a `g` as third character means Graviton
pub fn extract_arch(instance_type: &str) -> Option<Arch> {
    match instance_type.as_bytes() {
        [_, _, b'g', ..] => Some(Arch::Arm64),
        [_, _, _, ..] => Some(Arch::Amd64),
        _ => None,
    }
}

/// Parse `"<n> GiB"`, tolerating thousands separators
pub fn parse_memory(raw: &str) -> Option<f64> {
    raw.trim()
        .trim_end_matches("GiB")
        .trim()
        .replace(',', "")
        .parse()
        .ok()
}

#[derive(Debug, Deserialize)]
struct PriceListItem {
    product: Product,
    #[serde(default)]
    terms: Terms,
}

#[derive(Debug, Deserialize)]
struct Product {
    attributes: ProductAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductAttributes {
    instance_type: String,
    vcpu: String,
    memory: String,
    #[serde(default)]
    gpu: String,
}

#[derive(Debug, Default, Deserialize)]
struct Terms {
    #[serde(rename = "OnDemand", default)]
    on_demand: BTreeMap<String, OfferTerm>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferTerm {
    #[serde(default)]
    price_dimensions: BTreeMap<String, PriceDimension>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceDimension {
    #[serde(default)]
    price_per_unit: BTreeMap<String, String>,
}

/// Turn one Price List document into an update of its instance type
fn parse_product(raw: &str, region: &str, zones: &[String]) -> ProviderResult<(String, PriceUpdate)> {
    let item: PriceListItem =
        serde_json::from_str(raw).map_err(|e| ProviderError::ParseError(e.to_string()))?;
    let attributes = item.product.attributes;
    let instance_type = attributes.instance_type;

    let arch = extract_arch(&instance_type)
        .ok_or_else(|| ProviderError::ParseError(format!("invalid instance type '{instance_type}'")))?;
    let vcpu = attributes
        .vcpu
        .trim()
        .parse::<f64>()
        .map_err(|e| ProviderError::ParseError(format!("vcpu '{}': {e}", attributes.vcpu)))?;
    let memory = parse_memory(&attributes.memory)
        .ok_or_else(|| ProviderError::ParseError(format!("memory '{}'", attributes.memory)))?;
    let gpu = match attributes.gpu.trim() {
        "" => 0.0,
        raw => raw
            .parse::<f64>()
            .map_err(|e| ProviderError::ParseError(format!("gpu '{raw}': {e}")))?,
    };

    let currency = currency_for_region(region);
    let on_demand = item
        .terms
        .on_demand
        .values()
        .flat_map(|term| term.price_dimensions.values())
        .filter_map(|dimension| dimension.price_per_unit.get(currency))
        .filter_map(|price| parse_price(price))
        .last();

    let mut update = PriceUpdate::spec(InstanceSpec {
        arch,
        vcpu,
        memory,
        gpu,
        zones: zones.to_vec(),
    });
    update.on_demand_price_per_hour = on_demand;
    Ok((instance_type, update))
}

/// AWS price client: refreshes one store from the AWS APIs
pub struct AwsPriceClient<A> {
    api: Arc<A>,
    store: PriceStore,
    region_concurrency: usize,
}

impl<A: AwsPriceApi> AwsPriceClient<A> {
    pub fn new(api: A, store: PriceStore, region_concurrency: usize) -> Self {
        Self {
            api: Arc::new(api),
            store,
            region_concurrency,
        }
    }

    pub fn store(&self) -> &PriceStore {
        &self.store
    }

    /// Regions of the global partition followed by those of the China partition
    pub async fn list_regions(&self) -> ProviderResult<Vec<String>> {
        let mut regions = self.api.describe_regions(GLOBAL_BOOTSTRAP_REGION).await?;
        regions.extend(self.api.describe_regions(CHINA_BOOTSTRAP_REGION).await?);
        Ok(regions)
    }

    async fn target_regions(&self, target: &RegionTypeKey, dimension: &str) -> Option<Vec<String>> {
        if let Some(region) = target.region() {
            return Some(vec![region.to_string()]);
        }
        match self.list_regions().await {
            Ok(regions) => Some(regions),
            Err(e) => {
                warn!(provider = PROVIDER, dimension = dimension, error = %e, "Failed to list regions, skipping refresh");
                None
            }
        }
    }

    async fn finish_cycle(&self, mut timer: RefreshTimer, dimension: &str, outcomes: Vec<(String, ProviderResult<usize>)>) {
        timer.set_units(tally_region_outcomes(PROVIDER, dimension, outcomes));
        timer.finish();
        report_catalog_size(CloudProvider::Aws, &self.store).await;
    }
}

#[async_trait]
impl<A: AwsPriceApi> PriceRefresher for AwsPriceClient<A> {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    async fn refresh_on_demand(&self, target: &RegionTypeKey) {
        let timer = RefreshTimer::start(PROVIDER, "on_demand");
        let Some(regions) = self.target_regions(target, "on_demand").await else {
            return;
        };
        info!(provider = PROVIDER, regions = regions.len(), "Refreshing on-demand prices");

        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let instance_type = target.instance_type().map(str::to_string);
        let outcomes = map_bounded(self.region_concurrency, regions, move |region| {
            let api = Arc::clone(&api);
            let store = store.clone();
            let query = ProductsQuery {
                endpoint_region: pricing_endpoint_region(&region).to_string(),
                region: region.clone(),
                instance_type: instance_type.clone(),
            };
            async move { (region, refresh_region_on_demand(api.as_ref(), &store, query).await) }
        })
        .await;

        self.finish_cycle(timer, "on_demand", outcomes).await;
    }

    async fn refresh_spot(&self, target: &RegionTypeKey) {
        let timer = RefreshTimer::start(PROVIDER, "spot");
        // One instant for the whole cycle: AWS then answers the price in effect per zone
        let start_time = Utc::now();
        let Some(regions) = self.target_regions(target, "spot").await else {
            return;
        };
        info!(provider = PROVIDER, regions = regions.len(), "Refreshing spot prices");

        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let instance_type = target.instance_type().map(str::to_string);
        let outcomes = map_bounded(self.region_concurrency, regions, move |region| {
            let api = Arc::clone(&api);
            let store = store.clone();
            let query = SpotPriceQuery {
                region: region.clone(),
                instance_type: instance_type.clone(),
                start_time,
            };
            async move { (region, refresh_region_spot(api.as_ref(), &store, query).await) }
        })
        .await;

        self.finish_cycle(timer, "spot", outcomes).await;
    }

    async fn refresh_commitment_plans(&self, target: &RegionTypeKey) {
        let timer = RefreshTimer::start(PROVIDER, "commitment");
        let Some(regions) = self.target_regions(target, "commitment").await else {
            return;
        };
        info!(provider = PROVIDER, regions = regions.len(), "Refreshing savings plan rates");

        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let instance_type = target.instance_type().map(str::to_string);
        let outcomes = map_bounded(self.region_concurrency, regions, move |region| {
            let api = Arc::clone(&api);
            let store = store.clone();
            let query = SavingsPlanQuery {
                region: region.clone(),
                instance_type: instance_type.clone(),
            };
            async move { (region, refresh_region_commitment(api.as_ref(), &store, query).await) }
        })
        .await;

        self.finish_cycle(timer, "commitment", outcomes).await;
    }
}

async fn refresh_region_on_demand<A: AwsPriceApi + ?Sized>(
    api: &A,
    store: &PriceStore,
    query: ProductsQuery,
) -> ProviderResult<usize> {
    let region = query.region.as_str();
    let zones = api.availability_zones(region).await?;

    let mut merged = 0;
    let mut token = None;
    loop {
        let page = api.products_page(&query, token).await?;
        let updates: Vec<(String, PriceUpdate)> = page
            .items
            .iter()
            .filter_map(|raw| match parse_product(raw, region, &zones) {
                Ok(update) => Some(update),
                Err(e) => {
                    debug!(provider = PROVIDER, region = region, error = %e, "Skipping price list record");
                    None
                }
            })
            .collect();
        merged += updates.len();
        store.merge_many(region, updates).await;

        token = page.next();
        if token.is_none() {
            break;
        }
    }

    debug!(provider = PROVIDER, region = region, records = merged, "On-demand prices merged");
    Ok(merged)
}

async fn refresh_region_spot<A: AwsPriceApi + ?Sized>(
    api: &A,
    store: &PriceStore,
    query: SpotPriceQuery,
) -> ProviderResult<usize> {
    let region = query.region.as_str();

    let mut merged = 0;
    let mut token = None;
    loop {
        let page = api.spot_price_page(&query, token).await?;
        let mut by_type: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for point in &page.items {
            match parse_price(&point.price) {
                Some(price) if !point.instance_type.is_empty() => {
                    by_type
                        .entry(point.instance_type.clone())
                        .or_default()
                        .insert(point.zone.clone(), price);
                }
                _ => debug!(
                    provider = PROVIDER,
                    region = region,
                    instance_type = %point.instance_type,
                    price = %point.price,
                    "Skipping spot price"
                ),
            }
        }
        merged += by_type.len();
        store
            .merge_many(
                region,
                by_type
                    .into_iter()
                    .map(|(instance_type, zones)| (instance_type, PriceUpdate::default().with_spot_prices(zones))),
            )
            .await;

        token = page.next();
        if token.is_none() {
            break;
        }
    }

    debug!(provider = PROVIDER, region = region, records = merged, "Spot prices merged");
    Ok(merged)
}

async fn refresh_region_commitment<A: AwsPriceApi + ?Sized>(
    api: &A,
    store: &PriceStore,
    query: SavingsPlanQuery,
) -> ProviderResult<usize> {
    let region = query.region.as_str();

    let mut merged = 0;
    let mut token = None;
    loop {
        let page = api.savings_plan_rates_page(&query, token).await?;
        let mut by_type: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for rate in &page.items {
            let Some(instance_type) = &rate.instance_type else {
                debug!(provider = PROVIDER, region = region, "Savings plan rate without instance type");
                continue;
            };
            let Ok(value) = rate.rate.trim().parse::<f64>() else {
                debug!(provider = PROVIDER, region = region, rate = %rate.rate, "Unparsable savings plan rate");
                continue;
            };
            by_type
                .entry(instance_type.clone())
                .or_default()
                .insert(commitment_key(&rate.plan_type, rate.duration_seconds, rate.payment_option), value);
        }
        merged += by_type.len();
        store
            .merge_many(
                region,
                by_type.into_iter().map(|(instance_type, rates)| {
                    let update = PriceUpdate {
                        commitment_rates: rates,
                        ..Default::default()
                    };
                    (instance_type, update)
                }),
            )
            .await;

        token = page.next();
        if token.is_none() {
            break;
        }
    }

    debug!(provider = PROVIDER, region = region, records = merged, "Savings plan rates merged");
    Ok(merged)
}

/// [`AwsPriceApi`] backed by the AWS SDK
pub struct SdkAwsApi {
    credentials: AwsCredentials,
}

impl SdkAwsApi {
    pub fn new(credentials: AwsCredentials) -> Self {
        Self { credentials }
    }

    /// SDK configuration for `region`, signed with its partition's credentials
    async fn sdk_config(&self, region: &str) -> SdkConfig {
        let pair = self.credentials.for_region(region);
        let credentials = Credentials::new(
            pair.access_key_id.clone(),
            pair.secret_access_key.clone(),
            None,
            None,
            "price-server",
        );
        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .load()
            .await
    }

    async fn ec2(&self, region: &str) -> aws_sdk_ec2::Client {
        aws_sdk_ec2::Client::new(&self.sdk_config(region).await)
    }
}

fn sdk_error<E>(err: E) -> ProviderError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ProviderError::ApiError(DisplayErrorContext(err).to_string())
}

fn term_match(field: &str, value: &str) -> ProviderResult<PricingFilter> {
    PricingFilter::builder()
        .r#type(FilterType::TermMatch)
        .field(field)
        .value(value)
        .build()
        .map_err(|e| ProviderError::ApiError(e.to_string()))
}

fn rate_filter(name: SavingsPlanRateFilterAttribute, value: &str) -> SavingsPlanOfferingRateFilterElement {
    SavingsPlanOfferingRateFilterElement::builder()
        .name(name)
        .values(value)
        .build()
}

fn payment_option(option: &SavingsPlanPaymentOption) -> PaymentOption {
    match option {
        SavingsPlanPaymentOption::AllUpfront => PaymentOption::AllUpfront,
        SavingsPlanPaymentOption::PartialUpfront => PaymentOption::PartialUpfront,
        _ => PaymentOption::NoUpfront,
    }
}

#[async_trait]
impl AwsPriceApi for SdkAwsApi {
    async fn describe_regions(&self, bootstrap_region: &str) -> ProviderResult<Vec<String>> {
        let output = self
            .ec2(bootstrap_region)
            .await
            .describe_regions()
            .all_regions(true)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(output
            .regions()
            .iter()
            .filter_map(|r| r.region_name())
            .map(str::to_string)
            .collect())
    }

    async fn availability_zones(&self, region: &str) -> ProviderResult<Vec<String>> {
        let output = self
            .ec2(region)
            .await
            .describe_availability_zones()
            .filters(Ec2Filter::builder().name("region-name").values(region).build())
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(output
            .availability_zones()
            .iter()
            .filter_map(|z| z.zone_name())
            .map(str::to_string)
            .collect())
    }

    async fn products_page(
        &self,
        query: &ProductsQuery,
        next_token: Option<String>,
    ) -> ProviderResult<Page<String>> {
        let mut filters = vec![term_match("regionCode", &query.region)?];
        for (field, value) in ON_DEMAND_FILTERS {
            filters.push(term_match(field, value)?);
        }
        if let Some(instance_type) = &query.instance_type {
            filters.push(term_match("instanceType", instance_type)?);
        }

        let client = aws_sdk_pricing::Client::new(&self.sdk_config(&query.endpoint_region).await);
        let output = client
            .get_products()
            .service_code("AmazonEC2")
            .set_filters(Some(filters))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(Page {
            items: output.price_list().to_vec(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn spot_price_page(
        &self,
        query: &SpotPriceQuery,
        next_token: Option<String>,
    ) -> ProviderResult<Page<SpotPricePoint>> {
        let mut request = self
            .ec2(&query.region)
            .await
            .describe_spot_price_history()
            .filters(
                Ec2Filter::builder()
                    .name("product-description")
                    .values(SPOT_PRODUCT_DESCRIPTION)
                    .build(),
            )
            .start_time(aws_sdk_ec2::primitives::DateTime::from_secs(query.start_time.timestamp()))
            .set_next_token(next_token);
        if let Some(instance_type) = &query.instance_type {
            request = request.filters(
                Ec2Filter::builder()
                    .name("instance-type")
                    .values(instance_type)
                    .build(),
            );
        }
        let output = request.send().await.map_err(sdk_error)?;

        let items = output
            .spot_price_history()
            .iter()
            .filter_map(|point| {
                Some(SpotPricePoint {
                    instance_type: point.instance_type()?.as_str().to_string(),
                    zone: point.availability_zone()?.to_string(),
                    price: point.spot_price()?.to_string(),
                })
            })
            .collect();
        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn savings_plan_rates_page(
        &self,
        query: &SavingsPlanQuery,
        next_token: Option<String>,
    ) -> ProviderResult<Page<SavingsPlanRate>> {
        let client = aws_sdk_savingsplans::Client::new(&self.sdk_config(&query.region).await);
        let mut request = client
            .describe_savings_plans_offering_rates()
            .filters(rate_filter(SavingsPlanRateFilterAttribute::ProductDescription, SPOT_PRODUCT_DESCRIPTION))
            .filters(rate_filter(SavingsPlanRateFilterAttribute::Tenancy, "shared"))
            .filters(rate_filter(SavingsPlanRateFilterAttribute::Region, &query.region))
            .savings_plan_payment_options(SavingsPlanPaymentOption::AllUpfront)
            .savings_plan_payment_options(SavingsPlanPaymentOption::PartialUpfront)
            .savings_plan_payment_options(SavingsPlanPaymentOption::NoUpfront)
            .savings_plan_types(SavingsPlanType::Compute)
            .savings_plan_types(SavingsPlanType::Ec2Instance)
            .set_next_token(next_token);
        if let Some(instance_type) = &query.instance_type {
            request = request.filters(rate_filter(SavingsPlanRateFilterAttribute::InstanceType, instance_type));
        }
        let output = request.send().await.map_err(sdk_error)?;

        let items = output
            .search_results()
            .iter()
            .filter_map(|rate| {
                let offering = rate.savings_plan_offering()?;
                Some(SavingsPlanRate {
                    plan_type: offering.plan_type()?.as_str().to_string(),
                    duration_seconds: offering.duration_seconds(),
                    payment_option: payment_option(offering.payment_option()?),
                    instance_type: rate
                        .properties()
                        .iter()
                        .find(|p| p.name() == Some("instanceType"))
                        .and_then(|p| p.value())
                        .map(str::to_string),
                    rate: rate.rate()?.to_string(),
                })
            })
            .collect();
        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }
}
