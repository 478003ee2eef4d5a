use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Cloud provider enumeration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    AlibabaCloud,
}

impl CloudProvider {
    /// Path prefix of the provider's read API
    pub fn api_prefix(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "/api/v1/aws/ec2",
            CloudProvider::AlibabaCloud => "/api/v1/alibabacloud/ecs",
        }
    }
}

/// CPU architecture of an instance type
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Arch {
    #[default]
    Amd64,
    Arm64,
}

/// A single commitment-plan rate (savings plan) in price per hour
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct CommitmentRate {
    pub rate: f64,
}

/// Payment option of a commitment plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum PaymentOption {
    AllUpfront,
    PartialUpfront,
    NoUpfront,
}

/// Build the commitment-rate key `"<planType>/<years>yr/<paymentOption>"`
pub fn commitment_key(plan_type: &str, duration_seconds: i64, payment: PaymentOption) -> String {
    const SECONDS_PER_YEAR: i64 = 60 * 60 * 24 * 365;
    format!(
        "{}/{}yr/{}",
        plan_type,
        duration_seconds / SECONDS_PER_YEAR,
        payment
    )
}

/// Merged price record of one instance type in one region
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceTypePrice {
    pub arch: Arch,
    pub vcpu: f64,
    /// Memory size in GiB
    pub memory: f64,
    pub gpu: f64,
    pub zones: Vec<String>,
    pub on_demand_price_per_hour: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub spot_price_per_hour: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub commitment_rates: BTreeMap<String, CommitmentRate>,
}

/// Hardware description of an instance type as reported by a provider
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstanceSpec {
    pub arch: Arch,
    pub vcpu: f64,
    pub memory: f64,
    pub gpu: f64,
    pub zones: Vec<String>,
}

/// Partial update of one instance type record.
///
/// Every `None`/empty field leaves the stored dimension untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceUpdate {
    pub spec: Option<InstanceSpec>,
    pub on_demand_price_per_hour: Option<f64>,
    /// Per-zone spot prices, merged zone by zone
    pub spot_price_per_hour: BTreeMap<String, f64>,
    /// Commitment rates, merged key by key
    pub commitment_rates: BTreeMap<String, f64>,
}

impl PriceUpdate {
    pub fn spec(spec: InstanceSpec) -> Self {
        Self {
            spec: Some(spec),
            ..Default::default()
        }
    }

    pub fn on_demand(price: f64) -> Self {
        Self {
            on_demand_price_per_hour: Some(price),
            ..Default::default()
        }
    }

    pub fn spot(zone: impl Into<String>, price: f64) -> Self {
        Self {
            spot_price_per_hour: BTreeMap::from([(zone.into(), price)]),
            ..Default::default()
        }
    }

    pub fn commitment(key: impl Into<String>, rate: f64) -> Self {
        Self {
            commitment_rates: BTreeMap::from([(key.into(), rate)]),
            ..Default::default()
        }
    }

    pub fn with_on_demand(mut self, price: f64) -> Self {
        self.on_demand_price_per_hour = Some(price);
        self
    }

    pub fn with_spot_prices(mut self, prices: BTreeMap<String, f64>) -> Self {
        self.spot_price_per_hour.extend(prices);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.spec.is_none()
            && self.on_demand_price_per_hour.is_none()
            && self.spot_price_per_hour.is_empty()
            && self.commitment_rates.is_empty()
    }
}

impl InstanceTypePrice {
    /// Apply a partial update, leaving every dimension it does not carry as is
    pub fn apply(&mut self, update: PriceUpdate) {
        if let Some(spec) = update.spec {
            self.arch = spec.arch;
            self.vcpu = spec.vcpu;
            self.memory = spec.memory;
            self.gpu = spec.gpu;
            self.zones = spec.zones;
        }
        if let Some(price) = update.on_demand_price_per_hour {
            self.on_demand_price_per_hour = price;
        }
        self.spot_price_per_hour.extend(update.spot_price_per_hour);
        self.commitment_rates.extend(
            update
                .commitment_rates
                .into_iter()
                .map(|(key, rate)| (key, CommitmentRate { rate })),
        );
    }
}

/// Instance type prices of one region
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegionalInstancePrice {
    #[serde(default)]
    pub instance_type_prices: BTreeMap<String, InstanceTypePrice>,
}

/// The whole catalog: region name to its instance type prices
pub type PriceCatalog = BTreeMap<String, RegionalInstancePrice>;

/// A lazy refresh request.
///
/// An empty `instance_type` means the whole region, an empty `region` means
/// every region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionTypeKey {
    pub region: String,
    pub instance_type: String,
}

impl RegionTypeKey {
    pub fn new(region: impl Into<String>, instance_type: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            instance_type: instance_type.into(),
        }
    }

    /// Every region, every instance type
    pub fn all() -> Self {
        Self::default()
    }

    pub fn region(&self) -> Option<&str> {
        (!self.region.is_empty()).then_some(self.region.as_str())
    }

    pub fn instance_type(&self) -> Option<&str> {
        (!self.instance_type.is_empty()).then_some(self.instance_type.as_str())
    }
}
