//! Configuration for the price server

use core_config::server::ServerConfig;
use core_config::{env_optional, env_parse, env_required, ConfigError, FromEnv};
use domain_pricing::scheduler::{DEFAULT_ON_DEMAND_INTERVAL, DEFAULT_SPOT_INTERVAL};
use domain_pricing::{SchedulerConfig, DEFAULT_TRIGGER_CAPACITY};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const ALIBABA_CLOUD_AKSK_POOL_ENV: &str = "ALIBABA_CLOUD_AKSK_POOL";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub aws: AwsCredentials,
    pub alibaba_cloud: AlibabaCloudConfig,
    pub refresh: RefreshConfig,
    pub seeds: SeedConfig,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            aws: AwsCredentials::from_env()?,
            alibaba_cloud: AlibabaCloudConfig::from_env()?,
            refresh: RefreshConfig::from_env()?,
            seeds: SeedConfig::from_env(),
        })
    }
}

/// Access key / secret key pair
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKeyPair {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl AccessKeyPair {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for AccessKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeyPair")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

/// AWS credentials of the global and China partitions
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub global: AccessKeyPair,
    pub china: AccessKeyPair,
}

impl AwsCredentials {
    /// Credentials of the partition the region belongs to
    pub fn for_region(&self, region: &str) -> &AccessKeyPair {
        if region.starts_with("cn-") {
            &self.china
        } else {
            &self.global
        }
    }
}

impl FromEnv for AwsCredentials {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            global: AccessKeyPair::new(
                env_required("AWS_GLOBAL_ACCESS_KEY_ID")?,
                env_required("AWS_GLOBAL_SECRET_ACCESS_KEY")?,
            ),
            china: AccessKeyPair::new(
                env_required("AWS_CN_ACCESS_KEY_ID")?,
                env_required("AWS_CN_SECRET_ACCESS_KEY")?,
            ),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AlibabaCloudConfig {
    /// Credential pool; every remote call picks one pair at random
    pub credentials: Vec<AccessKeyPair>,
}

impl FromEnv for AlibabaCloudConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw = env_required(ALIBABA_CLOUD_AKSK_POOL_ENV)?;
        let credentials = parse_aksk_pool(&raw);
        if credentials.is_empty() {
            return Err(ConfigError::Invalid {
                key: ALIBABA_CLOUD_AKSK_POOL_ENV.to_string(),
                details: "expected at least one 'ak:sk' pair".to_string(),
            });
        }
        Ok(Self { credentials })
    }
}

/// Parse `ak:sk,ak:sk,...`, skipping malformed entries
pub fn parse_aksk_pool(raw: &str) -> Vec<AccessKeyPair> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let mut parts = entry.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(ak), Some(sk), None) if !ak.is_empty() && !sk.is_empty() => {
                    Some(AccessKeyPair::new(ak, sk))
                }
                _ => None,
            }
        })
        .collect()
}

/// Refresh cadence and fan-out limits
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub on_demand_interval: Duration,
    pub spot_interval: Duration,
    pub region_concurrency: usize,
    pub instance_concurrency: usize,
    pub trigger_capacity: usize,
    pub initial_spot_refresh: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            on_demand_interval: DEFAULT_ON_DEMAND_INTERVAL,
            spot_interval: DEFAULT_SPOT_INTERVAL,
            region_concurrency: 10,
            instance_concurrency: 50,
            trigger_capacity: DEFAULT_TRIGGER_CAPACITY,
            initial_spot_refresh: true,
        }
    }
}

impl RefreshConfig {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            on_demand_interval: self.on_demand_interval,
            spot_interval: self.spot_interval,
            initial_spot_refresh: self.initial_spot_refresh,
        }
    }
}

impl FromEnv for RefreshConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            on_demand_interval: Duration::from_secs(positive(
                "PRICE_ON_DEMAND_INTERVAL_SECS",
                env_parse("PRICE_ON_DEMAND_INTERVAL_SECS", defaults.on_demand_interval.as_secs())?,
            )?),
            spot_interval: Duration::from_secs(positive(
                "PRICE_SPOT_INTERVAL_SECS",
                env_parse("PRICE_SPOT_INTERVAL_SECS", defaults.spot_interval.as_secs())?,
            )?),
            region_concurrency: positive(
                "PRICE_REGION_CONCURRENCY",
                env_parse("PRICE_REGION_CONCURRENCY", defaults.region_concurrency)?,
            )?,
            instance_concurrency: positive(
                "PRICE_INSTANCE_CONCURRENCY",
                env_parse("PRICE_INSTANCE_CONCURRENCY", defaults.instance_concurrency)?,
            )?,
            trigger_capacity: positive(
                "PRICE_TRIGGER_CAPACITY",
                env_parse("PRICE_TRIGGER_CAPACITY", defaults.trigger_capacity)?,
            )?,
            initial_spot_refresh: env_parse("PRICE_INITIAL_SPOT_REFRESH", defaults.initial_spot_refresh)?,
        })
    }
}

fn positive<T>(key: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key: key.to_string(),
            details: "must be greater than zero".to_string(),
        })
    }
}

/// Optional file overrides of the embedded seed snapshots
#[derive(Debug, Clone, Default)]
pub struct SeedConfig {
    pub aws_path: Option<PathBuf>,
    pub alibaba_cloud_path: Option<PathBuf>,
}

impl SeedConfig {
    pub fn from_env() -> Self {
        Self {
            aws_path: env_optional("AWS_PRICE_SEED_PATH").map(PathBuf::from),
            alibaba_cloud_path: env_optional("ALIBABA_CLOUD_PRICE_SEED_PATH").map(PathBuf::from),
        }
    }
}
