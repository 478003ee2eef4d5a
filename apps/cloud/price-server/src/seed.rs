//! Builtin price catalog snapshots.
//!
//! Both snapshots are embedded at build time. A configured file path
//! replaces the embedded bytes; the selected bytes are handed to client
//! construction explicitly.

use domain_pricing::CloudProvider;
use eyre::{Result, WrapErr};
use std::borrow::Cow;
use std::path::Path;
use tracing::info;

use crate::config::SeedConfig;

const AWS_SEED: &[u8] = include_bytes!("../builtin-data/aws_price.json");
const ALIBABA_CLOUD_SEED: &[u8] = include_bytes!("../builtin-data/alibabacloud_price.json");

/// File name of a provider's snapshot, as written by `snapshot`
pub fn seed_file_name(provider: CloudProvider) -> &'static str {
    match provider {
        CloudProvider::Aws => "aws_price.json",
        CloudProvider::AlibabaCloud => "alibabacloud_price.json",
    }
}

pub fn embedded_seed(provider: CloudProvider) -> &'static [u8] {
    match provider {
        CloudProvider::Aws => AWS_SEED,
        CloudProvider::AlibabaCloud => ALIBABA_CLOUD_SEED,
    }
}

/// Select the seed bytes of a provider: the configured file, else the embedded snapshot
pub fn load_seed(provider: CloudProvider, config: &SeedConfig) -> Result<Cow<'static, [u8]>> {
    let path = match provider {
        CloudProvider::Aws => config.aws_path.as_deref(),
        CloudProvider::AlibabaCloud => config.alibaba_cloud_path.as_deref(),
    };

    match path {
        Some(path) => read_seed_file(provider, path).map(Cow::Owned),
        None => {
            info!(provider = %provider, "Using embedded price seed");
            Ok(Cow::Borrowed(embedded_seed(provider)))
        }
    }
}

fn read_seed_file(provider: CloudProvider, path: &Path) -> Result<Vec<u8>> {
    info!(provider = %provider, path = %path.display(), "Loading price seed from file");
    std::fs::read(path).wrap_err_with(|| format!("Failed to read {provider} seed from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_pricing::PriceStore;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_embedded_seeds_decode() {
        for provider in [CloudProvider::Aws, CloudProvider::AlibabaCloud] {
            let bytes = load_seed(provider, &SeedConfig::default()).unwrap();
            let store = PriceStore::from_seed(&bytes).unwrap();
            assert!(store.stats().await.instance_types > 0, "{provider} seed is empty");
        }
    }

    #[tokio::test]
    async fn test_aws_seed_has_reference_price() {
        let store = PriceStore::from_seed(embedded_seed(CloudProvider::Aws)).unwrap();
        let price = store.get_instance("us-east-2", "t2.xlarge").await.unwrap();
        assert_eq!(price.on_demand_price_per_hour, 0.1856);
    }

    #[test]
    fn test_file_override_wins() {
        let path = std::env::temp_dir().join(format!("price-seed-{}.json", std::process::id()));
        std::fs::write(&path, b"{}").unwrap();

        let config = SeedConfig {
            aws_path: Some(path.clone()),
            alibaba_cloud_path: None,
        };
        assert_eq!(load_seed(CloudProvider::Aws, &config).unwrap().as_ref(), b"{}");
        assert_eq!(
            load_seed(CloudProvider::AlibabaCloud, &config).unwrap().as_ref(),
            embedded_seed(CloudProvider::AlibabaCloud)
        );

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_override_file_is_an_error() {
        let config = SeedConfig {
            aws_path: Some(PathBuf::from("/nonexistent/aws_price.json")),
            alibaba_cloud_path: None,
        };
        let err = load_seed(CloudProvider::Aws, &config).unwrap_err();
        assert!(err.to_string().contains("aws"));
    }
}
