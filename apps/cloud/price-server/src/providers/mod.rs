//! Cloud pricing providers
//!
//! Each provider adapter implements [`domain_pricing::PriceRefresher`] on
//! top of a narrow API trait, so the refresh logic can be exercised against
//! fakes and the real clients stay thin.

pub mod alibabacloud;
pub mod aws;

use domain_pricing::{CloudProvider, PriceStore};
use observability::PricingMetrics;
use thiserror::Error;
use tracing::warn;

pub use alibabacloud::{AlibabaCloudPriceClient, RpcAlibabaCloudApi};
pub use aws::{AwsPriceClient, SdkAwsApi};

/// Error type for pricing provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Request signing failed: {0}")]
    AuthError(String),

    #[error("API error: {0}")]
    ApiError(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }

    /// Token of the next page; empty tokens end the listing
    pub fn next(&self) -> Option<String> {
        self.next_token.clone().filter(|t| !t.is_empty())
    }
}

/// Publish the catalog size gauges of a provider
pub(crate) async fn report_catalog_size(provider: CloudProvider, store: &PriceStore) {
    let stats = store.stats().await;
    PricingMetrics::set_catalog_size(&provider.to_string(), stats.regions, stats.instance_types);
}

/// Count the regions that completed, recording a failure metric for the rest
pub(crate) fn tally_region_outcomes(
    provider: &str,
    dimension: &str,
    outcomes: Vec<(String, ProviderResult<usize>)>,
) -> usize {
    let mut completed = 0;
    for (region, outcome) in outcomes {
        match outcome {
            Ok(_) => completed += 1,
            Err(e) => {
                warn!(provider = provider, dimension = dimension, region = %region, error = %e, "Region refresh failed");
                PricingMetrics::record_unit_failed(provider, dimension, &region, &e.to_string());
            }
        }
    }
    completed
}

/// Parse a positive price; zero, negative and malformed values are rejected
pub(crate) fn parse_price(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|p| *p > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("0.1856000000"), Some(0.1856));
        assert_eq!(parse_price("0.0000000000"), None);
        assert_eq!(parse_price("n/a"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn test_empty_next_token_ends_listing() {
        let page = Page {
            items: vec![1],
            next_token: Some(String::new()),
        };
        assert_eq!(page.next(), None);
        assert_eq!(Page::<u8>::last(vec![]).next(), None);
    }

    #[test]
    fn test_tally_counts_completed_regions() {
        let outcomes = vec![
            ("us-east-1".to_string(), Ok(3)),
            ("eu-west-1".to_string(), Err(ProviderError::ApiError("throttled".into()))),
            ("cn-north-1".to_string(), Ok(0)),
        ];
        assert_eq!(tally_region_outcomes("aws", "spot", outcomes), 2);
    }
}
