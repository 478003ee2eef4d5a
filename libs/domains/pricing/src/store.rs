use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{PricingError, PricingResult};
use crate::models::{InstanceTypePrice, PriceCatalog, PriceUpdate, RegionalInstancePrice};

/// Lock-protected in-memory price catalog.
///
/// Cloning the store clones the handle, not the data. Every read returns a
/// deep copy and every write goes through [`PriceStore::merge`], so callers
/// can never observe or cause a mutation outside the lock.
#[derive(Debug, Default, Clone)]
pub struct PriceStore {
    catalog: Arc<RwLock<PriceCatalog>>,
}

/// Size of the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogStats {
    pub regions: usize,
    pub instance_types: usize,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: PriceCatalog) -> Self {
        Self {
            catalog: Arc::new(RwLock::new(catalog)),
        }
    }

    /// Build a store from a serialized catalog snapshot
    pub fn from_seed(bytes: &[u8]) -> PricingResult<Self> {
        let catalog: PriceCatalog = serde_json::from_slice(bytes).map_err(PricingError::Seed)?;
        Ok(Self::with_catalog(catalog))
    }

    pub async fn get(&self, region: &str) -> Option<RegionalInstancePrice> {
        self.catalog.read().await.get(region).cloned()
    }

    pub async fn get_all(&self) -> PriceCatalog {
        self.catalog.read().await.clone()
    }

    pub async fn get_instance(&self, region: &str, instance_type: &str) -> Option<InstanceTypePrice> {
        self.catalog
            .read()
            .await
            .get(region)
            .and_then(|r| r.instance_type_prices.get(instance_type))
            .cloned()
    }

    /// Apply a partial update to one record, creating region and record if needed
    pub async fn merge(&self, region: &str, instance_type: &str, update: PriceUpdate) {
        if update.is_empty() {
            return;
        }
        let mut catalog = self.catalog.write().await;
        apply(&mut catalog, region, instance_type, update);
    }

    /// Apply a batch of updates for one region under a single lock acquisition
    pub async fn merge_many<I>(&self, region: &str, updates: I)
    where
        I: IntoIterator<Item = (String, PriceUpdate)>,
    {
        let mut catalog = self.catalog.write().await;
        for (instance_type, update) in updates {
            if !update.is_empty() {
                apply(&mut catalog, region, &instance_type, update);
            }
        }
    }

    /// Replace whole regions with the given records
    pub async fn replace_regions(&self, regions: PriceCatalog) {
        self.catalog.write().await.extend(regions);
    }

    /// Replace one instance type record
    pub async fn replace_instance(&self, region: &str, instance_type: &str, price: InstanceTypePrice) {
        self.catalog
            .write()
            .await
            .entry(region.to_string())
            .or_default()
            .instance_type_prices
            .insert(instance_type.to_string(), price);
    }

    pub async fn stats(&self) -> CatalogStats {
        let catalog = self.catalog.read().await;
        CatalogStats {
            regions: catalog.len(),
            instance_types: catalog
                .values()
                .map(|r| r.instance_type_prices.len())
                .sum(),
        }
    }

    /// Serialize the whole catalog in the seed snapshot format
    pub async fn snapshot_json(&self) -> PricingResult<Vec<u8>> {
        let catalog = self.catalog.read().await;
        serde_json::to_vec(&*catalog).map_err(PricingError::Encode)
    }
}

fn apply(catalog: &mut PriceCatalog, region: &str, instance_type: &str, update: PriceUpdate) {
    catalog
        .entry(region.to_string())
        .or_default()
        .instance_type_prices
        .entry(instance_type.to_string())
        .or_default()
        .apply(update);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Arch, InstanceSpec};

    const SEED: &str = r#"{
        "us-east-2": {
            "instanceTypePrices": {
                "t2.xlarge": {"onDemandPricePerHour": 0.1856}
            }
        }
    }"#;

    #[tokio::test]
    async fn test_spot_merge_keeps_seeded_on_demand_price() {
        let store = PriceStore::from_seed(SEED.as_bytes()).unwrap();

        store
            .merge("us-east-2", "t2.xlarge", PriceUpdate::spot("us-east-2a", 0.07))
            .await;

        let price = store.get_instance("us-east-2", "t2.xlarge").await.unwrap();
        assert_eq!(price.on_demand_price_per_hour, 0.1856);
        assert_eq!(price.spot_price_per_hour.get("us-east-2a"), Some(&0.07));
    }

    #[tokio::test]
    async fn test_disjoint_merges_commute() {
        let forward = PriceStore::new();
        forward.merge("r", "t", PriceUpdate::spot("r-a", 0.01)).await;
        forward.merge("r", "t", PriceUpdate::on_demand(0.2)).await;

        let backward = PriceStore::new();
        backward.merge("r", "t", PriceUpdate::on_demand(0.2)).await;
        backward.merge("r", "t", PriceUpdate::spot("r-a", 0.01)).await;

        let a = forward.get_instance("r", "t").await.unwrap();
        let b = backward.get_instance("r", "t").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.on_demand_price_per_hour, 0.2);
        assert_eq!(a.spot_price_per_hour.get("r-a"), Some(&0.01));
    }

    #[tokio::test]
    async fn test_commitment_rates_accumulate_by_key() {
        let store = PriceStore::new();
        store
            .merge("us-east-1", "m5.large", PriceUpdate::commitment("Compute/1yr/NoUpfront", 0.045))
            .await;
        store
            .merge("us-east-1", "m5.large", PriceUpdate::commitment("Compute/3yr/AllUpfront", 0.030))
            .await;

        let price = store.get_instance("us-east-1", "m5.large").await.unwrap();
        assert_eq!(price.commitment_rates.len(), 2);
        assert_eq!(price.commitment_rates["Compute/1yr/NoUpfront"].rate, 0.045);
        assert_eq!(price.commitment_rates["Compute/3yr/AllUpfront"].rate, 0.030);
    }

    #[tokio::test]
    async fn test_returned_records_are_copies() {
        let store = PriceStore::from_seed(SEED.as_bytes()).unwrap();

        let mut copy = store.get_instance("us-east-2", "t2.xlarge").await.unwrap();
        copy.on_demand_price_per_hour = 99.0;
        let mut region = store.get("us-east-2").await.unwrap();
        region.instance_type_prices.clear();
        let mut all = store.get_all().await;
        all.clear();

        let stored = store.get_instance("us-east-2", "t2.xlarge").await.unwrap();
        assert_eq!(stored.on_demand_price_per_hour, 0.1856);
        assert_eq!(store.stats().await.instance_types, 1);
    }

    #[tokio::test]
    async fn test_seed_round_trips_unchanged() {
        let store = PriceStore::from_seed(SEED.as_bytes()).unwrap();
        let expected: PriceCatalog = serde_json::from_str(SEED).unwrap();

        assert_eq!(store.get_all().await, expected);

        let reloaded = PriceStore::from_seed(&store.snapshot_json().await.unwrap()).unwrap();
        assert_eq!(reloaded.get_all().await, expected);
    }

    #[tokio::test]
    async fn test_invalid_seed_is_rejected() {
        let err = PriceStore::from_seed(b"{not json").unwrap_err();
        assert!(matches!(err, PricingError::Seed(_)));
    }

    #[tokio::test]
    async fn test_merge_many_creates_region() {
        let store = PriceStore::new();
        let spec = InstanceSpec {
            arch: Arch::Arm64,
            vcpu: 2.0,
            memory: 8.0,
            gpu: 0.0,
            zones: vec!["cn-hangzhou-b".to_string()],
        };
        store
            .merge_many(
                "cn-hangzhou",
                vec![
                    ("ecs.g8y.large".to_string(), PriceUpdate::spec(spec)),
                    ("ecs.g6.large".to_string(), PriceUpdate::default()),
                ],
            )
            .await;

        let stats = store.stats().await;
        assert_eq!(stats, CatalogStats { regions: 1, instance_types: 1 });
        assert_eq!(
            store.get_instance("cn-hangzhou", "ecs.g8y.large").await.unwrap().arch,
            Arch::Arm64
        );
    }

    #[tokio::test]
    async fn test_missing_lookups_return_none() {
        let store = PriceStore::new();
        assert!(store.get("eu-west-9").await.is_none());
        assert!(store.get_instance("eu-west-9", "x9.large").await.is_none());
    }
}
