use observability::{PricingMetrics, TriggerOutcome};
use tracing::{debug, warn};

use crate::models::{CloudProvider, InstanceTypePrice, PriceCatalog, RegionTypeKey, RegionalInstancePrice};
use crate::store::PriceStore;
use crate::trigger::TriggerQueue;

/// Read side of one provider's price catalog.
///
/// Serves lookups straight from the store. When lazy backfill is enabled a
/// lookup miss queues a refresh of the missing key and still answers
/// `None` right away.
#[derive(Debug, Clone)]
pub struct PriceClient {
    provider: CloudProvider,
    store: PriceStore,
    triggers: Option<TriggerQueue>,
}

impl PriceClient {
    pub fn new(provider: CloudProvider, store: PriceStore) -> Self {
        Self {
            provider,
            store,
            triggers: None,
        }
    }

    /// Enable lazy backfill through the given trigger queue
    pub fn with_lazy_backfill(mut self, triggers: TriggerQueue) -> Self {
        self.triggers = Some(triggers);
        self
    }

    pub fn provider(&self) -> CloudProvider {
        self.provider
    }

    pub fn store(&self) -> &PriceStore {
        &self.store
    }

    /// Prices of every region
    pub async fn list_regions_instances_price(&self) -> PriceCatalog {
        self.store.get_all().await
    }

    /// Prices of one region
    pub async fn list_instances_price(&self, region: &str) -> Option<RegionalInstancePrice> {
        self.store.get(region).await
    }

    /// Price record of one instance type; a miss may queue a lazy refresh
    pub async fn get_instance_price(&self, region: &str, instance_type: &str) -> Option<InstanceTypePrice> {
        let provider = self.provider.to_string();
        let found = self.store.get_instance(region, instance_type).await;
        PricingMetrics::record_cache_lookup(&provider, found.is_some());

        if found.is_none() {
            if let Some(triggers) = &self.triggers {
                let outcome = triggers.enqueue(RegionTypeKey::new(region, instance_type));
                PricingMetrics::record_trigger(&provider, outcome);
                match outcome {
                    TriggerOutcome::Dropped => warn!(
                        provider = %provider,
                        region = region,
                        instance_type = instance_type,
                        "Trigger queue full, dropping lazy refresh request"
                    ),
                    _ => debug!(
                        provider = %provider,
                        region = region,
                        instance_type = instance_type,
                        outcome = outcome.as_str(),
                        "Cache miss, lazy refresh requested"
                    ),
                }
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceUpdate;
    use crate::trigger::trigger_queue;

    #[tokio::test]
    async fn test_miss_enqueues_exactly_one_trigger() {
        let (queue, mut rx) = trigger_queue(100);
        let client = PriceClient::new(CloudProvider::Aws, PriceStore::new()).with_lazy_backfill(queue);

        assert!(client.get_instance_price("eu-west-9", "x9.large").await.is_none());

        assert_eq!(rx.recv().await, Some(RegionTypeKey::new("eu-west-9", "x9.large")));
        drop(client);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_hit_does_not_enqueue() {
        let (queue, mut rx) = trigger_queue(100);
        let store = PriceStore::new();
        store.merge("us-east-2", "t2.xlarge", PriceUpdate::on_demand(0.1856)).await;
        let client = PriceClient::new(CloudProvider::Aws, store).with_lazy_backfill(queue);

        let price = client.get_instance_price("us-east-2", "t2.xlarge").await.unwrap();
        assert_eq!(price.on_demand_price_per_hour, 0.1856);

        drop(client);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_miss_without_backfill_just_returns_none() {
        let client = PriceClient::new(CloudProvider::AlibabaCloud, PriceStore::new());
        assert!(client.get_instance_price("cn-hangzhou", "ecs.g6.large").await.is_none());
        assert!(client.list_instances_price("cn-hangzhou").await.is_none());
        assert!(client.list_regions_instances_price().await.is_empty());
    }
}
