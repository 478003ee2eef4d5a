//! Long-lived refresh loop of one provider client.
//!
//! ```text
//!   on-demand timer ──┐
//!   spot timer ───────┼──► select ──► PriceRefresher ──► PriceStore
//!   lazy triggers ────┤
//!   shutdown ─────────┘ (exit)
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::models::{CloudProvider, RegionTypeKey};
use crate::trigger::TriggerReceiver;

/// Default period of the full on-demand refresh (one week)
pub const DEFAULT_ON_DEMAND_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default period of the full spot refresh
pub const DEFAULT_SPOT_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Refresh operations a provider adapter exposes to the scheduler.
///
/// Implementations own their failure handling: a failing region or record
/// is logged and skipped, and the call still returns.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceRefresher: Send + Sync {
    fn provider(&self) -> CloudProvider;

    /// Refresh hardware specs and on-demand prices within `target`
    async fn refresh_on_demand(&self, target: &RegionTypeKey);

    /// Refresh per-zone spot prices within `target`
    async fn refresh_spot(&self, target: &RegionTypeKey);

    /// Refresh commitment plan rates within `target`; providers without
    /// commitment plans keep the default
    async fn refresh_commitment_plans(&self, _target: &RegionTypeKey) {}
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub on_demand_interval: Duration,
    pub spot_interval: Duration,
    /// Run a full spot refresh before entering the loop
    pub initial_spot_refresh: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            on_demand_interval: DEFAULT_ON_DEMAND_INTERVAL,
            spot_interval: DEFAULT_SPOT_INTERVAL,
            initial_spot_refresh: true,
        }
    }
}

pub struct RefreshScheduler<R: PriceRefresher + ?Sized> {
    refresher: Arc<R>,
    triggers: Option<TriggerReceiver>,
    config: SchedulerConfig,
}

impl<R: PriceRefresher + ?Sized> RefreshScheduler<R> {
    pub fn new(refresher: Arc<R>, config: SchedulerConfig) -> Self {
        Self {
            refresher,
            triggers: None,
            config,
        }
    }

    /// Serve lazy refresh requests from `triggers`
    pub fn with_triggers(mut self, triggers: TriggerReceiver) -> Self {
        self.triggers = Some(triggers);
        self
    }

    /// Run until a shutdown notification arrives.
    ///
    /// Timers first fire one full period after start. A refresh in progress
    /// is finished before shutdown is observed.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let Self {
            refresher,
            mut triggers,
            config,
        } = self;
        let provider = refresher.provider();

        info!(
            provider = %provider,
            on_demand_interval_secs = config.on_demand_interval.as_secs(),
            spot_interval_secs = config.spot_interval.as_secs(),
            lazy_triggers = triggers.is_some(),
            "Starting price refresh scheduler"
        );

        if config.initial_spot_refresh {
            refresher.refresh_spot(&RegionTypeKey::all()).await;
        }

        let start = Instant::now();
        let mut on_demand = interval_at(start + config.on_demand_interval, config.on_demand_interval);
        on_demand.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut spot = interval_at(start + config.spot_interval, config.spot_interval);
        spot.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(provider = %provider, "Price refresh scheduler shutting down");
                    break;
                }
                _ = on_demand.tick() => {
                    let all = RegionTypeKey::all();
                    refresher.refresh_on_demand(&all).await;
                    refresher.refresh_commitment_plans(&all).await;
                }
                _ = spot.tick() => {
                    refresher.refresh_spot(&RegionTypeKey::all()).await;
                }
                trigger = next_trigger(&mut triggers) => match trigger {
                    Some(key) => {
                        debug!(
                            provider = %provider,
                            region = %key.region,
                            instance_type = %key.instance_type,
                            "Serving lazy refresh request"
                        );
                        refresher.refresh_on_demand(&key).await;
                        refresher.refresh_commitment_plans(&key).await;
                        refresher.refresh_spot(&key).await;
                    }
                    None => {
                        debug!(provider = %provider, "Trigger queue closed");
                        triggers = None;
                    }
                },
            }
        }
    }
}

async fn next_trigger(triggers: &mut Option<TriggerReceiver>) -> Option<RegionTypeKey> {
    match triggers {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::trigger_queue;
    use observability::TriggerOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls {
        on_demand: AtomicUsize,
        spot: AtomicUsize,
        commitment: AtomicUsize,
        keys: Mutex<Vec<RegionTypeKey>>,
    }

    fn counting_refresher(calls: &Arc<Calls>) -> MockPriceRefresher {
        let mut mock = MockPriceRefresher::new();
        mock.expect_provider().return_const(CloudProvider::Aws);

        let c = Arc::clone(calls);
        mock.expect_refresh_on_demand().returning(move |key| {
            c.on_demand.fetch_add(1, Ordering::SeqCst);
            c.keys.lock().unwrap().push(key.clone());
        });
        let c = Arc::clone(calls);
        mock.expect_refresh_spot().returning(move |_| {
            c.spot.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(calls);
        mock.expect_refresh_commitment_plans().returning(move |_| {
            c.commitment.fetch_add(1, Ordering::SeqCst);
        });
        mock
    }

    fn quiet_config() -> SchedulerConfig {
        SchedulerConfig {
            initial_spot_refresh: false,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_do_not_fire_at_start() {
        let calls = Arc::new(Calls::default());
        let scheduler = RefreshScheduler::new(Arc::new(counting_refresher(&calls)), quiet_config());
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.spot.load(Ordering::SeqCst), 0);
        assert_eq!(calls.on_demand.load(Ordering::SeqCst), 0);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_spot_timer_fires_every_period() {
        let calls = Arc::new(Calls::default());
        let scheduler = RefreshScheduler::new(Arc::new(counting_refresher(&calls)), quiet_config());
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(DEFAULT_SPOT_INTERVAL * 2 + Duration::from_secs(60)).await;
        assert_eq!(calls.spot.load(Ordering::SeqCst), 2);
        assert_eq!(calls.on_demand.load(Ordering::SeqCst), 0);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_weekly_tick_refreshes_on_demand_and_commitment() {
        let calls = Arc::new(Calls::default());
        let config = SchedulerConfig {
            on_demand_interval: Duration::from_secs(3600),
            spot_interval: Duration::from_secs(24 * 3600),
            initial_spot_refresh: false,
        };
        let scheduler = RefreshScheduler::new(Arc::new(counting_refresher(&calls)), config);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_secs(3600 + 60)).await;
        assert_eq!(calls.on_demand.load(Ordering::SeqCst), 1);
        assert_eq!(calls.commitment.load(Ordering::SeqCst), 1);
        assert_eq!(calls.keys.lock().unwrap()[0], RegionTypeKey::all());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_spot_refresh_runs_before_loop() {
        let calls = Arc::new(Calls::default());
        let scheduler = RefreshScheduler::new(
            Arc::new(counting_refresher(&calls)),
            SchedulerConfig::default(),
        );
        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        scheduler.run(rx).await;
        assert_eq!(calls.spot.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_narrowed_refresh() {
        let calls = Arc::new(Calls::default());
        let (queue, receiver) = trigger_queue(4);
        let scheduler = RefreshScheduler::new(Arc::new(counting_refresher(&calls)), quiet_config())
            .with_triggers(receiver);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));

        let key = RegionTypeKey::new("eu-west-9", "x9.large");
        assert_eq!(queue.enqueue(key.clone()), TriggerOutcome::Queued);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(calls.keys.lock().unwrap().as_slice(), &[key]);
        assert_eq!(calls.commitment.load(Ordering::SeqCst), 1);
        assert_eq!(calls.spot.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_trigger_queue_keeps_timers_running() {
        let calls = Arc::new(Calls::default());
        let (queue, receiver) = trigger_queue(4);
        drop(queue);
        let scheduler = RefreshScheduler::new(Arc::new(counting_refresher(&calls)), quiet_config())
            .with_triggers(receiver);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(DEFAULT_SPOT_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(calls.spot.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
