//! Bounded parallel execution of independent refresh units.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Run `task` for every item with at most `limit` tasks in flight, returning
/// the outputs of all tasks that completed. Output order is unspecified.
///
/// A panicking task is logged and dropped from the output; it never aborts
/// its siblings or the call.
pub async fn map_bounded<T, R, F, Fut>(limit: usize, items: impl IntoIterator<Item = T>, task: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let task = Arc::new(task);
    let mut join_set = JoinSet::new();

    for item in items {
        let semaphore = Arc::clone(&semaphore);
        let task = Arc::clone(&task);
        join_set.spawn(async move {
            // The semaphore lives as long as this call and is never closed
            let _permit = semaphore.acquire_owned().await.ok();
            task(item).await
        });
    }

    let mut outputs = Vec::with_capacity(join_set.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(output) => outputs.push(output),
            Err(e) => error!(error = %e, "Refresh task aborted"),
        }
    }
    outputs
}

/// Run `task` for every item with at most `limit` tasks in flight and wait
/// for all of them. Tasks handle their own errors.
pub async fn run_bounded<T, F, Fut>(limit: usize, items: impl IntoIterator<Item = T>, task: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    map_bounded(limit, items, task).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_every_unit() {
        let mut outputs = map_bounded(3, 0..20, |i| async move { i * 2 }).await;
        outputs.sort();
        assert_eq!(outputs, (0..20).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));
        run_bounded(4, 0..32, move |_| {
            let in_flight = Arc::clone(&in_flight_c);
            let peak = Arc::clone(&peak_c);
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_unit_does_not_abort_siblings() {
        let done = Arc::new(AtomicUsize::new(0));
        let done_c = Arc::clone(&done);

        let outputs = map_bounded(2, 0..6, move |i| {
            let done = Arc::clone(&done_c);
            async move {
                if i == 3 {
                    panic!("unit {i} failed");
                }
                done.fetch_add(1, Ordering::SeqCst);
                i
            }
        })
        .await;

        assert_eq!(outputs.len(), 5);
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_zero_limit_still_makes_progress() {
        let outputs = map_bounded(0, vec!["a", "b"], |s| async move { s.len() }).await;
        assert_eq!(outputs, vec![1, 1]);
    }
}
