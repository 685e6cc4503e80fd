//! Bounded parallel batch executor (C12), shared by the ingestion
//! orchestrator's per-URL fan-out and the managed-store request path.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Runs `f` over every item in `items`, at most `max_concurrent` futures
/// in flight at once, returning results in input order.
pub async fn run_batched<T, R, F, Fut>(items: Vec<T>, max_concurrent: usize, f: F) -> Vec<R>
where
    T: Send,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send,
    R: Send,
{
    stream::iter(items)
        .map(|item| f(item))
        .buffered(max_concurrent.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn preserves_order_regardless_of_completion_order() {
        let items = vec![3u64, 1, 2];
        let results = run_batched(items, 2, |n| async move {
            tokio::time::sleep(std::time::Duration::from_millis(n)).await;
            n
        })
        .await;
        assert_eq!(results, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn bounds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..10).collect();

        run_batched(items, 3, {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            move |_| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }
        })
        .await;

        assert!(max_seen.load(Ordering::SeqCst) <= 3);
    }
}
