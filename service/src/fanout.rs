//! Bounded, order-preserving fan-out.
//!
//! The concurrency bound doubles as the MoSAPI session cap: a worker holds a
//! permit for the whole duration of its task, so the number of in-flight
//! upstream requests never exceeds it. Results come back in input order, not
//! completion order. A caller deadline stops new tasks from starting; tasks
//! already running always complete.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

#[derive(Debug)]
pub enum FanOutError<E> {
    /// The task never started because the deadline passed first.
    Deadline,
    /// The task panicked; its slot carries no result.
    Panicked,
    Failed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for FanOutError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FanOutError::Deadline => f.write_str("deadline exceeded before the task started"),
            FanOutError::Panicked => f.write_str("task panicked"),
            FanOutError::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Runs `task` over every item with at most `concurrency` running at once.
///
/// The output has exactly one slot per input item, in input order; individual
/// failures land in their slot instead of failing the batch.
pub async fn fan_out<T, R, E, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    deadline: Option<Duration>,
    task: F,
) -> Vec<Result<R, FanOutError<E>>>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let total = items.len();
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let deadline_at = deadline.map(|d| Instant::now() + d);

    let mut join_set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let permits = permits.clone();
        let task = task.clone();
        join_set.spawn(async move {
            let permit = match deadline_at {
                Some(at) => match tokio::time::timeout_at(at, permits.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    _ => return (index, Err(FanOutError::Deadline)),
                },
                None => match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err(FanOutError::Deadline)),
                },
            };
            let result = task(item).await.map_err(FanOutError::Failed);
            drop(permit);
            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<R, FanOutError<E>>>> =
        std::iter::repeat_with(|| None).take(total).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => tracing::error!(error = %e, "fan-out task panicked"),
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Err(FanOutError::Panicked)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn preserves_input_order() {
        let items = vec![30u64, 10, 20];
        let results = fan_out(items, 3, None, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<u64, String>(delay)
        })
        .await;

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn isolates_failures() {
        let results = fan_out(vec!["good", "bad", "ugly"], 2, None, |name| async move {
            if name == "bad" {
                Err(format!("{name} failed"))
            } else {
                Ok(name.to_uppercase())
            }
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), "GOOD");
        assert!(matches!(&results[1], Err(FanOutError::Failed(e)) if e.contains("bad")));
        assert_eq!(results[2].as_ref().unwrap(), "UGLY");
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        static RUNNING: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let results = fan_out(vec![(); 16], 4, None, |_| async {
            let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
            PEAK.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            RUNNING.fetch_sub(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .await;

        assert_eq!(results.len(), 16);
        assert!(PEAK.load(Ordering::SeqCst) <= 4, "peak {}", PEAK.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn deadline_stops_new_tasks_but_started_ones_finish() {
        let results = fan_out(
            vec![1u64, 2, 3, 4],
            1,
            Some(Duration::from_millis(50)),
            |n| async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok::<u64, String>(n)
            },
        )
        .await;

        assert_eq!(results.len(), 4);
        // Exactly one task got the permit before the deadline; it ran to
        // completion even though it finished after the deadline.
        let completed = results.iter().filter(|r| r.is_ok()).count();
        let starved = results
            .iter()
            .filter(|r| matches!(r, Err(FanOutError::Deadline)))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(starved, 3);
    }
}
