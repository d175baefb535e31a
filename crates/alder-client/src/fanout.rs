//! Concurrent fan-out across partitions.
//!
//! Sharded primitives dispatch one invocation per partition and combine the
//! results. All three shapes are fail-fast: the first error aborts the
//! remaining invocations and is returned; results of invocations that
//! completed before the failure are discarded. The caller's cancellation
//! token is propagated into every invocation: when it fires, in-flight
//! invocations are aborted and the fan-out returns
//! [`ClientError::Cancelled`]. Dropping the returned future likewise aborts
//! every spawned invocation.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Invoke `f(0)..f(count - 1)` concurrently and collect results in index
/// order.
pub async fn execute_ordered<T, F, Fut>(
    count: usize,
    cancel: &CancellationToken,
    f: F,
) -> Result<Vec<T>, ClientError>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(ClientError::Cancelled);
    }
    let mut tasks = JoinSet::new();
    for i in 0..count {
        let invocation = f(i);
        let token = cancel.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => (i, Err(ClientError::Cancelled)),
                result = invocation => (i, result),
            }
        });
    }

    let mut results: Vec<Option<T>> = (0..count).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, Ok(value))) => results[i] = Some(value),
            Ok((_, Err(err))) => {
                abort_and_drain(&mut tasks).await;
                return Err(err);
            }
            Err(err) if err.is_cancelled() => continue,
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        }
    }

    Ok(results.into_iter().map(|slot| slot.expect("every index joined")).collect())
}

/// Invoke `f(0)..f(count - 1)` concurrently and collect results in
/// completion order.
pub async fn execute_unordered<T, F, Fut>(
    count: usize,
    cancel: &CancellationToken,
    f: F,
) -> Result<Vec<T>, ClientError>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(ClientError::Cancelled);
    }
    let mut tasks = JoinSet::new();
    for i in 0..count {
        let invocation = f(i);
        let token = cancel.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => Err(ClientError::Cancelled),
                result = invocation => result,
            }
        });
    }

    let mut results = Vec::with_capacity(count);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(err)) => {
                abort_and_drain(&mut tasks).await;
                return Err(err);
            }
            Err(err) if err.is_cancelled() => continue,
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        }
    }

    Ok(results)
}

/// Invoke `f(0)..f(count - 1)` concurrently for effect, returning the first
/// error if any.
pub async fn iter_async<F, Fut>(count: usize, cancel: &CancellationToken, f: F) -> Result<(), ClientError>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
{
    execute_unordered(count, cancel, f).await.map(|_| ())
}

async fn abort_and_drain<T: 'static>(tasks: &mut JoinSet<T>) {
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_execute_ordered_preserves_index_order() {
        // Later indices finish first; the result list must still be ordered.
        let cancel = CancellationToken::new();
        let results = execute_ordered(4, &cancel, |i| async move {
            tokio::time::sleep(Duration::from_millis(40 - 10 * i as u64)).await;
            Ok(i * 2)
        })
        .await
        .unwrap();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }

    #[tokio::test]
    async fn test_execute_ordered_fails_fast() {
        let cancel = CancellationToken::new();
        let started = std::time::Instant::now();
        let result = execute_ordered(3, &cancel, |i| async move {
            if i == 1 {
                Err(ClientError::Server {
                    message: "partition down".to_string(),
                })
            } else {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(i)
            }
        })
        .await;
        assert!(matches!(result, Err(ClientError::Server { .. })));
        assert!(started.elapsed() < Duration::from_secs(1), "failure must not wait for slow invocations");
    }

    #[tokio::test]
    async fn test_execute_unordered_returns_completion_order() {
        let cancel = CancellationToken::new();
        let results = execute_unordered(3, &cancel, |i| async move {
            tokio::time::sleep(Duration::from_millis(30 - 10 * i as u64)).await;
            Ok(i)
        })
        .await
        .unwrap();
        assert_eq!(results, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_iter_async_runs_all_invocations() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        iter_async(5, &cancel, move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_iter_async_surfaces_first_error() {
        let cancel = CancellationToken::new();
        let result = iter_async(4, &cancel, |i| async move {
            if i == 2 {
                Err(ClientError::NoPartitions)
            } else {
                Ok(())
            }
        })
        .await;
        assert!(matches!(result, Err(ClientError::NoPartitions)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_invocations() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = execute_ordered(3, &cancel, |i| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(i)
        })
        .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1), "cancellation must not wait for invocations");
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let invoked = Arc::new(AtomicUsize::new(0));
        let seen = invoked.clone();
        let result = iter_async(4, &cancel, move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0, "no invocation may start after cancellation");
    }

    #[tokio::test]
    async fn test_zero_invocations_is_empty() {
        let cancel = CancellationToken::new();
        let results: Vec<u64> = execute_ordered(0, &cancel, |_| async move { Ok(0) }).await.unwrap();
        assert!(results.is_empty());
    }
}
