//! Bounded fan-out with an ordered barrier
//!
//! One tokio task per item, at most `limit` running at once. Results come back in
//! input order once every task has finished. A panic in any task is re-raised on
//! the caller after the remaining tasks are aborted.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::error;

use crate::error::NucleusError;

/// Aborts still-running tasks when the caller stops waiting for them
struct TaskSet<O>(Vec<JoinHandle<O>>);

impl<O> Drop for TaskSet<O> {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

pub async fn fan_out<T, O, F, Fut>(items: Vec<T>, limit: usize, task: F) -> Vec<Result<O, NucleusError>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = TaskSet(Vec::with_capacity(items.len()));

    for item in items {
        let semaphore = semaphore.clone();
        let future = task(item);
        tasks.0.push(tokio::spawn(async move {
            // the semaphore is never closed
            let _permit = semaphore.acquire_owned().await.ok();
            future.await
        }));
    }

    let mut results = Vec::with_capacity(tasks.0.len());
    for handle in tasks.0.iter_mut() {
        match handle.await {
            Ok(output) => results.push(Ok(output)),
            Err(join_err) if join_err.is_panic() => {
                // `tasks` is dropped while unwinding, aborting the rest
                std::panic::resume_unwind(join_err.into_panic())
            }
            Err(_) => results.push(Err(NucleusError::Aborted)),
        }
    }
    results
}

/// Logs every failure and returns the first one in input order
pub fn first_error<O>(
    phase: &str,
    names: &[String],
    results: Vec<Result<O, NucleusError>>,
) -> Result<Vec<O>, NucleusError> {
    let mut first = None;
    let mut outputs = Vec::with_capacity(results.len());
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => {
                let name = names.get(index).map(String::as_str).unwrap_or("?");
                error!("{} failed for submodule {}: {}", phase, name, e);
                if first.is_none() {
                    first = Some(e);
                }
            }
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(outputs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_input_order() {
        let results = fan_out(vec![30u64, 10, 20], 3, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay
        })
        .await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        fan_out((0..8).collect::<Vec<_>>(), 2, |_| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_first_error_in_declaration_order() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results: Vec<Result<(), NucleusError>> = vec![
            Ok(()),
            Err(NucleusError::failed("second")),
            Err(NucleusError::failed("third")),
        ];
        let err = first_error("discovery", &names, results).unwrap_err();
        assert_eq!(err.to_string(), "second");
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn test_panic_is_reraised() {
        fan_out(vec![1, 2], 2, |n| async move {
            if n == 2 {
                panic!("boom");
            }
        })
        .await;
    }
}
