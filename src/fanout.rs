//! Concurrent fan-out helper
//!
//! Runs a batch of fallible async operations concurrently, capturing each
//! outcome independently so one failure never cancels its siblings.
//! Cancelling the context aborts everything still running and discards
//! partial results.

use crate::error::{BridgeError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Outcome of one fanned-out task: a value or the error that replaced it.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub value: Option<T>,
    pub error: Option<BridgeError>,
}

impl<T> TaskOutcome<T> {
    fn ok(value: T) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    fn err(error: BridgeError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.value.is_some()
    }
}

/// Keyed variant of [`TaskOutcome`].
#[derive(Debug)]
pub struct KeyedOutcome<K, T> {
    pub key: K,
    pub value: Option<T>,
    pub error: Option<BridgeError>,
}

/// Run every operation concurrently and collect outcomes positionally.
///
/// Returns `Cancelled` if `ctx` fires before all tasks finish; whatever
/// completed so far is discarded. Long-running operations are expected to
/// observe `ctx` themselves.
pub async fn map<T, F, Fut>(ctx: &CancellationToken, operations: Vec<F>) -> Result<Vec<TaskOutcome<T>>>
where
    T: Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let handles: Vec<_> = operations
        .into_iter()
        .map(|op| tokio::spawn(op()))
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    let mut remaining = handles.into_iter();
    while let Some(mut handle) = remaining.next() {
        tokio::select! {
            _ = ctx.cancelled() => {
                handle.abort();
                for rest in remaining {
                    rest.abort();
                }
                return Err(BridgeError::Cancelled);
            }
            joined = &mut handle => {
                outcomes.push(match joined {
                    Ok(Ok(value)) => TaskOutcome::ok(value),
                    Ok(Err(error)) => TaskOutcome::err(error),
                    Err(join_error) => TaskOutcome::err(BridgeError::Io(std::io::Error::other(
                        format!("task failed: {}", join_error),
                    ))),
                });
            }
        }
    }
    Ok(outcomes)
}

/// Keyed fan-out: each operation is tagged so callers can tell results
/// apart without relying on position.
pub async fn map_with_keys<K, T, F, Fut>(
    ctx: &CancellationToken,
    operations: Vec<(K, F)>,
) -> Result<Vec<KeyedOutcome<K, T>>>
where
    K: Clone + Send + 'static,
    T: Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let (keys, ops): (Vec<K>, Vec<F>) = operations.into_iter().unzip();
    let outcomes = map(ctx, ops).await?;
    Ok(keys
        .into_iter()
        .zip(outcomes)
        .map(|(key, outcome)| KeyedOutcome {
            key,
            value: outcome.value,
            error: outcome.error,
        })
        .collect())
}
