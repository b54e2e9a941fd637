//! Bounded-concurrency task pool with order-preserving results.
//!
//! Keeps up to `pool_size` tasks in flight at once; when one finishes, the
//! next task is pulled from the input and started until the input runs dry.
//! Outcomes are reassembled in submission order regardless of completion
//! order, and one task failing never aborts the others.

use std::future::Future;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::warn;

/// Error recorded in the slot of a task the pool could not run to completion.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The task panicked or was aborted by the runtime.
    #[error("pooled task died: {0}")]
    Died(String),
}

/// Outcome slot for one submitted task.
pub type PoolOutcome<T> = Result<T, PoolError>;

/// Concurrency-limited task runner. `pool_size` is clamped to at least 1.
#[derive(Debug, Clone, Copy)]
pub struct BoundedPool {
    pool_size: usize,
}

impl BoundedPool {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Runs every task from `tasks`, at most `pool_size` concurrently.
    ///
    /// The input is consumed lazily: a task is pulled from the iterator only
    /// when a slot frees up, so a large input is never instantiated all at
    /// once. An empty input resolves immediately with an empty vector; a
    /// `pool_size` larger than the input starts everything at once.
    ///
    /// Every submitted task yields exactly one outcome. A panicking task
    /// leaves a [`PoolError`] in its slot and the remaining tasks keep
    /// running.
    pub async fn run<I, F, T>(&self, tasks: I) -> Vec<PoolOutcome<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut pending = tasks.into_iter().enumerate();
        let mut join_set = JoinSet::new();
        let mut outcomes: Vec<Option<PoolOutcome<T>>> = Vec::new();

        loop {
            while join_set.len() < self.pool_size {
                let Some((index, task)) = pending.next() else {
                    break;
                };
                outcomes.push(None);
                join_set.spawn(async move { (index, task.await) });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((index, value)) => outcomes[index] = Some(Ok(value)),
                // The dead task's index went down with it; its slot stays
                // empty and is backfilled below.
                Err(err) => warn!("pooled task died: {err}"),
            }
        }

        outcomes
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(PoolError::Died("task panicked or was aborted".into())))
            })
            .collect()
    }
}
