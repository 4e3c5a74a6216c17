//! Parallel execution backends for collective method calls.
//!
//! A dispatch hands the backend one self-contained [`WorkUnit`] per member
//! (a clone of the member plus its arguments). The backend returns one
//! [`Completed`] per unit, in submission order, regardless of the order in
//! which units finished.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::error::{EnsembleError, Result};
use crate::member::{Item, Member};
use crate::metrics::METRICS;
use crate::obs::emit_worker_failure;
use crate::ArgMap;

/// Environment variable holding the default worker count.
pub const WORKERS_ENV: &str = "ENSEMBLE_WORKERS";

/// Invoked once per successfully completed unit with the updated member and
/// its result.
pub type CompletionCallback = Arc<dyn Fn(&dyn Member, &Item) + Send + Sync>;

/// One member call, detached from the ensemble.
#[derive(Debug)]
pub struct WorkUnit {
    /// Submission position (member position in the ensemble).
    pub position: usize,
    pub member: Box<dyn Member>,
    pub args: Vec<Value>,
    pub kwargs: ArgMap,
}

/// A finished unit: the possibly updated member and its result.
#[derive(Debug)]
pub struct Completed {
    pub position: usize,
    pub member: Box<dyn Member>,
    pub item: Item,
}

/// Runs work units and returns their outcomes in submission order.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, method: &str, units: Vec<WorkUnit>) -> Result<Vec<Completed>>;
}

/// Pool configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Maximum number of units running at once.
    pub workers: usize,
    #[serde(skip)]
    pub callback: Option<CompletionCallback>,
}

impl fmt::Debug for ParallelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelConfig")
            .field("workers", &self.workers)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        let workers = std::env::var(WORKERS_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            });
        Self {
            workers,
            callback: None,
        }
    }
}

impl ParallelConfig {
    /// Fixed worker count (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            callback: None,
        }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn Member, &Item) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

/// Default backend: runs units on tokio's blocking thread pool, at most
/// `workers` at a time.
#[derive(Debug, Clone, Default)]
pub struct BlockingPool {
    config: ParallelConfig,
}

impl BlockingPool {
    pub fn new(config: ParallelConfig) -> Self {
        Self { config }
    }

    pub fn with_workers(workers: usize) -> Self {
        Self::new(ParallelConfig::new(workers))
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }
}

#[async_trait]
impl ExecutionBackend for BlockingPool {
    #[instrument(skip(self, units), fields(units = units.len(), workers = self.config.workers))]
    async fn execute(&self, method: &str, units: Vec<WorkUnit>) -> Result<Vec<Completed>> {
        let submitted = units.len();
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));

        let mut handles = Vec::with_capacity(submitted);
        for unit in units {
            let semaphore = Arc::clone(&semaphore);
            let callback = self.config.callback.clone();
            let method = method.to_string();
            METRICS.inc_parallel_units();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(format!("worker pool closed: {e}")),
                };
                match tokio::task::spawn_blocking(move || run_unit(&method, unit, callback)).await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(format!("worker panicked: {e}")),
                }
            }));
        }

        // wait for every unit before reporting anything
        let outcomes = join_all(handles).await;

        let mut completed = Vec::with_capacity(submitted);
        let mut failures = Vec::new();
        for (position, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(Ok(done)) => completed.push(done),
                Ok(Err(reason)) => failures.push(format!("unit {position}: {reason}")),
                Err(e) => failures.push(format!("unit {position}: task failed: {e}")),
            }
        }
        if !failures.is_empty() {
            emit_worker_failure(method, failures.len(), submitted);
            return Err(EnsembleError::Worker {
                submitted,
                failures,
            });
        }
        check_order(&completed, submitted)?;
        debug!(method, units = submitted, "parallel units completed");
        Ok(completed)
    }
}

/// Runs units one after another on the calling task.
///
/// Same contract as [`BlockingPool`]; useful where spawning threads is not
/// wanted.
#[derive(Clone, Default)]
pub struct InlineBackend {
    callback: Option<CompletionCallback>,
}

impl fmt::Debug for InlineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineBackend")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl InlineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn Member, &Item) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

#[async_trait]
impl ExecutionBackend for InlineBackend {
    async fn execute(&self, method: &str, units: Vec<WorkUnit>) -> Result<Vec<Completed>> {
        let submitted = units.len();
        let mut completed = Vec::with_capacity(submitted);
        let mut failures = Vec::new();
        for unit in units {
            METRICS.inc_parallel_units();
            let position = unit.position;
            match run_unit(method, unit, self.callback.clone()) {
                Ok(done) => completed.push(done),
                Err(reason) => failures.push(format!("unit {position}: {reason}")),
            }
        }
        if !failures.is_empty() {
            emit_worker_failure(method, failures.len(), submitted);
            return Err(EnsembleError::Worker {
                submitted,
                failures,
            });
        }
        check_order(&completed, submitted)?;
        Ok(completed)
    }
}

fn run_unit(
    method: &str,
    unit: WorkUnit,
    callback: Option<CompletionCallback>,
) -> std::result::Result<Completed, String> {
    let WorkUnit {
        position,
        mut member,
        args,
        kwargs,
    } = unit;
    METRICS.inc_member_calls();
    let item = member
        .call(method, &args, &kwargs)
        .map_err(|e| format!("'{method}' failed: {e:#}"))?;
    if let Some(callback) = callback {
        callback(member.as_ref(), &item);
    }
    Ok(Completed {
        position,
        member,
        item,
    })
}

fn check_order(completed: &[Completed], submitted: usize) -> Result<()> {
    if completed.len() != submitted {
        return Err(EnsembleError::LengthMismatch {
            context: "parallel work units".to_string(),
            expected: submitted,
            actual: completed.len(),
        });
    }
    if let Some((expected, done)) = completed
        .iter()
        .enumerate()
        .find(|(i, done)| done.position != *i)
    {
        return Err(EnsembleError::Configuration(format!(
            "unit {} completed in slot {expected}",
            done.position
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeDataset, Label};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unit(position: usize, member: impl Member, kwargs: ArgMap) -> WorkUnit {
        WorkUnit {
            position,
            member: Box::new(member),
            args: Vec::new(),
            kwargs,
        }
    }

    fn millis(ms: u64) -> ArgMap {
        [("millis".to_string(), json!(ms))].into_iter().collect()
    }

    #[tokio::test]
    async fn test_results_keep_submission_order() {
        let pool = BlockingPool::with_workers(4);
        let units = vec![
            unit(0, Label::new("slow"), millis(60)),
            unit(1, Label::new("medium"), millis(30)),
            unit(2, Label::new("fast"), millis(0)),
        ];
        let done = pool.execute("wait", units).await.unwrap();
        let texts: Vec<Value> = done
            .into_iter()
            .map(|c| match c.item {
                Item::Value(v) => v,
                Item::Member(_) => panic!("wait returns a value"),
            })
            .collect();
        assert_eq!(texts, vec![json!("slow"), json!("medium"), json!("fast")]);
    }

    #[tokio::test]
    async fn test_failures_reported_after_all_units() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let pool = BlockingPool::new(ParallelConfig::new(2).with_callback(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let units = vec![
            unit(0, FakeDataset::new("a"), ArgMap::new()),
            unit(1, Label::new("b"), ArgMap::new()),
            unit(2, FakeDataset::new("c"), ArgMap::new()),
        ];
        // only datasets know "load"
        let err = pool.execute("load", units).await.unwrap_err();
        match err {
            EnsembleError::Worker {
                submitted,
                failures,
            } => {
                assert_eq!(submitted, 3);
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("unit 1"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_callback_runs_once_per_unit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let pool = BlockingPool::new(ParallelConfig::new(3).with_callback(move |member, item| {
            assert_eq!(member.type_name(), "Dataset");
            assert!(item.is_none());
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let units = (0..5)
            .map(|i| unit(i, FakeDataset::new(&format!("d{i}")), ArgMap::new()))
            .collect();
        let done = pool.execute("load", units).await.unwrap();
        assert_eq!(done.len(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_inline_backend_matches_pool_contract() {
        let backend = InlineBackend::new();
        let units = vec![
            unit(0, Label::new("a"), ArgMap::new()),
            unit(1, Label::new("b"), ArgMap::new()),
        ];
        let done = backend.execute("upper", units).await.unwrap();
        assert_eq!(done[1].position, 1);
        assert!(matches!(&done[1].item, Item::Value(v) if v == &json!("B")));
    }

    #[test]
    fn test_config_never_has_zero_workers() {
        assert_eq!(ParallelConfig::new(0).workers, 1);
        assert!(ParallelConfig::default().workers >= 1);
    }

    #[test]
    fn test_config_deserializes_workers() {
        let config: ParallelConfig = serde_json::from_value(json!({ "workers": 3 })).unwrap();
        assert_eq!(config.workers, 3);
        assert!(config.callback.is_none());
    }
}
