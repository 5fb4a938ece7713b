//! # Durable steps
//!
//! A [`StepRunner`] executes named units of work at most logically once per
//! run. The first successful result of each step is journaled; when a run is
//! resumed with the same run id, a journaled step returns its recorded result
//! instead of executing again. Retryable failures are retried with backoff.
//!
//! Repeated executions of the same name are keyed `name`, `name:1`, `name:2`,
//! … in call order, so a replay that issues the same sequence of steps
//! resolves the same journal entries.

use crate::error::{Error, Result};
use crate::storage::Storage;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many times a retryable step is attempted, and how long to wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// A journaled step result
#[derive(Debug, Serialize, Deserialize)]
struct StepRecord {
    output: serde_json::Value,
}

/// Executes named steps for one run against a journal
pub struct StepRunner {
    run_id: String,
    journal: Mutex<Storage>,
    occurrences: Mutex<HashMap<String, usize>>,
    policy: RetryPolicy,
}

impl StepRunner {
    /// Create a runner whose journal lives in `storage`, namespaced by `run_id`.
    ///
    /// Passing the id of an earlier run resumes it: its completed steps replay.
    pub fn new(run_id: impl Into<String>, storage: Storage) -> Self {
        let run_id = run_id.into();
        Self {
            journal: Mutex::new(storage.with_namespace(format!("run:{}", run_id))),
            run_id,
            occurrences: Mutex::new(HashMap::new()),
            policy: RetryPolicy::default(),
        }
    }

    /// Reopen the journal of an earlier run so its completed steps replay
    pub fn resume(run_id: impl Into<String>, storage: Storage) -> Self {
        let runner = Self::new(run_id, storage);
        info!(run_id = %runner.run_id, completed = runner.completed_steps().len(), "resuming run");
        runner
    }

    /// A runner with a fresh run id and a volatile journal
    pub fn in_memory() -> Self {
        Self::new(generate_run_id(), Storage::memory())
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Journal keys of every step this run has completed so far
    pub fn completed_steps(&self) -> Vec<String> {
        let mut keys = self.journal().keys();
        keys.sort();
        keys
    }

    /// Run a named step.
    ///
    /// Returns the journaled output when the step already completed in this
    /// run; otherwise executes `work`, retrying retryable errors per the
    /// policy, and journals the first successful output.
    pub async fn run<T, F, Fut>(&self, name: &str, mut work: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = self.next_key(name);

        let recorded: Option<StepRecord> = self
            .journal()
            .get_typed(&key)
            .map_err(|e| e.with_operation("steps::replay").with_context("step", key.clone()))?;
        if let Some(record) = recorded {
            debug!(run_id = %self.run_id, step = %key, "replaying journaled step");
            return serde_json::from_value(record.output).map_err(|e| {
                Error::serialization_failed(format!("journaled output no longer matches: {}", e))
                    .with_operation("steps::replay")
                    .with_context("step", key.clone())
            });
        }

        let mut attempt = 1;
        let output = loop {
            match work().await {
                Ok(output) => break output,
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(run_id = %self.run_id, step = %key, attempt, error = %err, "step failed, retrying");
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err
                        .persist()
                        .with_context("step", key)
                        .with_context("attempts", attempt.to_string()));
                }
            }
        };

        let record = StepRecord {
            output: serde_json::to_value(&output).map_err(|e| {
                Error::serialization_failed(e.to_string())
                    .with_operation("steps::record")
                    .with_context("step", key.clone())
            })?,
        };
        self.journal()
            .set_typed(&key, &record)
            .map_err(|e| e.with_operation("steps::record").with_context("step", key.clone()))?;

        info!(run_id = %self.run_id, step = %key, attempts = attempt, "step completed");
        Ok(output)
    }

    fn next_key(&self, name: &str) -> String {
        let mut occurrences = lock(&self.occurrences);
        let count = occurrences.entry(name.to_string()).or_insert(0);
        let key = if *count == 0 {
            name.to_string()
        } else {
            format!("{}:{}", name, count)
        };
        *count += 1;
        key
    }

    fn journal(&self) -> MutexGuard<'_, Storage> {
        lock(&self.journal)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panic mid-step leaves the data itself consistent (each write is whole)
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Generate a unique run id
pub fn generate_run_id() -> String {
    format!("run_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_repeated_names_get_distinct_keys() {
        let steps = StepRunner::in_memory();
        let a: u32 = steps.run("terminal", || async { Ok(1) }).await.unwrap();
        let b: u32 = steps.run("terminal", || async { Ok(2) }).await.unwrap();
        let c: u32 = steps.run("terminal", || async { Ok(3) }).await.unwrap();

        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(
            steps.completed_steps(),
            vec!["terminal".to_string(), "terminal:1".to_string(), "terminal:2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_resume_replays_without_executing() {
        let dir = TempDir::new().unwrap();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let first = StepRunner::new("run_x", Storage::file(dir.path()).unwrap());
        let id: String = first
            .run("get-sandbox-id", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("sbx_1".to_string())
            })
            .await
            .unwrap();
        assert_eq!(id, "sbx_1");

        let resumed = StepRunner::resume("run_x", Storage::file(dir.path()).unwrap());
        let id: String = resumed
            .run("get-sandbox-id", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("sbx_2".to_string())
            })
            .await
            .unwrap();

        assert_eq!(id, "sbx_1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried() {
        let steps = StepRunner::in_memory().with_retry(fast());
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let out: String = steps
            .run("flaky", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::network_failed("reset by peer"))
                } else {
                    Ok("ok".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_error_persistent() {
        let steps = StepRunner::in_memory().with_retry(fast());
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let err = steps
            .run::<(), _, _>("always-down", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::network_failed("down"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.status(), crate::error::ErrorStatus::Persistent);
        assert!(steps.completed_steps().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let steps = StepRunner::in_memory().with_retry(fast());
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let err = steps
            .run::<(), _, _>("save-result", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::persistence_failed("disk full"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
    }

    #[test]
    fn test_unit_output_is_journaled() {
        let steps = StepRunner::in_memory();
        tokio_test::block_on(steps.run("close-sandbox", || async { Ok(()) })).unwrap();
        assert_eq!(steps.completed_steps(), vec!["close-sandbox".to_string()]);
    }
}
