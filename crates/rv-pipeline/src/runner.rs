//! In-process runner for a [`DependencyGraph`]
//!
//! Every unit whose predecessors have all succeeded is started right away,
//! up to `max_parallel` at once. A unit that fails (after its retries) marks
//! all of its transitive dependents as skipped; they never run on partial
//! upstream state. Units on unrelated branches keep going.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{PipelineError, PipelineResult};
use crate::graph::{DependencyGraph, RetryPolicy};

/// Executes a named unit
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    /// Run the unit once; returns the number of rows it wrote
    async fn execute(&self, unit: &str) -> PipelineResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub status: UnitStatus,
    pub attempts: u32,
    pub rows: u64,
    pub error: Option<String>,
    /// Whether the final error was classified transient
    pub transient: bool,
    pub elapsed: Duration,
}

impl UnitReport {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: UnitStatus::Pending,
            attempts: 0,
            rows: 0,
            error: None,
            transient: false,
            elapsed: Duration::ZERO,
        }
    }
}

/// Outcome of a whole run, one entry per unit in declaration order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.units.iter().all(|u| u.status == UnitStatus::Succeeded)
    }

    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn status(&self, name: &str) -> Option<UnitStatus> {
        self.unit(name).map(|u| u.status)
    }

    pub fn with_status(&self, status: UnitStatus) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(move |u| u.status == status)
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.with_status(status).count()
    }
}

pub struct Runner {
    max_parallel: usize,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_PARALLEL_UNITS)
    }
}

struct Attempted {
    index: usize,
    result: PipelineResult<u64>,
    attempts: u32,
    elapsed: Duration,
}

impl Runner {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    /// Run every unit of the graph
    pub async fn run(&self, graph: &DependencyGraph, executor: Arc<dyn UnitExecutor>) -> RunReport {
        let started = Instant::now();
        let mut reports: Vec<UnitReport> = (0..graph.len())
            .map(|i| UnitReport::pending(&graph.unit_at(i).name))
            .collect();
        let mut launched = vec![false; graph.len()];
        let mut in_flight = FuturesUnordered::new();

        info!(units = graph.len(), max_parallel = self.max_parallel, "Starting pipeline run");

        loop {
            for &i in graph.order_indices() {
                if in_flight.len() >= self.max_parallel {
                    break;
                }
                if launched[i] || reports[i].status != UnitStatus::Pending {
                    continue;
                }
                let ready = graph
                    .upstream_of(i)
                    .iter()
                    .all(|&p| reports[p].status == UnitStatus::Succeeded);
                if ready {
                    launched[i] = true;
                    let spec = graph.unit_at(i);
                    in_flight.push(attempt_unit(
                        i,
                        spec.name.clone(),
                        spec.retry,
                        Arc::clone(&executor),
                    ));
                }
            }

            let Some(done) = in_flight.next().await else {
                break;
            };

            let report = &mut reports[done.index];
            report.attempts = done.attempts;
            report.elapsed = done.elapsed;
            match done.result {
                Ok(rows) => {
                    report.status = UnitStatus::Succeeded;
                    report.rows = rows;
                },
                Err(err) => {
                    report.status = UnitStatus::Failed;
                    report.transient = err.is_transient();
                    report.error = Some(err.to_string());

                    let skipped = graph.transitive_dependents(done.index);
                    for &d in &skipped {
                        if reports[d].status == UnitStatus::Pending {
                            reports[d].status = UnitStatus::Skipped;
                        }
                    }
                    if !skipped.is_empty() {
                        warn!(
                            unit = %graph.unit_at(done.index).name,
                            skipped = skipped.len(),
                            "Skipping dependents of failed unit"
                        );
                    }
                },
            }
        }

        // Anything left pending had an upstream that never succeeded
        for report in reports.iter_mut() {
            if report.status == UnitStatus::Pending {
                report.status = UnitStatus::Skipped;
            }
        }

        let run = RunReport {
            units: reports,
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = run.count(UnitStatus::Succeeded),
            failed = run.count(UnitStatus::Failed),
            skipped = run.count(UnitStatus::Skipped),
            elapsed_ms = run.elapsed.as_millis() as u64,
            "Pipeline run finished"
        );
        run
    }
}

async fn attempt_unit(
    index: usize,
    name: String,
    retry: RetryPolicy,
    executor: Arc<dyn UnitExecutor>,
) -> Attempted {
    let span = info_span!("unit", name = %name);
    async move {
        let started = Instant::now();
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match executor.execute(&name).await {
                Ok(rows) => {
                    info!(rows, attempt, "Unit succeeded");
                    break Ok(rows);
                },
                Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                    warn!(
                        error = %err,
                        attempt,
                        max_attempts = retry.max_attempts,
                        delay_ms = retry.delay.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(retry.delay).await;
                },
                Err(err) => {
                    error!(error = %err, kind = err.kind(), attempt, "Unit failed");
                    break Err::<u64, PipelineError>(err);
                },
            }
        };
        Attempted {
            index,
            result,
            attempts: attempt,
            elapsed: started.elapsed(),
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::graph::UnitSpec;
    use crate::warehouse::WarehouseError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Validation,
        /// Fail transiently this many times, then succeed
        Flaky(u32),
    }

    #[derive(Default)]
    struct Scripted {
        behavior: HashMap<String, Behavior>,
        calls: Mutex<Vec<String>>,
        attempts: AtomicU32,
    }

    impl Scripted {
        fn with(mut self, unit: &str, behavior: Behavior) -> Self {
            self.behavior.insert(unit.to_string(), behavior);
            self
        }
    }

    #[async_trait]
    impl UnitExecutor for Scripted {
        async fn execute(&self, unit: &str) -> PipelineResult<u64> {
            self.calls.lock().unwrap().push(unit.to_string());
            match self.behavior.get(unit).copied().unwrap_or(Behavior::Ok) {
                Behavior::Ok => Ok(1),
                Behavior::Validation => Err(PipelineError::Validation(format!("{unit} is bad"))),
                Behavior::Flaky(n) => {
                    let seen = self.attempts.fetch_add(1, Ordering::SeqCst);
                    if seen < n {
                        Err(PipelineError::Warehouse(WarehouseError::Unavailable("blip".into())))
                    } else {
                        Ok(7)
                    }
                },
            }
        }
    }

    fn graph(retry: RetryPolicy) -> DependencyGraph {
        DependencyGraph::new(vec![
            UnitSpec::new("extract").with_retry(retry),
            UnitSpec::new("stage").after(["extract"]).with_retry(retry),
            UnitSpec::new("hub").after(["stage"]),
            UnitSpec::new("link").after(["hub"]),
            UnitSpec::new("side").after(["extract"]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_runs_everything_in_dependency_order() {
        let executor = Arc::new(Scripted::default());
        let report = Runner::new(2).run(&graph(RetryPolicy::none()), executor.clone()).await;

        assert!(report.is_success());
        let calls = executor.calls.lock().unwrap().clone();
        let pos = |n: &str| calls.iter().position(|c| c == n).unwrap();
        assert!(pos("extract") < pos("stage"));
        assert!(pos("stage") < pos("hub"));
        assert!(pos("hub") < pos("link"));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let executor = Arc::new(Scripted::default().with("stage", Behavior::Validation));
        let report = Runner::new(4).run(&graph(RetryPolicy::none()), executor.clone()).await;

        assert!(!report.is_success());
        assert_eq!(report.status("stage"), Some(UnitStatus::Failed));
        assert_eq!(report.status("hub"), Some(UnitStatus::Skipped));
        assert_eq!(report.status("link"), Some(UnitStatus::Skipped));
        assert_eq!(report.status("side"), Some(UnitStatus::Succeeded));

        let calls = executor.calls.lock().unwrap().clone();
        assert!(!calls.contains(&"hub".to_string()));
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let retry = RetryPolicy::new(3, Duration::from_millis(1));
        let executor = Arc::new(Scripted::default().with("extract", Behavior::Validation));
        let report = Runner::new(1).run(&graph(retry), executor).await;

        let extract = report.unit("extract").unwrap();
        assert_eq!(extract.status, UnitStatus::Failed);
        assert_eq!(extract.attempts, 1);
        assert!(!extract.transient);
        assert_eq!(report.count(UnitStatus::Skipped), 4);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let retry = RetryPolicy::new(3, Duration::from_millis(1));
        let executor = Arc::new(Scripted::default().with("extract", Behavior::Flaky(2)));
        let report = Runner::new(1).run(&graph(retry), executor).await;

        let extract = report.unit("extract").unwrap();
        assert_eq!(extract.status, UnitStatus::Succeeded);
        assert_eq!(extract.attempts, 3);
        assert_eq!(extract.rows, 7);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let retry = RetryPolicy::new(2, Duration::from_millis(1));
        let executor = Arc::new(Scripted::default().with("extract", Behavior::Flaky(10)));
        let report = Runner::new(1).run(&graph(retry), executor).await;

        let extract = report.unit("extract").unwrap();
        assert_eq!(extract.status, UnitStatus::Failed);
        assert_eq!(extract.attempts, 2);
        assert!(extract.transient);
    }
}
