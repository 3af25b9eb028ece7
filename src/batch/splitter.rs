//! Synchronous Priority Splitter
//!
//! For callers that already hold the full task list: urgent tasks run one at
//! a time in priority order, the rest run in fixed-size chunks. Nothing goes
//! through the processor's queues and the call returns when every task has
//! run.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::processor::DEFAULT_BATCH_SIZE;
use crate::error::{Error, Result};
use crate::monitoring::PerformanceMonitor;

/// Default priority at or above which a task runs on its own
pub const DEFAULT_HIGH_PRIORITY_THRESHOLD: i32 = 8;

/// Splitter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    pub high_priority_threshold: i32,
    pub batch_size: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            high_priority_threshold: DEFAULT_HIGH_PRIORITY_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SplitterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("splitter.batch_size must be > 0".into()));
        }
        Ok(())
    }
}

/// A task tagged with its priority
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityTask<T> {
    pub priority: i32,
    pub task: T,
}

impl<T> PriorityTask<T> {
    pub fn new(priority: i32, task: T) -> Self {
        Self { priority, task }
    }
}

/// Result of [`PrioritySplitter::process_priority`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityOutcome<R> {
    /// High-priority results first, then normal results in submission order
    pub results: Vec<R>,
    pub high_priority_count: usize,
    pub normal_priority_count: usize,
    pub failed: usize,
    /// Chunks used for the normal tasks
    pub batches: usize,
}

/// Result of [`PrioritySplitter::process_chunked`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkedOutcome<R> {
    pub results: Vec<R>,
    pub total_tasks: usize,
    pub batch_size: usize,
    pub batches_processed: usize,
    pub failed: usize,
}

/// Splits a finite task list into urgent and chunked work
pub struct PrioritySplitter {
    config: SplitterConfig,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl PrioritySplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            config,
            monitor: None,
        }
    }

    /// Report every chunk to `monitor` as one batch
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Run urgent tasks singly, then the rest in chunks
    pub fn process_priority<T, R, E, F>(
        &self,
        tasks: Vec<PriorityTask<T>>,
        mut handler: F,
    ) -> PriorityOutcome<R>
    where
        E: Display,
        F: FnMut(&T) -> std::result::Result<R, E>,
    {
        let threshold = self.config.high_priority_threshold;
        let (mut high, normal): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(|t| t.priority >= threshold);
        // stable: equal priorities keep submission order
        high.sort_by(|a, b| b.priority.cmp(&a.priority));

        let high_priority_count = high.len();
        let normal_priority_count = normal.len();
        let mut results = Vec::with_capacity(high_priority_count + normal_priority_count);
        let mut failed = 0;

        for task in &high {
            let (ok, err) = self.run_chunk(std::slice::from_ref(task), |t| handler(&t.task), &mut results);
            debug!(priority = task.priority, ok, "High-priority task processed");
            failed += err;
        }

        let normal: Vec<T> = normal.into_iter().map(|t| t.task).collect();
        let mut batches = 0;
        for chunk in normal.chunks(self.config.batch_size) {
            let (_, err) = self.run_chunk(chunk, &mut handler, &mut results);
            failed += err;
            batches += 1;
        }

        debug!(
            high_priority_count,
            normal_priority_count,
            batches,
            failed,
            "Priority split finished"
        );

        PriorityOutcome {
            results,
            high_priority_count,
            normal_priority_count,
            failed,
            batches,
        }
    }

    /// Run every task in chunks of `batch_size`
    pub fn process_chunked<T, R, E, F>(&self, tasks: Vec<T>, mut handler: F) -> ChunkedOutcome<R>
    where
        E: Display,
        F: FnMut(&T) -> std::result::Result<R, E>,
    {
        let mut results = Vec::with_capacity(tasks.len());
        let mut failed = 0;
        let mut batches_processed = 0;

        for chunk in tasks.chunks(self.config.batch_size) {
            let (_, err) = self.run_chunk(chunk, &mut handler, &mut results);
            failed += err;
            batches_processed += 1;
        }

        ChunkedOutcome {
            results,
            total_tasks: tasks.len(),
            batch_size: self.config.batch_size,
            batches_processed,
            failed,
        }
    }

    /// Returns `(succeeded, failed)` for one chunk
    fn run_chunk<T, R, E, F>(&self, chunk: &[T], mut handler: F, results: &mut Vec<R>) -> (usize, usize)
    where
        E: Display,
        F: FnMut(&T) -> std::result::Result<R, E>,
    {
        let started = Instant::now();
        let mut ok = 0;
        let mut failed = 0;

        for task in chunk {
            match handler(task) {
                Ok(r) => {
                    results.push(r);
                    ok += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Task failed; continuing with the rest");
                    failed += 1;
                }
            }
        }

        if let Some(monitor) = &self.monitor {
            if ok > 0 {
                monitor.record_batch(ok, started.elapsed());
            }
            if failed > 0 {
                monitor.record_failed(failed);
            }
        }
        (ok, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::MonitorConfig;

    fn splitter(batch_size: usize) -> PrioritySplitter {
        PrioritySplitter::new(SplitterConfig {
            high_priority_threshold: 8,
            batch_size,
        })
    }

    #[test]
    fn test_high_priority_runs_first() {
        let tasks = vec![
            PriorityTask::new(1, "low1"),
            PriorityTask::new(9, "high1"),
            PriorityTask::new(2, "low2"),
            PriorityTask::new(10, "high2"),
            PriorityTask::new(8, "high3"),
        ];

        let mut order = Vec::new();
        let outcome = splitter(2).process_priority(tasks, |t: &&str| {
            order.push(t.to_string());
            Ok::<_, String>(t.len())
        });

        assert_eq!(order, vec!["high2", "high1", "high3", "low1", "low2"]);
        assert_eq!(outcome.high_priority_count, 3);
        assert_eq!(outcome.normal_priority_count, 2);
        assert_eq!(outcome.batches, 1);
        assert_eq!(outcome.results.len(), 5);
        assert_eq!(outcome.failed, 0);
    }

    #[test]
    fn test_equal_priorities_keep_order() {
        let tasks = vec![
            PriorityTask::new(9, "a"),
            PriorityTask::new(9, "b"),
            PriorityTask::new(9, "c"),
        ];
        let outcome = splitter(2).process_priority(tasks, |t: &&str| Ok::<_, String>(t.to_string()));
        assert_eq!(outcome.results, vec!["a", "b", "c"]);
        assert_eq!(outcome.batches, 0);
    }

    #[test]
    fn test_failures_are_counted() {
        let tasks: Vec<_> = (0..5).map(|i| PriorityTask::new(i, i)).collect();
        let outcome = splitter(2).process_priority(tasks, |i: &i32| {
            if i % 2 == 0 {
                Err(format!("task {} failed", i))
            } else {
                Ok(*i)
            }
        });
        assert_eq!(outcome.results, vec![1, 3]);
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.batches, 3);
    }

    #[test]
    fn test_chunked() {
        let outcome = splitter(3).process_chunked((0..7).collect(), |i: &i32| Ok::<_, String>(i * 2));
        assert_eq!(outcome.results, vec![0, 2, 4, 6, 8, 10, 12]);
        assert_eq!(outcome.total_tasks, 7);
        assert_eq!(outcome.batch_size, 3);
        assert_eq!(outcome.batches_processed, 3);
    }

    #[test]
    fn test_empty_input() {
        let outcome = splitter(3).process_chunked(Vec::<i32>::new(), |i: &i32| Ok::<_, String>(*i));
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.batches_processed, 0);
    }

    #[test]
    fn test_reports_to_monitor() {
        let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig::default()));
        let splitter = splitter(2).with_monitor(Arc::clone(&monitor));

        let tasks = vec![PriorityTask::new(9, 1), PriorityTask::new(0, 2), PriorityTask::new(0, 3)];
        splitter.process_priority(tasks, |i: &i32| Ok::<_, String>(*i));

        let stats = monitor.batch_stats();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.total_processed, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(SplitterConfig::default().validate().is_ok());
        let bad = SplitterConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
