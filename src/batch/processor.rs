//! Priority Batch Processor
//!
//! One worker task per registered task type. Each worker polls its queue,
//! accumulates tasks and flushes them to the type's handler when the batch is
//! full or the oldest accumulated task has waited `max_wait`.
//!
//! ```text
//! add_task ──► TaskQueue (priority heap) ──► worker ──► handler ──► ResultBuffer
//!                                             │
//!                                  Idle → Accumulating → Flushing → …
//! ```
//!
//! Handlers of one type never run concurrently; different types run in
//! parallel. A failing or panicking handler loses its batch (no retry) and the
//! batch is counted as failed.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::queue::{PushError, ResultBuffer, TaskQueue};
use super::task::{sort_for_processing, BatchTask};
use crate::cache::update_latency_ema;
use crate::error::{Error, Result};
use crate::monitoring::PerformanceMonitor;
use crate::payload::Payload;

/// Default number of tasks per batch
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default per-type queue capacity
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Error type returned by batch handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Batch processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Flush once this many tasks are accumulated
    pub batch_size: usize,
    /// Flush once the oldest accumulated task has waited this long
    #[serde(with = "crate::config::duration_serde")]
    pub max_wait: Duration,
    /// Bounded wait of one queue poll
    #[serde(with = "crate::config::duration_serde")]
    pub poll_interval: Duration,
    /// Per-type queue capacity
    pub max_queue_size: usize,
    /// How long shutdown waits for each worker
    #[serde(with = "crate::config::duration_serde")]
    pub join_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_wait: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch.batch_size must be > 0".into()));
        }
        if self.max_queue_size == 0 {
            return Err(Error::Config("batch.max_queue_size must be > 0".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("batch.poll_interval must be > 0".into()));
        }
        Ok(())
    }
}

/// What a handler produced for one batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutput {
    /// One aggregate result for the whole batch
    One(Payload),
    /// One result per item (or any number of results)
    Many(Vec<Payload>),
}

impl BatchOutput {
    fn into_results(self) -> Vec<Payload> {
        match self {
            BatchOutput::One(p) => vec![p],
            BatchOutput::Many(ps) => ps,
        }
    }
}

impl From<Payload> for BatchOutput {
    fn from(p: Payload) -> Self {
        BatchOutput::One(p)
    }
}

impl From<Vec<Payload>> for BatchOutput {
    fn from(ps: Vec<Payload>) -> Self {
        BatchOutput::Many(ps)
    }
}

/// Processes one batch of `(task_id, payload)` pairs
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        batch: Vec<(String, Payload)>,
    ) -> std::result::Result<BatchOutput, HandlerError>;
}

#[async_trait]
impl<F, Fut> BatchHandler for F
where
    F: Fn(Vec<(String, Payload)>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<BatchOutput, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        batch: Vec<(String, Payload)>,
    ) -> std::result::Result<BatchOutput, HandlerError> {
        (self)(batch).await
    }
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Accumulating = 1,
    Flushing = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Accumulating,
            2 => WorkerState::Flushing,
            _ => WorkerState::Stopped,
        }
    }
}

/// Processor statistics
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    pub total_tasks: u64,
    pub processed_tasks: u64,
    pub failed_tasks: u64,
    pub batches: u64,
    /// EMA of handler time per batch
    #[serde(with = "crate::config::duration_serde")]
    pub avg_batch_time: Duration,
    pub queue_sizes: BTreeMap<String, usize>,
    pub active_workers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total_tasks: AtomicU64,
    processed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    batches: AtomicU64,
    avg_batch_time_us: AtomicU64,
}

/// Queue, results and worker for one task type
struct TypeSlot {
    name: String,
    queue: TaskQueue,
    results: ResultBuffer,
    state: AtomicU8,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TypeSlot {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Priority batch processor
pub struct BatchProcessor {
    config: BatchConfig,
    types: DashMap<String, Arc<TypeSlot>>,
    counters: Arc<Counters>,
    monitor: Arc<PerformanceMonitor>,
    cancel: CancellationToken,
    stopped: AtomicBool,
    /// Held shared by registration and exclusively while shutdown collects workers
    lifecycle: RwLock<()>,
    next_seq: AtomicU64,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig, monitor: Arc<PerformanceMonitor>) -> Self {
        info!(
            batch_size = config.batch_size,
            max_wait = ?config.max_wait,
            max_queue_size = config.max_queue_size,
            "Batch processor initialized"
        );
        Self {
            config,
            types: DashMap::new(),
            counters: Arc::new(Counters::default()),
            monitor,
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            lifecycle: RwLock::new(()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a task type and start its worker.
    ///
    /// Must be called inside a tokio runtime.
    pub fn register_task_type<H: BatchHandler>(&self, task_type: &str, handler: H) -> Result<()> {
        let _lifecycle = self.lifecycle.read();
        if self.is_stopped() {
            return Err(Error::ProcessorStopped);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Config("batch workers need a tokio runtime".into()))?;

        let slot = match self.types.entry(task_type.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::TaskTypeExists(task_type.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let slot = Arc::new(TypeSlot {
                    name: task_type.to_string(),
                    queue: TaskQueue::new(self.config.max_queue_size),
                    results: ResultBuffer::new(),
                    state: AtomicU8::new(WorkerState::Idle as u8),
                    handle: Mutex::new(None),
                });
                v.insert(Arc::clone(&slot));
                slot
            }
        };

        let worker = Worker {
            slot: Arc::clone(&slot),
            handler: Arc::new(handler),
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
            monitor: Arc::clone(&self.monitor),
            cancel: self.cancel.child_token(),
        };
        *slot.handle.lock() = Some(runtime.spawn(worker.run()));

        info!(task_type, "Registered task type");
        Ok(())
    }

    fn slot(&self, task_type: &str) -> Result<Arc<TypeSlot>> {
        self.types
            .get(task_type)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::UnknownTaskType(task_type.to_string()))
    }

    fn make_task(&self, task_id: &str, payload: Payload, task_type: &str, priority: i32) -> BatchTask {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        BatchTask::new(task_id, payload, task_type, priority, seq)
    }

    fn accepted(&self, slot: &TypeSlot, outcome: std::result::Result<(), PushError>) -> bool {
        match outcome {
            Ok(()) => {
                self.counters.total_tasks.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(PushError::Full(task)) => {
                warn!(task_type = %slot.name, task_id = task.task_id(), "Task queue full");
                false
            }
            Err(PushError::Closed(task)) => {
                debug!(task_type = %slot.name, task_id = task.task_id(), "Task rejected after shutdown");
                false
            }
        }
    }

    /// Queue a task.
    ///
    /// `Ok(false)` when the queue is full or the processor has shut down;
    /// `Err(UnknownTaskType)` when the type was never registered.
    pub fn add_task(
        &self,
        task_id: &str,
        payload: Payload,
        task_type: &str,
        priority: i32,
    ) -> Result<bool> {
        let slot = self.slot(task_type)?;
        let task = self.make_task(task_id, payload, task_type, priority);
        Ok(self.accepted(&slot, slot.queue.push(task)))
    }

    /// Queue a task, waiting up to `timeout` for space
    pub async fn add_task_wait(
        &self,
        task_id: &str,
        payload: Payload,
        task_type: &str,
        priority: i32,
        timeout: Duration,
    ) -> Result<bool> {
        let slot = self.slot(task_type)?;
        let task = self.make_task(task_id, payload, task_type, priority);
        let outcome = slot.queue.push_wait(task, timeout).await;
        Ok(self.accepted(&slot, outcome))
    }

    /// Oldest result for a type, waiting up to `timeout`
    pub async fn get_result(&self, task_type: &str, timeout: Duration) -> Option<Payload> {
        let slot = self.slot(task_type).ok()?;
        slot.results.pop_timeout(timeout).await
    }

    /// Up to `count` available results without waiting (`None` = all)
    pub fn get_batch_results(&self, task_type: &str, count: Option<usize>) -> Vec<Payload> {
        match self.slot(task_type) {
            Ok(slot) => slot.results.drain(count),
            Err(_) => Vec::new(),
        }
    }

    /// Drop tasks still waiting in a type's queue
    pub fn clear_queue(&self, task_type: &str) -> Result<usize> {
        let slot = self.slot(task_type)?;
        let dropped = slot.queue.clear();
        info!(task_type, dropped, "Task queue cleared");
        Ok(dropped)
    }

    /// Worker state of a type
    pub fn state(&self, task_type: &str) -> Option<WorkerState> {
        self.types.get(task_type).map(|s| s.state())
    }

    /// Registered task types
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.types.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ProcessorStats {
        let queue_sizes = self
            .types
            .iter()
            .map(|e| (e.key().clone(), e.value().queue.len()))
            .collect();
        let active_workers = self
            .types
            .iter()
            .filter(|e| e.value().state() != WorkerState::Stopped)
            .count();

        ProcessorStats {
            total_tasks: self.counters.total_tasks.load(Ordering::Relaxed),
            processed_tasks: self.counters.processed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.counters.failed_tasks.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            avg_batch_time: Duration::from_micros(
                self.counters.avg_batch_time_us.load(Ordering::Relaxed),
            ),
            queue_sizes,
            active_workers,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Stop accepting tasks, drain every queue and join the workers
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<TypeSlot>> = {
            let _lifecycle = self.lifecycle.write();
            if self.stopped.swap(true, Ordering::AcqRel) {
                return;
            }
            let slots: Vec<_> = self.types.iter().map(|e| Arc::clone(e.value())).collect();
            for slot in &slots {
                slot.queue.close();
            }
            self.cancel.cancel();
            slots
        };

        for slot in slots {
            let handle = slot.handle.lock().take();
            let Some(mut handle) = handle else { continue };
            match tokio::time::timeout(self.config.join_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task_type = %slot.name, error = %e, "Batch worker ended abnormally"),
                Err(_) => {
                    warn!(task_type = %slot.name, timeout = ?self.config.join_timeout, "Batch worker did not stop in time");
                    handle.abort();
                    slot.set_state(WorkerState::Stopped);
                }
            }
        }
        info!("Batch processor stopped");
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Worker loop state for one task type
struct Worker {
    slot: Arc<TypeSlot>,
    handler: Arc<dyn BatchHandler>,
    config: BatchConfig,
    counters: Arc<Counters>,
    monitor: Arc<PerformanceMonitor>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(task_type = %self.slot.name, "Batch worker started");

        let mut batch: Vec<BatchTask> = Vec::with_capacity(self.config.batch_size);
        // when the accumulator last went from empty to non-empty
        let mut started_at = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                task = self.slot.queue.pop_timeout(self.config.poll_interval) => {
                    if let Some(task) = task {
                        if batch.is_empty() {
                            started_at = Instant::now();
                            self.slot.set_state(WorkerState::Accumulating);
                        }
                        batch.push(task);
                    }
                }
            }

            let full = batch.len() >= self.config.batch_size;
            let waited = !batch.is_empty() && started_at.elapsed() >= self.config.max_wait;
            if full || waited {
                self.flush(std::mem::take(&mut batch)).await;
            }
        }

        // drain what is left, in full batches where possible
        while let Some(task) = self.slot.queue.try_pop() {
            batch.push(task);
            if batch.len() >= self.config.batch_size {
                self.flush(std::mem::take(&mut batch)).await;
            }
        }
        if !batch.is_empty() {
            self.flush(batch).await;
        }

        self.slot.set_state(WorkerState::Stopped);
        debug!(task_type = %self.slot.name, "Batch worker stopped");
    }

    #[instrument(skip(self, batch), fields(task_type = %self.slot.name, size = batch.len()))]
    async fn flush(&self, mut batch: Vec<BatchTask>) {
        self.slot.set_state(WorkerState::Flushing);
        let size = batch.len();
        sort_for_processing(&mut batch);
        let pairs: Vec<(String, Payload)> = batch.into_iter().map(BatchTask::into_pair).collect();

        let started = std::time::Instant::now();
        let outcome = AssertUnwindSafe(self.handler.handle(pairs)).catch_unwind().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(output)) => {
                self.slot.results.extend(output.into_results());
                self.counters
                    .processed_tasks
                    .fetch_add(size as u64, Ordering::Relaxed);
                self.counters.batches.fetch_add(1, Ordering::Relaxed);
                update_latency_ema(&self.counters.avg_batch_time_us, elapsed);
                self.monitor.record_batch(size, elapsed);
                debug!(elapsed = ?elapsed, "Batch processed");
            }
            Ok(Err(e)) => {
                self.record_failure(size);
                warn!(error = %e, "Batch handler failed; batch dropped");
            }
            Err(_) => {
                self.record_failure(size);
                error!("Batch handler panicked; batch dropped");
            }
        }

        self.slot.set_state(if self.slot.queue.is_empty() {
            WorkerState::Idle
        } else {
            WorkerState::Accumulating
        });
    }

    fn record_failure(&self, size: usize) {
        self.counters
            .failed_tasks
            .fetch_add(size as u64, Ordering::Relaxed);
        self.monitor.record_failed(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::MonitorConfig;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;

    fn make_processor(batch_size: usize, max_wait: Duration) -> BatchProcessor {
        let config = BatchConfig {
            batch_size,
            max_wait,
            poll_interval: Duration::from_millis(10),
            max_queue_size: 100,
            join_timeout: Duration::from_secs(5),
        };
        BatchProcessor::new(config, Arc::new(PerformanceMonitor::new(MonitorConfig::default())))
    }

    async fn echo(batch: Vec<(String, Payload)>) -> std::result::Result<BatchOutput, HandlerError> {
        Ok(BatchOutput::Many(
            batch.into_iter().map(|(id, _)| Payload::from(id)).collect(),
        ))
    }

    #[test]
    fn test_config_validation() {
        assert!(BatchConfig::default().validate().is_ok());
        let bad = BatchConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert_matches!(bad.validate(), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let processor = make_processor(4, Duration::from_secs(1));
        processor.register_task_type("t", echo).unwrap();
        assert_matches!(
            processor.register_task_type("t", echo),
            Err(Error::TaskTypeExists(_))
        );
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_type_is_error() {
        let processor = make_processor(4, Duration::from_secs(1));
        assert_matches!(
            processor.add_task("a", Payload::from("x"), "nope", 0),
            Err(Error::UnknownTaskType(_))
        );
        assert!(processor.get_result("nope", Duration::from_millis(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_size_triggered_flush() {
        let processor = make_processor(3, Duration::from_secs(60));
        processor.register_task_type("t", echo).unwrap();

        for i in 0..3 {
            assert!(processor.add_task(&format!("task{}", i), Payload::from("x"), "t", 0).unwrap());
        }

        let first = processor.get_result("t", Duration::from_secs(2)).await;
        assert_eq!(first, Some(Payload::from("task0")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(processor.get_batch_results("t", None).len(), 2);

        let stats = processor.stats();
        assert_eq!(stats.processed_tasks, 3);
        assert_eq!(stats.batches, 1);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_triggered_flush() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let processor = make_processor(3, Duration::from_millis(200));

        let (c, s) = (Arc::clone(&calls), Arc::clone(&sizes));
        processor
            .register_task_type("t", move |batch: Vec<(String, Payload)>| {
                c.fetch_add(1, Ordering::SeqCst);
                s.lock().push(batch.len());
                async move { Ok::<_, HandlerError>(BatchOutput::One(Payload::from("done"))) }
            })
            .unwrap();

        processor.add_task("a", Payload::from("x"), "t", 0).unwrap();
        processor.add_task("b", Payload::from("x"), "t", 0).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*sizes.lock(), vec![2]);
        assert_eq!(processor.get_batch_results("t", None), vec![Payload::from("done")]);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_sorted_by_priority() {
        let processor = make_processor(3, Duration::from_secs(60));
        processor.register_task_type("t", echo).unwrap();

        processor.add_task("low", Payload::from("x"), "t", 1).unwrap();
        processor.add_task("high", Payload::from("x"), "t", 9).unwrap();
        processor.add_task("mid", Payload::from("x"), "t", 5).unwrap();

        let first = processor.get_result("t", Duration::from_secs(2)).await;
        assert_eq!(first, Some(Payload::from("high")));
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_handler_counts_failures() {
        let processor = make_processor(2, Duration::from_millis(50));
        processor
            .register_task_type("t", |_batch: Vec<(String, Payload)>| async {
                Err::<BatchOutput, HandlerError>("handler exploded".into())
            })
            .unwrap();

        for i in 0..4 {
            processor.add_task(&i.to_string(), Payload::from("x"), "t", 0).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stats = processor.stats();
        assert_eq!(stats.failed_tasks, 4);
        assert_eq!(stats.processed_tasks, 0);
        assert!(processor.get_batch_results("t", None).is_empty());
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_worker_alive() {
        let processor = make_processor(1, Duration::from_millis(50));
        processor
            .register_task_type("t", |batch: Vec<(String, Payload)>| async move {
                if batch[0].0 == "boom" {
                    panic!("handler panic");
                }
                Ok::<_, HandlerError>(BatchOutput::One(Payload::from("ok")))
            })
            .unwrap();

        processor.add_task("boom", Payload::from("x"), "t", 0).unwrap();
        processor.add_task("fine", Payload::from("x"), "t", 0).unwrap();

        let result = processor.get_result("t", Duration::from_secs(2)).await;
        assert_eq!(result, Some(Payload::from("ok")));
        assert_eq!(processor.stats().failed_tasks, 1);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_backpressure() {
        let config = BatchConfig {
            batch_size: 100,
            max_wait: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            max_queue_size: 2,
            join_timeout: Duration::from_secs(1),
        };
        let processor =
            BatchProcessor::new(config, Arc::new(PerformanceMonitor::new(MonitorConfig::default())));
        processor.register_task_type("t", echo).unwrap();

        // current-thread runtime: the worker cannot dequeue between these calls
        let accepted: Vec<bool> = (0..4)
            .map(|i| processor.add_task(&i.to_string(), Payload::from("x"), "t", 0).unwrap())
            .collect();
        assert_eq!(accepted, vec![true, true, false, false]);
        assert_eq!(processor.stats().total_tasks, 2);

        assert_eq!(processor.clear_queue("t").unwrap(), 2);
        assert!(processor.add_task("again", Payload::from("x"), "t", 0).unwrap());
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects() {
        let processor = make_processor(10, Duration::from_secs(60));
        processor.register_task_type("t", echo).unwrap();

        processor.add_task("a", Payload::from("x"), "t", 0).unwrap();
        processor.add_task("b", Payload::from("x"), "t", 0).unwrap();
        processor.shutdown().await;

        assert_eq!(processor.get_batch_results("t", None).len(), 2);
        assert_eq!(processor.state("t"), Some(WorkerState::Stopped));
        assert!(!processor.add_task("c", Payload::from("x"), "t", 0).unwrap());
        assert_matches!(
            processor.register_task_type("u", echo),
            Err(Error::ProcessorStopped)
        );
        assert_eq!(processor.stats().active_workers, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registration_racing_shutdown_never_accepts_work() {
        for _ in 0..20 {
            let processor = Arc::new(make_processor(4, Duration::from_millis(10)));

            let registrar = {
                let processor = Arc::clone(&processor);
                tokio::spawn(async move {
                    (0..50)
                        .map(|i| {
                            let name = format!("type{}", i);
                            (processor.register_task_type(&name, echo), name)
                        })
                        .collect::<Vec<_>>()
                })
            };
            processor.shutdown().await;
            let outcomes = registrar.await.unwrap();

            for (outcome, name) in outcomes {
                match outcome {
                    Ok(()) => {
                        assert!(!processor.add_task("late", Payload::from("x"), &name, 0).unwrap());
                    }
                    Err(e) => assert_matches!(e, Error::ProcessorStopped),
                }
            }
        }
    }
}
