//! Optimization Engine
//!
//! The public surface other modules call into. The engine constructs every
//! component from an [`EngineConfig`] and owns them; nothing is global.
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │ OptimizationEngine   │
//!                    └──────────┬───────────┘
//!        ┌───────────────┬──────┴────────┬────────────────┐
//!   TieredCache    BatchProcessor   PrioritySplitter   CleanupScheduler
//!        │               │               │                │
//!        └───────────────┴───────┬───────┴────────────────┘
//!                        PerformanceMonitor ◄── SamplerTask
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::batch::{
    BatchHandler, BatchProcessor, ChunkedOutcome, PriorityOutcome, PrioritySplitter, PriorityTask,
};
use crate::cache::{CacheSizes, CleanupScheduler, CodecRegistry, TieredCache};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::monitoring::{HealthResponse, PerformanceMonitor, PerformanceReport, SamplerTask};
use crate::payload::{Payload, ValueClass};

/// Tiered cache, batch processing and monitoring behind one handle
pub struct OptimizationEngine {
    config: EngineConfig,
    codecs: Arc<CodecRegistry>,
    monitor: Arc<PerformanceMonitor>,
    cache: Arc<TieredCache>,
    processor: BatchProcessor,
    splitter: PrioritySplitter,
    cleanup: Option<Arc<CleanupScheduler>>,
    sampler: Option<SamplerTask>,
}

impl OptimizationEngine {
    /// Build every component and start the background loops.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Config("the engine must be started inside a tokio runtime".into()))?;

        let codecs = Arc::new(CodecRegistry::new());
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone()));
        let cache = Arc::new(TieredCache::new(
            config.cache.clone(),
            Arc::clone(&codecs),
            Arc::clone(&monitor),
        )?);
        let processor = BatchProcessor::new(config.batch.clone(), Arc::clone(&monitor));
        let splitter =
            PrioritySplitter::new(config.splitter.clone()).with_monitor(Arc::clone(&monitor));

        let cleanup = config.cleanup.enabled.then(|| {
            let scheduler = Arc::new(CleanupScheduler::new(
                Arc::clone(&cache),
                config.cleanup.clone(),
            ));
            scheduler.start();
            scheduler
        });
        let sampler = config
            .monitor
            .sample_resources
            .then(|| SamplerTask::spawn(Arc::clone(&monitor)));

        monitor.health_check().set_ready(true);
        info!(
            cleanup = cleanup.is_some(),
            resource_sampling = sampler.is_some(),
            "Optimization engine started"
        );

        Ok(Self {
            config,
            codecs,
            monitor,
            cache,
            processor,
            splitter,
            cleanup,
            sampler,
        })
    }

    // =========================================================================
    // Cache
    // =========================================================================

    pub async fn cache_get(&self, key: &str) -> Option<Payload> {
        self.cache.get(key).await
    }

    pub fn cache_put(&self, key: &str, value: impl Into<Payload>, ttl: Option<Duration>) {
        self.cache.put(key, value.into(), ttl);
    }

    /// Cached value, or `compute`'s result stored on a miss (not single-flight)
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> std::result::Result<Payload, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Payload, E>>,
    {
        self.cache.get_or_compute(key, ttl, compute).await
    }

    /// Store many values and wait until they reach disk
    pub async fn warmup_cache<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (String, Payload)>,
    {
        let count = self.cache.warmup(items);
        self.cache.wait_for_persistence().await;
        info!(count, "Cache warmed up");
        count
    }

    /// Empty every tier and reset cache counters
    pub fn clear_all_caches(&self) {
        self.cache.clear();
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        self.cache.sizes()
    }

    /// Switch the class to its compressed codec for new L3 writes
    pub fn optimize_for(&self, class: ValueClass) {
        self.codecs.optimize_for(class);
    }

    pub fn optimize_for_embeddings(&self) {
        self.optimize_for(ValueClass::Embedding);
    }

    pub fn optimize_for_text(&self) {
        self.optimize_for(ValueClass::Text);
    }

    pub fn optimize_for_structured(&self) {
        self.optimize_for(ValueClass::Structured);
    }

    // =========================================================================
    // Batching
    // =========================================================================

    pub fn register_task_type<H: BatchHandler>(&self, task_type: &str, handler: H) -> Result<()> {
        self.processor.register_task_type(task_type, handler)
    }

    pub fn add_task(
        &self,
        task_id: &str,
        payload: impl Into<Payload>,
        task_type: &str,
        priority: i32,
    ) -> Result<bool> {
        self.processor
            .add_task(task_id, payload.into(), task_type, priority)
    }

    pub async fn add_task_wait(
        &self,
        task_id: &str,
        payload: impl Into<Payload>,
        task_type: &str,
        priority: i32,
        timeout: Duration,
    ) -> Result<bool> {
        self.processor
            .add_task_wait(task_id, payload.into(), task_type, priority, timeout)
            .await
    }

    pub async fn get_result(&self, task_type: &str, timeout: Duration) -> Option<Payload> {
        self.processor.get_result(task_type, timeout).await
    }

    pub fn get_batch_results(&self, task_type: &str, count: Option<usize>) -> Vec<Payload> {
        self.processor.get_batch_results(task_type, count)
    }

    /// Run tasks in fixed-size chunks on the calling thread
    pub fn batch_process<T, R, E, F>(&self, tasks: Vec<T>, handler: F) -> ChunkedOutcome<R>
    where
        E: Display,
        F: FnMut(&T) -> std::result::Result<R, E>,
    {
        self.splitter.process_chunked(tasks, handler)
    }

    /// Run urgent tasks singly, then the rest in chunks, on the calling thread
    pub fn batch_process_priority<T, R, E, F>(
        &self,
        tasks: Vec<PriorityTask<T>>,
        handler: F,
    ) -> PriorityOutcome<R>
    where
        E: Display,
        F: FnMut(&T) -> std::result::Result<R, E>,
    {
        self.splitter.process_priority(tasks, handler)
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    pub fn get_performance_report(&self) -> PerformanceReport {
        self.monitor.get_report()
    }

    pub fn health(&self) -> HealthResponse {
        self.monitor.health()
    }

    /// Prometheus text exposition
    pub fn export_metrics(&self) -> String {
        self.monitor.export_text()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn processor(&self) -> &BatchProcessor {
        &self.processor
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn codecs(&self) -> &Arc<CodecRegistry> {
        &self.codecs
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drain batch workers, stop background loops and flush pending L3 writes
    pub async fn shutdown(&self) {
        self.monitor.health_check().set_ready(false);
        self.processor.shutdown().await;
        if let Some(cleanup) = &self.cleanup {
            cleanup.stop().await;
        }
        if let Some(sampler) = &self.sampler {
            sampler.stop().await;
        }
        self.cache.wait_for_persistence().await;
        info!("Optimization engine stopped");
    }
}
