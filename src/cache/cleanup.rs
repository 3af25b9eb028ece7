//! Auto-Cleanup Scheduler
//!
//! Periodically trims an oversized L1, purges expired L2 entries and reaps
//! stale L3 files. Each cycle runs on its own; a failing cycle is logged and
//! the next one still runs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::tiered::{CleanupReport, TieredCache};
use crate::error::{Error, Result};

/// Default time between cleanup cycles
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Cleanup scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Start the scheduler with the engine
    pub enabled: bool,
    /// Time between cycles
    #[serde(with = "crate::config::duration_serde")]
    pub interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl CleanupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("cleanup.interval must be > 0".into()));
        }
        Ok(())
    }
}

/// Background cleanup scheduler
pub struct CleanupScheduler {
    cache: Arc<TieredCache>,
    config: CleanupConfig,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    pub fn new(cache: Arc<TieredCache>, config: CleanupConfig) -> Self {
        Self {
            cache,
            config,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Run a single cycle now
    pub async fn run_once(&self) -> CleanupReport {
        run_cycle(&self.cache).await
    }

    /// Start the periodic loop; a second call is a no-op
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let cache = Arc::clone(&self.cache);
        let cancel = self.cancel.clone();
        let period = self.config.interval;
        *handle = Some(tokio::spawn(run_loop(cache, period, cancel)));
        info!(interval = ?period, "Cleanup scheduler started");
    }

    /// Whether the loop is running
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cleanup scheduler task ended abnormally");
            }
            info!("Cleanup scheduler stopped");
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }
}

#[instrument(skip(cache))]
async fn run_cycle(cache: &TieredCache) -> CleanupReport {
    let report = cache.run_cleanup().await;
    if report != CleanupReport::default() {
        info!(
            l1_trimmed = report.l1_trimmed,
            l2_expired = report.l2_expired,
            l3_reaped = report.l3_reaped,
            "Cache cleanup cycle finished"
        );
    } else {
        debug!("Cache cleanup cycle found nothing to do");
    }
    report
}

async fn run_loop(cache: Arc<TieredCache>, period: Duration, cancel: CancellationToken) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    tick.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let cache = Arc::clone(&cache);
                // a panicking cycle must not end the loop
                if let Err(e) = tokio::spawn(async move { run_cycle(&cache).await }).await {
                    warn!(error = %e, "Cache cleanup cycle failed");
                }
            }
        }
    }
    debug!("Cleanup scheduler loop exited");
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
