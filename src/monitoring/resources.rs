//! Process resource sampling.
//!
//! Coarse memory and CPU usage of the current process, sampled on an
//! interval and pushed into the performance monitor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::monitor::PerformanceMonitor;

/// One resource sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub sampled_at: DateTime<Utc>,
    /// Resident set size in bytes
    pub memory_bytes: u64,
    /// RSS as a percentage of total system memory
    pub memory_percent: f64,
    /// CPU usage since the previous sample (100 = one core)
    pub cpu_percent: f64,
}

/// Reads process usage through `sysinfo`
pub struct ResourceSampler {
    system: System,
    pid: Option<Pid>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "Cannot resolve current pid; resource sampling disabled");
                None
            }
        };
        let mut system = System::new();
        system.refresh_memory();
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }
        Self { system, pid }
    }

    /// Take a sample; `None` if the process cannot be inspected
    pub fn sample(&mut self) -> Option<ResourceUsage> {
        let pid = self.pid?;
        self.system.refresh_memory();
        if !self.system.refresh_process(pid) {
            return None;
        }
        let process = self.system.process(pid)?;

        let memory_bytes = process.memory();
        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            memory_bytes as f64 / total as f64 * 100.0
        };

        Some(ResourceUsage {
            sampled_at: Utc::now(),
            memory_bytes,
            memory_percent,
            cpu_percent: f64::from(process.cpu_usage()),
        })
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task feeding samples to the monitor
pub struct SamplerTask {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SamplerTask {
    /// Spawn the sampling loop
    pub fn spawn(monitor: Arc<PerformanceMonitor>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let every = monitor.config().sample_interval;

        let handle = tokio::spawn(async move {
            let mut sampler = ResourceSampler::new();
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        match sampler.sample() {
                            Some(usage) => monitor.record_resources(usage),
                            None => debug!("Resource sample unavailable"),
                        }
                    }
                }
            }
            debug!("Resource sampler stopped");
        });

        info!(interval = ?every, "Resource sampler started");
        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the loop and wait for it
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Resource sampler ended abnormally");
            }
        }
    }
}

impl Drop for SamplerTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
