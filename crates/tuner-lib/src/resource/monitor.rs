//! Background usage sampling for a resource group
//!
//! Samples are taken at a fixed interval and only ever consumed in
//! aggregate: the whole session on stop, or a trailing window while the
//! benchmark is still running.

use super::{parse_cpu_usage_usec, parse_limit};
use crate::models::{UsageSample, UsageStats};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the usage monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sampling interval (default: 1 second)
    pub interval: Duration,
    /// CPU limit in cores, used to normalize CPU percent
    pub cpu_cores: f64,
    /// Memory limit used when `memory.max` is unlimited
    pub memory_bytes: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            cpu_cores: 2.0,
            memory_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

/// Samples a resource group's CPU and memory usage in the background
pub struct ResourceMonitor {
    group_path: PathBuf,
    config: MonitorConfig,
    samples: Arc<Mutex<Vec<UsageSample>>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ResourceMonitor {
    pub fn new(group_path: impl Into<PathBuf>, config: MonitorConfig) -> Self {
        Self {
            group_path: group_path.into(),
            config,
            samples: Arc::new(Mutex::new(Vec::new())),
            shutdown: None,
            task: None,
        }
    }

    /// Whether the sampling task is running
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Begin sampling; previous samples are discarded
    pub fn start_monitoring(&mut self) {
        if self.is_running() {
            warn!(path = %self.group_path.display(), "Monitor already running");
            return;
        }

        self.lock_samples().clear();

        let (tx, rx) = oneshot::channel();
        let path = self.group_path.clone();
        let config = self.config.clone();
        let samples = Arc::clone(&self.samples);

        info!(
            path = %path.display(),
            interval_ms = config.interval.as_millis() as u64,
            "Starting resource monitor"
        );

        self.task = Some(tokio::spawn(sample_loop(path, config, samples, rx)));
        self.shutdown = Some(tx);
    }

    /// Stop sampling and return the whole-session averages
    pub async fn stop_monitoring(&mut self) -> UsageStats {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }

        let stats = UsageStats::from_samples(self.lock_samples().iter());
        info!(
            avg_cpu_percent = stats.avg_cpu_percent,
            avg_mem_percent = stats.avg_mem_percent,
            samples = stats.sample_count,
            "Resource monitor stopped"
        );
        stats
    }

    /// Averages over samples taken within the trailing `window`
    pub fn last_n_stats(&self, window: Duration) -> UsageStats {
        let window = chrono::Duration::from_std(window)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = chrono::Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let samples = self.lock_samples();
        UsageStats::from_samples(samples.iter().filter(|s| s.timestamp >= cutoff))
    }

    fn lock_samples(&self) -> std::sync::MutexGuard<'_, Vec<UsageSample>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn sample_loop(
    path: PathBuf,
    config: MonitorConfig,
    samples: Arc<Mutex<Vec<UsageSample>>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous: Option<(Instant, u64)> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match read_sample(&path, &config, &mut previous).await {
                    Some(sample) => samples
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(sample),
                    None => debug!(path = %path.display(), "No usage sample this tick"),
                }
            }
            _ = &mut shutdown => break,
        }
    }
}

/// Read one sample; the first call only establishes the CPU baseline
async fn read_sample(
    path: &Path,
    config: &MonitorConfig,
    previous: &mut Option<(Instant, u64)>,
) -> Option<UsageSample> {
    let cpu_stat = tokio::fs::read_to_string(path.join("cpu.stat")).await.ok()?;
    let usage_usec = parse_cpu_usage_usec(&cpu_stat)?;
    let now = Instant::now();

    let memory_current: u64 = tokio::fs::read_to_string(path.join("memory.current"))
        .await
        .ok()
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(0);
    let memory_limit = tokio::fs::read_to_string(path.join("memory.max"))
        .await
        .ok()
        .and_then(|c| parse_limit(&c))
        .unwrap_or(config.memory_bytes);

    let last = previous.replace((now, usage_usec));
    let (last_at, last_usage) = last?;

    let wall_usec = now.duration_since(last_at).as_micros() as f64;
    if wall_usec <= 0.0 {
        return None;
    }

    let cores = if config.cpu_cores > 0.0 { config.cpu_cores } else { 1.0 };
    let cpu_percent = usage_usec.saturating_sub(last_usage) as f64 / wall_usec / cores * 100.0;
    let mem_percent = if memory_limit == 0 {
        0.0
    } else {
        memory_current as f64 / memory_limit as f64 * 100.0
    };

    Some(UsageSample {
        timestamp: chrono::Utc::now(),
        cpu_percent,
        mem_percent,
    })
}
