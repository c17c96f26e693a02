//! Core data models shared by the supervisor and the search tree

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One resource usage sample taken from a resource group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// Averages over a set of usage samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub avg_cpu_percent: f64,
    pub avg_mem_percent: f64,
    pub sample_count: usize,
}

impl UsageStats {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a UsageSample>) -> Self {
        let mut cpu = 0.0;
        let mut mem = 0.0;
        let mut count = 0usize;

        for sample in samples {
            cpu += sample.cpu_percent;
            mem += sample.mem_percent;
            count += 1;
        }

        if count == 0 {
            return Self::default();
        }

        Self {
            avg_cpu_percent: cpu / count as f64,
            avg_mem_percent: mem / count as f64,
            sample_count: count,
        }
    }
}

/// CPU, memory and swap caps applied to a benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit in cores
    pub cpu_cores: f64,
    /// Memory limit in bytes
    pub memory_bytes: u64,
    /// Swap limit in bytes
    pub swap_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_cores: 2.0,
            memory_bytes: 4 * 1024 * 1024 * 1024,
            swap_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

/// Throughput at a point in the run: (elapsed seconds, ops/sec)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputPoint {
    pub elapsed_secs: f64,
    pub ops_per_sec: f64,
}

/// Data throughput with its unit, e.g. `(64.5, "MB/s")`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSpeed {
    pub value: f64,
    pub unit: String,
}

/// Metrics extracted from a finished benchmark's output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ops_per_sec: Option<f64>,
    pub micros_per_op: Option<f64>,
    pub total_seconds: Option<f64>,
    pub total_operations: Option<u64>,
    pub data_speed: Option<DataSpeed>,
    #[serde(default)]
    pub throughput_series: Vec<ThroughputPoint>,
}

impl BenchmarkResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// A run is usable when it reported no error and produced a data speed
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && self.data_speed.is_some()
    }
}
