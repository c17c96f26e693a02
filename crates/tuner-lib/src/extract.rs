//! Benchmark output parsing

use crate::models::{BenchmarkResult, DataSpeed, ThroughputPoint};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Turns raw benchmark output into metrics
pub trait MetricsExtractor: Send + Sync {
    /// Parse the complete output of a finished run
    fn extract(&self, raw: &str) -> BenchmarkResult;

    /// Running-average throughput carried by a single progress line, if any
    fn throughput_sample(&self, line: &str) -> Option<f64>;
}

struct Patterns {
    error: Regex,
    summary: Regex,
    progress: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        error: Regex::new(r"Unable to load options file|open error")
            .expect("error pattern is valid"),
        summary: Regex::new(
            r"(?m)^(\w+)\s+:\s+(\d+(?:\.\d+)?)\s+micros/op\s+(\d+)\s+ops/sec\s+(\d+(?:\.\d+)?)\s+seconds\s+(\d+)\s+operations;(?:\s+(\d+(?:\.\d+)?)\s+([\w/]+/s))?",
        )
        .expect("summary pattern is valid"),
        progress: Regex::new(
            r"and \((\d+(?:\.\d+)?),\s*(\d+(?:\.\d+)?)\) ops/second in \(\d+(?:\.\d+)?,\s*(\d+(?:\.\d+)?)\)",
        )
        .expect("progress pattern is valid"),
    })
}

/// Extractor for `db_bench` output
///
/// Summary lines look like
/// `fillrandom : 2.1 micros/op 476190 ops/sec 20.0 seconds 9523800 operations; 52.7 MB/s`
/// and progress lines (with `--stats_interval_seconds`) end in
/// `and (interval,cumulative) ops/second in (interval,elapsed) seconds`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbBenchExtractor;

impl DbBenchExtractor {
    /// Interval throughput at the elapsed time of a progress line
    fn progress_point(line: &str) -> Option<ThroughputPoint> {
        let caps = patterns().progress.captures(line)?;
        Some(ThroughputPoint {
            ops_per_sec: caps.get(1)?.as_str().parse().ok()?,
            elapsed_secs: caps.get(3)?.as_str().parse().ok()?,
        })
    }
}

impl MetricsExtractor for DbBenchExtractor {
    fn extract(&self, raw: &str) -> BenchmarkResult {
        let p = patterns();

        if let Some(m) = p.error.find(raw) {
            return BenchmarkResult::failed(raw[m.start()..].trim_end());
        }

        let throughput_series: Vec<_> = raw.lines().filter_map(Self::progress_point).collect();

        let Some(caps) = p.summary.captures_iter(raw).last() else {
            debug!(points = throughput_series.len(), "No summary line in benchmark output");
            return BenchmarkResult {
                throughput_series,
                ..Default::default()
            };
        };

        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
        let ops_per_sec = num(3);
        let data_speed = match (num(6), caps.get(7)) {
            (Some(value), Some(unit)) => Some(DataSpeed {
                value,
                unit: unit.as_str().to_string(),
            }),
            _ => ops_per_sec.map(|value| DataSpeed {
                value,
                unit: "ops/sec".to_string(),
            }),
        };

        BenchmarkResult {
            error: None,
            ops_per_sec,
            micros_per_op: num(2),
            total_seconds: num(4),
            total_operations: caps.get(5).and_then(|m| m.as_str().parse().ok()),
            data_speed,
            throughput_series,
        }
    }

    fn throughput_sample(&self, line: &str) -> Option<f64> {
        patterns()
            .progress
            .captures(line)?
            .get(2)?
            .as_str()
            .parse()
            .ok()
    }
}
