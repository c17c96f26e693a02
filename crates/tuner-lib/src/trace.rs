//! Workload-trace summaries offered to the proposer
//!
//! The engine's trace analyzer turns a query trace into a feature table with
//! one row per 10-second window and per-operation columns such as
//! `get_access_count` or `put_value_size_average`. [`FeatureTraceAnalyzer`]
//! reads that table (CSV) and renders the query composition and key/value
//! size profile as text.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[async_trait]
pub trait TraceAnalyzer: Send + Sync {
    /// Summary of the whole trace
    async fn summarize(&self, path: &Path) -> Option<String>;

    /// Summary of the last `windows` windows only
    async fn summarize_recent(&self, path: &Path, windows: usize) -> Option<String>;
}

/// Analyzer used when no trace is being collected
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTraceAnalyzer;

#[async_trait]
impl TraceAnalyzer for NullTraceAnalyzer {
    async fn summarize(&self, _path: &Path) -> Option<String> {
        None
    }

    async fn summarize_recent(&self, _path: &Path, _windows: usize) -> Option<String> {
        None
    }
}

/// Seconds covered by one row of the feature table
pub const WINDOW_SECS: usize = 10;

/// File name the trace analyzer writes its windowed features to
pub const FEATURES_FILE: &str = "ml_feature_windows.csv";

const OPERATIONS: [&str; 9] = [
    "get",
    "put",
    "delete",
    "singledelete",
    "rangedelete",
    "merge",
    "iterator_seek",
    "iterator_seekForPrev",
    "multiget",
];

const ACCESS_COUNT_SUFFIX: &str = "_access_count";

/// Summaries built from the windowed feature table of a trace
#[derive(Debug, Clone, Default)]
pub struct FeatureTraceAnalyzer {
    features: Option<PathBuf>,
}

impl FeatureTraceAnalyzer {
    /// `features` overrides the table location; by default it is
    /// [`FEATURES_FILE`] next to the trace
    pub fn new(features: Option<PathBuf>) -> Self {
        Self { features }
    }

    pub fn features_for(&self, trace: &Path) -> PathBuf {
        match &self.features {
            Some(path) => path.clone(),
            None => trace
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(FEATURES_FILE),
        }
    }

    async fn load(&self, trace: &Path) -> Option<FeatureTable> {
        let path = self.features_for(trace);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No trace features available");
                return None;
            }
        };
        let table = FeatureTable::parse(&text);
        if table.is_none() {
            warn!(path = %path.display(), "Trace feature table is empty or malformed");
        }
        table
    }
}

#[async_trait]
impl TraceAnalyzer for FeatureTraceAnalyzer {
    async fn summarize(&self, path: &Path) -> Option<String> {
        let table = self.load(path).await?;
        let rows: Vec<&[f64]> = table.rows.iter().map(Vec::as_slice).collect();

        let mut out = String::from("The workload information is as follows:\n");
        out.push_str("1. Query Compositions\n");
        out.push_str(&table.composition_text(&rows));
        out.push('\n');
        out.push_str("2. Key and Value Size Characteristics\n");
        for line in table.size_profile(&rows) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(&format!(
            "The benchmark running time is: {} seconds.\n",
            table.rows.len() * WINDOW_SECS
        ));
        Some(out)
    }

    async fn summarize_recent(&self, path: &Path, windows: usize) -> Option<String> {
        let table = self.load(path).await?;
        let skip = table.rows.len().saturating_sub(windows);

        let mut out = String::from("The workload information is as follows:\n");
        out.push_str(&format!(
            "Here is the summary of the last {} windows ({WINDOW_SECS} seconds each) of the trace:\n",
            table.rows.len() - skip
        ));
        for (index, row) in table.rows.iter().enumerate().skip(skip) {
            out.push_str(&format!(
                "Time window {}: Query Compositions: {}\n",
                index + 1,
                table.composition_text(&[row.as_slice()])
            ));
        }
        Some(out)
    }
}

/// Numeric CSV with a header row; blank or non-numeric cells read as NaN
#[derive(Debug, Clone, PartialEq)]
struct FeatureTable {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureTable {
    fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let columns: Vec<String> = lines
            .next()?
            .split(',')
            .map(|c| c.trim().to_string())
            .collect();
        let rows: Vec<Vec<f64>> = lines
            .map(|line| {
                let mut row: Vec<f64> = line
                    .split(',')
                    .map(|cell| cell.trim().parse().unwrap_or(f64::NAN))
                    .collect();
                row.resize(columns.len(), f64::NAN);
                row
            })
            .collect();
        (!rows.is_empty()).then_some(Self { columns, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Mean of a column over `rows`, skipping NaN cells
    fn mean(&self, name: &str, rows: &[&[f64]]) -> Option<f64> {
        let i = self.column(name)?;
        let values: Vec<f64> = rows.iter().map(|r| r[i]).filter(|v| !v.is_nan()).collect();
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Share of each operation in all accesses, in column order, zeros dropped
    fn composition(&self, rows: &[&[f64]]) -> Vec<(String, f64)> {
        let sums: Vec<(String, f64)> = self
            .columns
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                let op = name.strip_suffix(ACCESS_COUNT_SUFFIX)?;
                let sum: f64 = rows.iter().map(|r| r[i]).filter(|v| !v.is_nan()).sum();
                Some((capitalize(op), sum))
            })
            .collect();
        let total: f64 = sums.iter().map(|(_, s)| s).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        sums.into_iter()
            .map(|(op, sum)| (op, sum / total * 100.0))
            .filter(|(_, pct)| *pct > 0.0)
            .collect()
    }

    fn composition_text(&self, rows: &[&[f64]]) -> String {
        let composition = self.composition(rows);
        if composition.is_empty() {
            return "No queries were recorded.".to_string();
        }
        let parts: Vec<String> = composition
            .iter()
            .map(|(op, pct)| format!("{pct:.2}% {op}"))
            .collect();
        format!(
            "The workload consists of interleaved {}. This is a {} workload.",
            parts.join(", "),
            workload_type(&composition)
        )
    }

    fn size_profile(&self, rows: &[&[f64]]) -> Vec<String> {
        let mut lines = Vec::new();
        for op in OPERATIONS {
            let mut messages = Vec::new();

            let key = |stat: &str| self.mean(&format!("{op}_key_size_{stat}"), rows);
            if let (Some(avg), Some(_), Some(var)) = (key("average"), key("median"), key("variance")) {
                if avg > 0.0 {
                    messages.push(if var == 0.0 {
                        format!("Average key size is {avg:.2} bytes with 0 variance.")
                    } else {
                        format!("Average key size is {avg:.2} bytes with a larger variance (around {var:.2}).")
                    });
                }
            }

            let value = |stat: &str| self.mean(&format!("{op}_value_size_{stat}"), rows);
            if let (Some(avg), Some(median), Some(var)) =
                (value("average"), value("median"), value("variance"))
            {
                if avg > 0.0 && median > 0.0 {
                    messages.push(if var == 0.0 {
                        format!(
                            "Average value size is {avg:.2} bytes, with the median also at {median:.2} bytes and zero variance."
                        )
                    } else {
                        format!("Average value size is {avg:.2} bytes with a larger variance (around {var:.2}).")
                    });
                }
            }

            if !messages.is_empty() {
                lines.push(format!("For {op} operations: {}", messages.join(" ")));
            }
        }
        lines
    }
}

fn capitalize(op: &str) -> String {
    let lower = op.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn describe(op: &str) -> &str {
    match op {
        "Get" => "Read",
        "Put" => "Write",
        "Merge" => "Merge/read-modify-write",
        other => other,
    }
}

/// One-phrase label for a query mix
fn workload_type(composition: &[(String, f64)]) -> String {
    let balanced = |i: usize| composition.get(i).is_some_and(|(_, p)| (45.0..=55.0).contains(p));
    match composition {
        [(op, _)] => format!("{} only", describe(op)),
        _ if balanced(0) && balanced(1) => "heavy updating".to_string(),
        _ => composition
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(op, _)| format!("{} heavy", describe(op)))
            .unwrap_or_default(),
    }
}
