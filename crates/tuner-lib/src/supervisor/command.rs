use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line of one `db_bench` invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCommand {
    pub executable: PathBuf,
    pub db_path: PathBuf,
    pub options_file: Option<PathBuf>,
    /// Shared region polled for live updates
    pub dynamic_options_file: Option<PathBuf>,
    /// Value of `--benchmarks`
    pub workload: String,
    pub threads: Option<u32>,
    pub duration_secs: Option<u64>,
    pub num: Option<u64>,
    pub trace_file: Option<PathBuf>,
    /// Emit progress lines at this interval
    pub stats_interval_secs: Option<u64>,
    /// Workload-specific flags, appended last
    pub extra_args: Vec<String>,
}

impl BenchmarkCommand {
    pub fn new(executable: impl Into<PathBuf>, db_path: impl Into<PathBuf>, workload: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            db_path: db_path.into(),
            options_file: None,
            dynamic_options_file: None,
            workload: workload.into(),
            threads: None,
            duration_secs: None,
            num: None,
            trace_file: None,
            stats_interval_secs: None,
            extra_args: Vec::new(),
        }
    }

    /// Arguments in the order `db_bench` documents them
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![format!("--db={}", self.db_path.display())];

        if let Some(path) = &self.options_file {
            args.push(format!("--options_file={}", path.display()));
        }
        if let Some(path) = &self.dynamic_options_file {
            args.push(format!("--dynamic_options_file={}", path.display()));
        }
        args.push(format!("--benchmarks={}", self.workload));
        if let Some(threads) = self.threads {
            args.push(format!("--threads={threads}"));
        }
        if let Some(duration) = self.duration_secs {
            args.push(format!("--duration={duration}"));
        }
        if let Some(num) = self.num {
            args.push(format!("--num={num}"));
        }
        if let Some(path) = &self.trace_file {
            args.push(format!("--trace_file={}", path.display()));
        }
        if let Some(secs) = self.stats_interval_secs {
            args.push(format!("--stats_interval_seconds={secs}"));
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_command() {
        let cmd = BenchmarkCommand::new("/usr/bin/db_bench", "/tmp/db", "fillrandom");
        assert_eq!(cmd.to_args(), vec!["--db=/tmp/db", "--benchmarks=fillrandom"]);
    }

    #[test]
    fn test_full_command_keeps_extra_args_last() {
        let mut cmd = BenchmarkCommand::new("db_bench", "/data/db", "readrandom");
        cmd.options_file = Some("/out/3.ini".into());
        cmd.dynamic_options_file = Some("/tmp/mmap_file.mmap".into());
        cmd.threads = Some(4);
        cmd.duration_secs = Some(600);
        cmd.num = Some(1_000_000);
        cmd.trace_file = Some("/data/db/tracefile".into());
        cmd.stats_interval_secs = Some(5);
        cmd.extra_args = vec!["--use_existing_db".into(), "--reads=5000000".into()];

        assert_eq!(
            cmd.to_args(),
            vec![
                "--db=/data/db",
                "--options_file=/out/3.ini",
                "--dynamic_options_file=/tmp/mmap_file.mmap",
                "--benchmarks=readrandom",
                "--threads=4",
                "--duration=600",
                "--num=1000000",
                "--trace_file=/data/db/tracefile",
                "--stats_interval_seconds=5",
                "--use_existing_db",
                "--reads=5000000",
            ]
        );
    }
}
