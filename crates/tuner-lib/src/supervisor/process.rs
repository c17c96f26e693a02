//! Launching benchmark processes with merged output

use crate::error::{Result, TuneError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffered output lines between the reader tasks and the supervisor
const LINE_BUFFER: usize = 1024;

/// A running benchmark
#[async_trait]
pub trait BenchmarkProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Next line of merged stdout/stderr; `None` once both streams close
    async fn next_line(&mut self) -> Option<String>;

    /// Kill immediately
    async fn kill(&mut self) -> Result<()>;

    /// Wait for exit and return the exit code, if the process had one
    async fn wait(&mut self) -> Result<Option<i32>>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, program: &Path, args: &[String]) -> Result<Box<dyn BenchmarkProcess>>;
}

/// Launches real OS processes through tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(&self, program: &Path, args: &[String]) -> Result<Box<dyn BenchmarkProcess>> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TuneError::ProcessLaunch {
                program: program.display().to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx)));
        }

        debug!(program = %program.display(), pid = ?child.id(), "Benchmark process started");

        Ok(Box::new(SystemProcess {
            child,
            lines: rx,
            readers,
        }))
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read benchmark output");
                break;
            }
        }
    }
}

struct SystemProcess {
    child: Child,
    lines: mpsc::Receiver<String>,
    readers: Vec<JoinHandle<()>>,
}

#[async_trait]
impl BenchmarkProcess for SystemProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        Ok(status.code())
    }
}

impl Drop for SystemProcess {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
