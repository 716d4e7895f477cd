//! # Runner Adapter Module / 运行器适配器模块
//!
//! This module owns the lifecycle of one test-runner subprocess: it expands
//! and splits the configured command line, spawns the process in the target
//! directory, and streams its stdout line by line over a bounded channel
//! until the process exits or the run is cancelled.
//!
//! 此模块拥有单个测试运行器子进程的生命周期：展开并拆分配置的命令行，
//! 在目标目录中派生进程，并通过有界通道逐行流式传输其 stdout，
//! 直到进程退出或运行被取消。

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the raw-line channel between the reader task and the run's
/// consumption loop. A full channel suspends the reader, which in turn
/// applies backpressure on the runner's pipe.
/// 读取任务与运行消费循环之间原始行通道的容量。
const LINE_BUFFER: usize = 256;

/// Failure to bring a runner subprocess up.
/// 启动运行器子进程失败。
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The tool's binary does not exist on this machine. Reported before a
    /// single line is produced; the run never leaves its queued phase.
    #[error("tool not found: `{command}`")]
    ToolNotFound { command: String },
    /// The configured command line could not be expanded or split.
    #[error("invalid tool command `{command}`: {reason}")]
    InvalidCommand { command: String, reason: String },
    /// Any other spawn failure (permissions, resource limits, …).
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// The closed set of launch mechanisms an adapter can use. All variants
/// share one capability interface: start, a cancellable line sequence, and
/// a final exit status. Supporting a new mechanism means adding a variant
/// here, nothing else changes.
/// 适配器可用的启动机制的封闭集合。所有变体共享同一能力接口：
/// 启动、可取消的行序列和最终退出状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerKind {
    /// Launches the tool directly as a local subprocess.
    #[default]
    Subprocess,
    /// Launches the tool through `docker run` with the target directory
    /// mounted at `/workspace`; the first word of the tool command names
    /// the image, the rest runs inside the container.
    Docker,
}

impl RunnerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subprocess" => Some(RunnerKind::Subprocess),
            "docker" => Some(RunnerKind::Docker),
            _ => None,
        }
    }
}

/// Spawns runner subprocesses. One `start` call produces one process and one
/// [`AdapterHandle`]; the handle is not restartable, retrying a tool means
/// calling `start` again.
pub struct RunnerAdapter;

impl RunnerAdapter {
    /// Launches `tool` via `kind` with `dir` as its working directory and
    /// attaches to its standard output.
    ///
    /// 通过 `kind` 以 `dir` 为工作目录启动 `tool` 并附加到其标准输出。
    pub fn start(kind: RunnerKind, tool: &str, dir: &Path) -> Result<AdapterHandle, AdapterError> {
        let expanded = shellexpand::full(tool)
            .map_err(|e| AdapterError::InvalidCommand {
                command: tool.to_string(),
                reason: e.to_string(),
            })?
            .to_string();

        let parts = shlex::split(&expanded).ok_or_else(|| AdapterError::InvalidCommand {
            command: tool.to_string(),
            reason: "unbalanced quoting".to_string(),
        })?;
        if parts.is_empty() {
            return Err(AdapterError::InvalidCommand {
                command: tool.to_string(),
                reason: "empty command".to_string(),
            });
        }
        let argv = match kind {
            RunnerKind::Subprocess => parts,
            RunnerKind::Docker => {
                let mut argv = vec![
                    "docker".to_string(),
                    "run".to_string(),
                    "--rm".to_string(),
                    format!("--volume={}:/workspace", dir.display()),
                    "--workdir=/workspace".to_string(),
                ];
                argv.extend(parts);
                argv
            }
        };
        let (program, args) = argv.split_first().expect("argv checked non-empty");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Backstop against leaks if the handle is dropped mid-run.
            // 如果句柄在运行中被丢弃，防止进程泄漏的兜底措施。
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AdapterError::ToolNotFound {
                    command: expanded.clone(),
                }
            } else {
                AdapterError::Spawn {
                    command: expanded.clone(),
                    source: e,
                }
            }
        })?;

        let stdout = child.stdout.take().ok_or_else(|| AdapterError::Spawn {
            command: expanded.clone(),
            source: std::io::Error::other("failed to capture runner stdout"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| AdapterError::Spawn {
            command: expanded.clone(),
            source: std::io::Error::other("failed to capture runner stderr"),
        })?;

        let (tx, rx) = mpsc::channel::<String>(LINE_BUFFER);
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    // Consumer went away (cancellation); stop reading.
                    break;
                }
            }
        });

        // The protocol only travels on stdout; stderr is drained so the
        // child never blocks on a full pipe, and kept visible to operators
        // through diagnostics.
        let command_for_log = expanded.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(command = %command_for_log, "runner stderr: {line}");
            }
        });

        Ok(AdapterHandle {
            command: expanded,
            child,
            lines: rx,
            readers: vec![stdout_task, stderr_task],
        })
    }
}

/// A live runner subprocess: a cancellable, lazy sequence of raw stdout
/// lines plus the final exit status.
/// 一个存活的运行器子进程：可取消、惰性产生的原始 stdout 行序列，
/// 以及最终的退出状态。
#[derive(Debug)]
pub struct AdapterHandle {
    command: String,
    child: Child,
    lines: mpsc::Receiver<String>,
    readers: Vec<JoinHandle<()>>,
}

impl AdapterHandle {
    /// The expanded command line this adapter runs, for diagnostics.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Next raw line from the runner's stdout; `None` once the process has
    /// closed its stream and all buffered lines were consumed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Asks the process to terminate, granting it `grace` to exit on its own
    /// before the forced kill. Returns the final exit status.
    ///
    /// 请求进程终止，在强制杀死之前给予 `grace` 时间让其自行退出。
    pub async fn terminate(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(status) => return status,
                Err(_) => {
                    warn!(command = %self.command, grace_ms = grace.as_millis() as u64,
                        "runner ignored SIGTERM, killing");
                }
            }
        }
        #[cfg(not(unix))]
        let _ = grace;

        self.child.kill().await?;
        self.child.wait().await
    }

    /// Reaps the process after its output stream ended and returns the exit
    /// status. Joins the reader tasks first so no diagnostic line is lost.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        for reader in self.readers.drain(..) {
            if let Err(e) = reader.await {
                warn!(command = %self.command, "failed to join output reader: {e}");
            }
        }
        self.child.wait().await
    }
}
