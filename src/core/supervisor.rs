//! # Run Supervisor Module / 运行监督模块
//!
//! This module owns the set of active runs. For each started tool it pairs a
//! runner adapter with a run state machine and spawns one independent
//! consumption loop: adapter lines → codec → state machine → broadcast hub.
//! Runs never share mutable state; the registry is the only guarded
//! structure and is locked only for insert/lookup/remove.
//!
//! 此模块拥有活动运行的集合。对每个启动的工具，它将一个运行器适配器
//! 与一个运行状态机配对，并派生一个独立的消费循环：
//! 适配器行 → 编解码器 → 状态机 → 广播中心。
//! 各运行之间不共享可变状态；注册表是唯一需要加锁的结构，
//! 且仅在插入/查找/移除的短暂操作中持锁。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::ToolSpec;
use crate::core::hub::BroadcastHub;
use crate::core::models::{RunId, RunPhase, RunSnapshot};
use crate::core::protocol::{self, Event};
use crate::core::state::RunStateMachine;
use crate::infra::adapter::{AdapterError, AdapterHandle, RunnerAdapter, RunnerKind};

/// How long a cancelled runner may keep running after the termination signal
/// before it is force-killed.
/// 取消的运行器在收到终止信号后、被强制杀死前允许继续运行的时间。
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

struct RunEntry {
    spec: ToolSpec,
    cancel: CancellationToken,
    /// Cancelled by the consumption loop on exit; `wait` blocks on it.
    done: CancellationToken,
}

/// Orchestrates one or more concurrent runs and exposes their lifecycle
/// controls: start, cancel, query.
/// 编排一个或多个并发运行，并暴露其生命周期控制：启动、取消、查询。
pub struct Supervisor {
    hub: Arc<BroadcastHub>,
    runner: RunnerKind,
    runs: Mutex<HashMap<RunId, RunEntry>>,
}

impl Supervisor {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self::with_runner(hub, RunnerKind::default())
    }

    /// A supervisor whose adapters launch through the given mechanism.
    pub fn with_runner(hub: Arc<BroadcastHub>, runner: RunnerKind) -> Self {
        Self {
            hub,
            runner,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Creates a run for `spec` against `dir`, launches its adapter and
    /// spawns its consumption loop.
    ///
    /// On [`AdapterError::ToolNotFound`] (or any other launch failure) the
    /// error surfaces immediately, the run stays registered in its queued
    /// phase and no phase delta is ever published for it. Other runs are
    /// unaffected.
    ///
    /// 为 `spec` 创建一次针对 `dir` 的运行，启动其适配器并派生消费循环。
    pub async fn start_run(&self, spec: &ToolSpec, dir: &Path) -> Result<RunId, AdapterError> {
        let run = RunId::next();
        self.hub.open_run(run, &spec.name).await;

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        self.runs.lock().await.insert(
            run,
            RunEntry {
                spec: spec.clone(),
                cancel: cancel.clone(),
                done: done.clone(),
            },
        );

        let adapter = match RunnerAdapter::start(self.runner, &spec.tool, dir) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(%run, tool = %spec.tool, "runner launch failed: {e}");
                // Nothing will ever produce events for this run.
                done.cancel();
                return Err(e);
            }
        };

        info!(%run, tool = %spec.tool, name = %spec.name, dir = %dir.display(), "run started");
        let machine = RunStateMachine::new(run);
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            consume(run, adapter, machine, hub, cancel).await;
            done.cancel();
        });

        Ok(run)
    }

    /// Requests cancellation of a run. The consumption loop terminates the
    /// adapter (grace period, then force-kill) and records the crash
    /// transition once the process confirmed termination.
    pub async fn cancel_run(&self, run: RunId) -> Result<()> {
        let runs = self.runs.lock().await;
        match runs.get(&run) {
            Some(entry) => {
                entry.cancel.cancel();
                Ok(())
            }
            None => bail!("unknown run {run}"),
        }
    }

    /// Cancels every registered run; used on shutdown.
    pub async fn cancel_all(&self) {
        for entry in self.runs.lock().await.values() {
            entry.cancel.cancel();
        }
    }

    /// Immutable copy of a run's current tree, for replay purposes.
    pub async fn snapshot(&self, run: RunId) -> Option<RunSnapshot> {
        self.hub.snapshot(run).await
    }

    /// Snapshots of all runs, oldest first.
    pub async fn runs(&self) -> Vec<RunSnapshot> {
        self.hub.list().await
    }

    /// The configured tool of a run, if it exists.
    pub async fn tool_of(&self, run: RunId) -> Option<ToolSpec> {
        self.runs.lock().await.get(&run).map(|e| e.spec.clone())
    }

    /// Waits until a run's consumption loop has finished (the run reached a
    /// terminal phase, or never got a running adapter).
    pub async fn wait(&self, run: RunId) {
        let done = {
            let runs = self.runs.lock().await;
            match runs.get(&run) {
                Some(entry) => entry.done.clone(),
                None => return,
            }
        };
        done.cancelled().await;
    }
}

/// One run's consumption loop: decodes every adapter line, feeds the state
/// machine and forwards the resulting deltas to the hub. Decode failures
/// become injected `error` pseudo-events attached to the innermost open
/// suite, so feed corruption is visible instead of silently dropped.
///
/// 一次运行的消费循环：解码适配器的每一行，馈送状态机，
/// 并将产生的增量转发给广播中心。
async fn consume(
    run: RunId,
    mut adapter: AdapterHandle,
    mut machine: RunStateMachine,
    hub: Arc<BroadcastHub>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let status = adapter.terminate(TERMINATE_GRACE).await;
                info!(%run, ?status, "run cancelled");
                let deltas = machine.finish(Utc::now(), Some("run cancelled".to_string()));
                hub.publish(run, deltas).await;
                return;
            }
            line = adapter.next_line() => {
                match line {
                    Some(line) => {
                        let event = match protocol::decode(&line) {
                            Ok(event) => event,
                            Err(e) => Event::error(
                                machine.current_suite_path(),
                                Utc::now(),
                                format!("undecodable runner line ({e}): {line}"),
                            ),
                        };
                        let deltas = machine.apply(&event);
                        hub.publish(run, deltas).await;
                    }
                    None => {
                        // Stream ended: the process is gone. A completed run
                        // stays completed regardless of exit code; anything
                        // else is a crash.
                        let status = adapter.wait().await;
                        let reason = match &status {
                            Ok(s) => format!("runner exited with {s} before the end-of-run signal"),
                            Err(e) => format!("runner could not be reaped: {e}"),
                        };
                        if machine.phase() == RunPhase::Completed {
                            if let Ok(s) = &status {
                                if !s.success() {
                                    warn!(%run, status = %s, "runner exited nonzero after completing");
                                }
                            }
                        }
                        let deltas = machine.finish(Utc::now(), Some(reason));
                        hub.publish(run, deltas).await;
                        info!(%run, phase = ?machine.phase(), ?status, "run finished");
                        return;
                    }
                }
            }
        }
    }
}
