//! # Data Models Module / 数据模型模块
//!
//! This module defines the core data structures shared across the relay:
//! run identifiers and phases, test node statuses, the deltas produced by
//! the run state machine and the snapshot trees handed to late-joining
//! subscribers.
//!
//! 此模块定义了在整个中继器中共享的核心数据结构：
//! 运行标识符和阶段、测试节点状态、由运行状态机产生的增量
//! 以及交给迟加入订阅者的快照树。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local counter backing [`RunId::next`].
/// 支持 [`RunId::next`] 的进程内计数器。
static RUN_ID_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identifies one invocation of one configured tool for the lifetime of the
/// supervisor process.
/// 在 supervisor 进程的生命周期内标识一个已配置工具的一次调用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl RunId {
    /// Allocates the next run id.
    pub fn next() -> Self {
        RunId(RUN_ID_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Lifecycle phase of a run.
/// 一次运行的生命周期阶段。
///
/// `Queued → Running → {Completed, Crashed}`; the two right-hand phases are
/// terminal and accept no further events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// Created but no event accepted yet. / 已创建但尚未接受任何事件。
    Queued,
    /// At least one event accepted. / 已接受至少一个事件。
    Running,
    /// The root suite emitted its end-of-run signal. / 根套件发出了结束信号。
    Completed,
    /// The adapter stream ended without an end-of-run signal.
    /// 适配器流在没有结束信号的情况下终止。
    Crashed,
}

impl RunPhase {
    /// Terminal phases accept no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Crashed)
    }
}

/// Current status of a single test node in the hierarchy.
/// 层级中单个测试节点的当前状态。
///
/// Leaf nodes carry the status reported by the runner; suite nodes always
/// carry a status derived bottom-up from their children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl TestStatus {
    /// A terminal status will not change again unless the runner re-reports.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestStatus::Passed | TestStatus::Failed | TestStatus::Skipped | TestStatus::Errored
        )
    }

    /// True for the statuses that should fail a one-shot invocation.
    pub fn is_bad(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Errored)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Pending => "pending",
            TestStatus::Running => "running",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// One incremental state change produced by applying a single event, relayed
/// to subscribers by the broadcast hub.
/// 应用单个事件产生的一次增量状态变化，由广播中心转发给订阅者。
///
/// The `seq` is assigned by the run state machine at application time and is
/// strictly increasing per run, so subscribers can detect drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub run: RunId,
    pub seq: u64,
    #[serde(flatten)]
    pub change: Change,
}

/// The kind-specific body of a [`Delta`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "kebab-case")]
pub enum Change {
    /// The run moved to a new lifecycle phase.
    Phase { phase: RunPhase, at: DateTime<Utc> },
    /// A node's status or result payload changed.
    Node {
        path: Vec<String>,
        status: TestStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Diagnostic text was attached to a node; never a status change.
    Log { path: Vec<String>, message: String },
}

/// One test or suite inside a [`RunSnapshot`] tree.
/// [`RunSnapshot`] 树中的一个测试或套件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Pending,
            duration_ms: None,
            message: None,
            logs: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// The full current state of one run, given to newly joining subscribers and
/// maintained by the broadcast hub as a pure fold of the run's deltas.
/// 一次运行的完整当前状态，交给新加入的订阅者，
/// 由广播中心作为该运行增量的纯折叠来维护。
///
/// Because the snapshot is produced by replaying deltas, a subscriber that
/// applies the live feed to the snapshot it received stays byte-for-byte
/// consistent with every other subscriber of the same run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run: RunId,
    /// Display name of the configured tool this run executes.
    pub name: String,
    pub phase: RunPhase,
    /// Sequence number of the last folded delta (0 before the first).
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Run-level diagnostics: log/error records that could not be attached
    /// to any node (no suite open yet, crash notes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    /// Top-level suites, in first-seen order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tree: Vec<NodeSnapshot>,
}

impl RunSnapshot {
    pub fn new(run: RunId, name: &str) -> Self {
        Self {
            run,
            name: name.to_string(),
            phase: RunPhase::Queued,
            seq: 0,
            started_at: None,
            finished_at: None,
            logs: Vec::new(),
            tree: Vec::new(),
        }
    }

    /// Folds one delta into the snapshot.
    ///
    /// This is the exact replay a subscriber performs on its own copy, which
    /// is what keeps the late-join snapshot and the live feed consistent.
    pub fn apply(&mut self, delta: &Delta) {
        self.seq = delta.seq;
        match &delta.change {
            Change::Phase { phase, at } => {
                self.phase = *phase;
                match phase {
                    RunPhase::Running => self.started_at = Some(*at),
                    RunPhase::Completed | RunPhase::Crashed => self.finished_at = Some(*at),
                    RunPhase::Queued => {}
                }
            }
            Change::Node {
                path,
                status,
                duration_ms,
                message,
            } => {
                let node = resolve_mut(&mut self.tree, path);
                node.status = *status;
                if duration_ms.is_some() {
                    node.duration_ms = *duration_ms;
                }
                if message.is_some() {
                    node.message = message.clone();
                }
            }
            Change::Log { path, message } => {
                if path.is_empty() {
                    self.logs.push(message.clone());
                } else {
                    resolve_mut(&mut self.tree, path).logs.push(message.clone());
                }
            }
        }
    }

    /// Looks up a node by suite path, if present.
    pub fn node(&self, path: &[String]) -> Option<&NodeSnapshot> {
        let mut level = &self.tree;
        let mut found: Option<&NodeSnapshot> = None;
        for name in path {
            let node = level.iter().find(|n| &n.name == name)?;
            level = &node.children;
            found = Some(node);
        }
        found
    }

    /// True if any node in the tree carries a failed or errored status, or
    /// the run itself crashed.
    pub fn has_failures(&self) -> bool {
        fn walk(nodes: &[NodeSnapshot]) -> bool {
            nodes.iter().any(|n| n.status.is_bad() || walk(&n.children))
        }
        self.phase == RunPhase::Crashed || walk(&self.tree)
    }

    /// Visits every node depth-first with its nesting depth, for reporting.
    pub fn visit<'a>(&'a self, mut f: impl FnMut(&'a NodeSnapshot, usize)) {
        fn walk<'a, F: FnMut(&'a NodeSnapshot, usize)>(
            nodes: &'a [NodeSnapshot],
            depth: usize,
            f: &mut F,
        ) {
            for node in nodes {
                f(node, depth);
                walk(&node.children, depth + 1, f);
            }
        }
        walk(&self.tree, 0, &mut f);
    }
}

/// Resolves `path` inside a snapshot tree, creating pending nodes on the way.
/// Intermediate creation mirrors the state machine's auto-created ancestors,
/// so replaying deltas out of an empty snapshot can never miss a parent.
/// 在快照树中解析 `path`，沿途创建 pending 节点。
fn resolve_mut<'a>(level: &'a mut Vec<NodeSnapshot>, path: &[String]) -> &'a mut NodeSnapshot {
    let (first, rest) = path
        .split_first()
        .expect("node delta carries a non-empty suite path");
    let idx = match level.iter().position(|n| &n.name == first) {
        Some(idx) => idx,
        None => {
            level.push(NodeSnapshot::new(first));
            level.len() - 1
        }
    };
    let node = &mut level[idx];
    if rest.is_empty() {
        node
    } else {
        resolve_mut(&mut node.children, rest)
    }
}
