//! # Run State Machine Module / 运行状态机模块
//!
//! This module folds the ordered event sequence of one run into an
//! authoritative, queryable state tree (suite → test → status) and produces
//! the deltas the broadcast hub relays to subscribers.
//!
//! 此模块将一次运行的有序事件序列折叠为权威的、可查询的状态树
//! （套件 → 测试 → 状态），并产生由广播中心转发给订阅者的增量。
//!
//! Test nodes live in an arena indexed by integer handle: parents own child
//! handles, children keep a non-owning parent handle for the bottom-up
//! aggregation walk. A synthetic unnamed root (handle 0) anchors the
//! top-level suites and is never exported in deltas.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::models::{Change, Delta, RunId, RunPhase, TestStatus};
use crate::core::protocol::{Event, EventKind, EventPayload};

const ROOT: usize = 0;

/// One test or suite in the arena.
struct TestNode {
    name: String,
    parent: usize,
    children: Vec<usize>,
    status: TestStatus,
    duration_ms: Option<f64>,
    message: Option<String>,
}

impl TestNode {
    fn new(name: String, parent: usize) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            status: TestStatus::Pending,
            duration_ms: None,
            message: None,
        }
    }
}

/// Consumes the event sequence of one run and maintains its current state.
/// 消费一次运行的事件序列并维护其当前状态。
///
/// The machine is exclusively owned by the run's consumption loop; all
/// external observation goes through the deltas it emits (folded into
/// snapshots by the hub), never through direct tree access.
pub struct RunStateMachine {
    run: RunId,
    phase: RunPhase,
    nodes: Vec<TestNode>,
    /// Sequence number of the last emitted delta.
    seq: u64,
    /// Stack of suite handles opened by `suite-start` and not yet ended;
    /// decode-failure pseudo-events attach to its top.
    open_suites: Vec<usize>,
    /// Events that arrived after a terminal phase, kept as a diagnostic.
    late_events: u64,
}

impl RunStateMachine {
    pub fn new(run: RunId) -> Self {
        Self {
            run,
            phase: RunPhase::Queued,
            nodes: vec![TestNode::new(String::new(), ROOT)],
            seq: 0,
            open_suites: Vec::new(),
            late_events: 0,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Sequence number of the last applied event's final delta.
    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    /// Count of events rejected because the run had already finished.
    pub fn late_events(&self) -> u64 {
        self.late_events
    }

    /// Path of the innermost suite still open, for attaching injected
    /// error pseudo-events. Empty when no suite has started yet.
    pub fn current_suite_path(&self) -> Vec<String> {
        match self.open_suites.last() {
            Some(&handle) => self.path_of(handle),
            None => Vec::new(),
        }
    }

    /// Applies one event and returns the resulting deltas in the order the
    /// broadcast hub must relay them.
    ///
    /// 应用一个事件并按广播中心必须转发的顺序返回所产生的增量。
    pub fn apply(&mut self, event: &Event) -> Vec<Delta> {
        if self.phase.is_terminal() {
            // Terminal runs accept nothing further; keep the fact visible.
            self.late_events += 1;
            warn!(
                run = %self.run,
                kind = ?event.kind,
                late_events = self.late_events,
                "event after terminal phase ignored"
            );
            return Vec::new();
        }

        let mut deltas = Vec::new();
        if self.phase == RunPhase::Queued {
            self.phase = RunPhase::Running;
            self.emit_phase(event.timestamp, &mut deltas);
        }

        let handle = self.resolve(&event.suite_path, &mut deltas);

        match event.kind {
            EventKind::SuiteStart => {
                self.open_suites.push(handle);
            }
            EventKind::SuiteEnd => {
                if let Some(pos) = self.open_suites.iter().rposition(|&h| h == handle) {
                    self.open_suites.truncate(pos);
                }
                // A depth-1 suite end is the run's end-of-run signal.
                if event.suite_path.len() == 1 {
                    self.phase = RunPhase::Completed;
                    self.emit_phase(event.timestamp, &mut deltas);
                }
            }
            EventKind::TestStart => {
                self.nodes[handle].status = TestStatus::Running;
                self.emit_node(handle, &mut deltas);
                self.bubble(handle, &mut deltas);
            }
            EventKind::TestResult => {
                let EventPayload::Result {
                    status,
                    duration_ms,
                    message,
                } = &event.payload
                else {
                    debug!(run = %self.run, "test-result without result payload");
                    return deltas;
                };
                // Last write wins: a duplicate report overwrites the
                // terminal status and re-emits its delta.
                let node = &mut self.nodes[handle];
                node.status = TestStatus::from(*status);
                if duration_ms.is_some() {
                    node.duration_ms = *duration_ms;
                }
                if message.is_some() {
                    node.message = message.clone();
                }
                self.emit_node(handle, &mut deltas);
                self.bubble(handle, &mut deltas);
            }
            EventKind::Log | EventKind::Error => {
                let text = match &event.payload {
                    EventPayload::Message { message } => message.clone(),
                    _ => String::new(),
                };
                // Recorded even on nodes already terminal, but never a
                // status change.
                let path = if handle == ROOT {
                    Vec::new()
                } else {
                    self.path_of(handle)
                };
                self.emit(Change::Log { path, message: text }, &mut deltas);
            }
        }

        deltas
    }

    /// Closes the run after its adapter stream ended or was cancelled.
    ///
    /// A run that already completed is left untouched; otherwise the run
    /// crashes: every node still running is marked errored (bottom-up), an
    /// optional diagnostic is attached, and the final phase delta is emitted.
    ///
    /// 在适配器流结束或被取消后关闭运行。
    pub fn finish(&mut self, at: DateTime<Utc>, reason: Option<String>) -> Vec<Delta> {
        if self.phase.is_terminal() {
            return Vec::new();
        }

        let mut deltas = Vec::new();
        if let Some(message) = reason {
            self.emit(
                Change::Log {
                    path: Vec::new(),
                    message,
                },
                &mut deltas,
            );
        }

        // Deepest first, so subscribers watch the errored statuses climb
        // the tree exactly as the aggregation rule implies.
        let mut running: Vec<usize> = (1..self.nodes.len())
            .filter(|&i| self.nodes[i].status == TestStatus::Running)
            .collect();
        running.sort_by_key(|&i| std::cmp::Reverse(self.depth_of(i)));
        for handle in running {
            self.nodes[handle].status = TestStatus::Errored;
            self.emit_node(handle, &mut deltas);
        }

        self.phase = RunPhase::Crashed;
        self.emit_phase(at, &mut deltas);
        deltas
    }

    /// Resolves the node addressed by `path`, creating pending ancestors for
    /// runners that report results without an explicit `suite-start` first.
    /// Each created node gets its own pending delta so subscribers always see
    /// a node before its status changes. An empty path addresses the
    /// synthetic root.
    fn resolve(&mut self, path: &[String], deltas: &mut Vec<Delta>) -> usize {
        let mut current = ROOT;
        for name in path {
            let found = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].name == *name);
            current = match found {
                Some(child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TestNode::new(name.clone(), current));
                    self.nodes[current].children.push(child);
                    self.emit_node(child, deltas);
                    child
                }
            };
        }
        current
    }

    /// Recomputes aggregate suite status from `handle`'s parent up to the
    /// root, stopping as soon as a recomputation leaves a status unchanged.
    fn bubble(&mut self, handle: usize, deltas: &mut Vec<Delta>) {
        let mut current = self.nodes[handle].parent;
        while current != ROOT {
            let derived = self.derived_status(current);
            if derived == self.nodes[current].status {
                break;
            }
            self.nodes[current].status = derived;
            self.emit_node(current, deltas);
            current = self.nodes[current].parent;
        }
    }

    /// The aggregation rule: failed if any child failed, errored if any
    /// child errored, running if any child is running, else the common
    /// status of completed children (passed when mixed with skips), else
    /// pending. Childless nodes keep their own status.
    fn derived_status(&self, handle: usize) -> TestStatus {
        let node = &self.nodes[handle];
        if node.children.is_empty() {
            return node.status;
        }
        let statuses = node.children.iter().map(|&c| self.nodes[c].status);
        let mut completed: Option<TestStatus> = None;
        let mut mixed = false;
        let mut any_running = false;
        let mut any_errored = false;
        for status in statuses {
            match status {
                TestStatus::Failed => return TestStatus::Failed,
                TestStatus::Errored => any_errored = true,
                TestStatus::Running => any_running = true,
                TestStatus::Pending => {}
                terminal => match completed {
                    None => completed = Some(terminal),
                    Some(seen) if seen != terminal => mixed = true,
                    Some(_) => {}
                },
            }
        }
        if any_errored {
            TestStatus::Errored
        } else if any_running {
            TestStatus::Running
        } else if mixed {
            TestStatus::Passed
        } else {
            completed.unwrap_or(TestStatus::Pending)
        }
    }

    fn path_of(&self, mut handle: usize) -> Vec<String> {
        let mut path = Vec::new();
        while handle != ROOT {
            path.push(self.nodes[handle].name.clone());
            handle = self.nodes[handle].parent;
        }
        path.reverse();
        path
    }

    fn depth_of(&self, mut handle: usize) -> usize {
        let mut depth = 0;
        while handle != ROOT {
            depth += 1;
            handle = self.nodes[handle].parent;
        }
        depth
    }

    fn emit(&mut self, change: Change, deltas: &mut Vec<Delta>) {
        self.seq += 1;
        deltas.push(Delta {
            run: self.run,
            seq: self.seq,
            change,
        });
    }

    fn emit_phase(&mut self, at: DateTime<Utc>, deltas: &mut Vec<Delta>) {
        let phase = self.phase;
        self.emit(Change::Phase { phase, at }, deltas);
    }

    fn emit_node(&mut self, handle: usize, deltas: &mut Vec<Delta>) {
        let path = self.path_of(handle);
        let node = &self.nodes[handle];
        let change = Change::Node {
            path,
            status: node.status,
            duration_ms: node.duration_ms,
            message: node.message.clone(),
        };
        self.emit(change, deltas);
    }
}
