//! # Orchestration Integration Tests / 编排集成测试
//!
//! End-to-end tests that drive the supervisor with real subprocesses: well
//! behaved runners, crashing runners, corrupted feeds, cancellation and the
//! TCP subscription protocol.
//!
//! 端到端测试：用真实子进程驱动监督器，涵盖行为良好的运行器、
//! 崩溃的运行器、损坏的数据流、取消以及 TCP 订阅协议。

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use litf_relay::core::config::ToolSpec;
use litf_relay::hub::BroadcastHub;
use litf_relay::infra::adapter::AdapterError;
use litf_relay::models::{RunId, RunPhase, RunSnapshot, TestStatus};
use litf_relay::server;
use litf_relay::supervisor::Supervisor;

use common::{litf, setup_test_environment, write_feed};

const WAIT: Duration = Duration::from_secs(20);

fn spec(tool: String, name: &str) -> ToolSpec {
    ToolSpec {
        tool,
        name: name.to_string(),
    }
}

fn new_supervisor() -> Supervisor {
    Supervisor::new(Arc::new(BroadcastHub::new()))
}

async fn run_to_end(supervisor: &Supervisor, tool: String, dir: &Path) -> RunSnapshot {
    let run = supervisor
        .start_run(&spec(tool, "tool-under-test"), dir)
        .await
        .expect("runner should launch");
    tokio::time::timeout(WAIT, supervisor.wait(run))
        .await
        .expect("run should finish in time");
    supervisor.snapshot(run).await.expect("snapshot exists")
}

fn status_of(snapshot: &RunSnapshot, names: &[&str]) -> TestStatus {
    let path: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    snapshot
        .node(&path)
        .unwrap_or_else(|| panic!("node {names:?} missing"))
        .status
}

#[tokio::test]
async fn test_scenario_single_tool_completes() {
    let temp = setup_test_environment();
    let feed = [
        litf("suite-start", &["root"], json!({})),
        litf("test-start", &["root", "t1"], json!({})),
        litf(
            "test-result",
            &["root", "t1"],
            json!({"status": "passed", "duration_ms": 12.0}),
        ),
        litf("suite-end", &["root"], json!({})),
    ];
    let tool = write_feed(temp.path(), "events.litf", &feed);

    let supervisor = new_supervisor();
    let snapshot = run_to_end(&supervisor, tool, temp.path()).await;

    assert_eq!(snapshot.phase, RunPhase::Completed);
    assert_eq!(status_of(&snapshot, &["root"]), TestStatus::Passed);
    assert_eq!(status_of(&snapshot, &["root", "t1"]), TestStatus::Passed);
    assert_eq!(snapshot.tree.len(), 1);
    assert_eq!(snapshot.tree[0].children.len(), 1);
}

#[tokio::test]
async fn test_scenario_adapter_exit_mid_run_crashes() {
    let temp = setup_test_environment();
    let feed = [
        litf("suite-start", &["root"], json!({})),
        litf("test-start", &["root", "t1"], json!({})),
    ];
    let tool = write_feed(temp.path(), "events.litf", &feed);

    let supervisor = new_supervisor();
    let snapshot = run_to_end(&supervisor, tool, temp.path()).await;

    assert_eq!(snapshot.phase, RunPhase::Crashed);
    assert_eq!(status_of(&snapshot, &["root", "t1"]), TestStatus::Errored);
    assert_eq!(status_of(&snapshot, &["root"]), TestStatus::Errored);
}

#[tokio::test]
async fn test_scenario_malformed_line_mid_run_recovers() {
    let temp = setup_test_environment();
    let feed = [
        litf("suite-start", &["root"], json!({})),
        "not-a-valid-record".to_string(),
        litf(
            "test-result",
            &["root", "t1"],
            json!({"status": "passed"}),
        ),
        litf("suite-end", &["root"], json!({})),
    ];
    let tool = write_feed(temp.path(), "events.litf", &feed);

    let supervisor = new_supervisor();
    let snapshot = run_to_end(&supervisor, tool, temp.path()).await;

    // The corrupted line shows up as a diagnostic on the open suite, the
    // run still completes normally.
    assert_eq!(snapshot.phase, RunPhase::Completed);
    let root = snapshot.node(&["root".to_string()]).unwrap();
    assert_eq!(root.status, TestStatus::Passed);
    assert!(
        root.logs.iter().any(|l| l.contains("not-a-valid-record")),
        "decode failure must stay visible: {:?}",
        root.logs
    );
}

#[tokio::test]
async fn test_tool_not_found_leaves_run_queued() {
    let temp = setup_test_environment();
    let supervisor = new_supervisor();

    let err = supervisor
        .start_run(
            &spec("definitely-not-a-real-tool-1a2b3c".to_string(), "ghost"),
            temp.path(),
        )
        .await
        .expect_err("missing binary cannot launch");
    assert!(matches!(err, AdapterError::ToolNotFound { .. }));

    // The run is registered but never left its queued phase, and waiting on
    // it does not hang.
    let runs = supervisor.runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].phase, RunPhase::Queued);
    tokio::time::timeout(WAIT, supervisor.wait(runs[0].run))
        .await
        .expect("wait returns for a run that never launched");
}

#[tokio::test]
async fn test_exit_without_any_event_crashes() {
    let temp = setup_test_environment();
    let supervisor = new_supervisor();
    let snapshot = run_to_end(&supervisor, "true".to_string(), temp.path()).await;

    assert_eq!(snapshot.phase, RunPhase::Crashed);
    assert!(snapshot.tree.is_empty());
    assert!(
        snapshot.logs.iter().any(|l| l.contains("exited")),
        "crash reason is recorded: {:?}",
        snapshot.logs
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_nonzero_exit_after_end_of_run_stays_completed() {
    let temp = setup_test_environment();
    let feed = [
        litf("suite-start", &["root"], json!({})),
        litf("suite-end", &["root"], json!({})),
    ];
    write_feed(temp.path(), "events.litf", &feed);
    let tool = common::write_script(
        temp.path(),
        "runner.sh",
        "cat events.litf\nexit 3\n",
    );

    let supervisor = new_supervisor();
    let snapshot = run_to_end(&supervisor, tool, temp.path()).await;
    assert_eq!(snapshot.phase, RunPhase::Completed);
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_run_terminates_and_crashes() {
    let temp = setup_test_environment();
    let feed = [
        litf("suite-start", &["root"], json!({})),
        litf("test-start", &["root", "t1"], json!({})),
    ];
    write_feed(temp.path(), "events.litf", &feed);
    let tool = common::write_script(
        temp.path(),
        "runner.sh",
        "cat events.litf\nexec sleep 600\n",
    );

    let supervisor = new_supervisor();
    let run = supervisor
        .start_run(&spec(tool, "sleepy"), temp.path())
        .await
        .unwrap();

    // Let the two events land before pulling the plug.
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(snapshot) = supervisor.snapshot(run).await {
                if snapshot.node(&["root".to_string(), "t1".to_string()]).is_some() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("events should arrive");

    supervisor.cancel_run(run).await.unwrap();
    tokio::time::timeout(WAIT, supervisor.wait(run))
        .await
        .expect("cancelled run should finish promptly");

    let snapshot = supervisor.snapshot(run).await.unwrap();
    assert_eq!(snapshot.phase, RunPhase::Crashed);
    assert_eq!(status_of(&snapshot, &["root", "t1"]), TestStatus::Errored);
}

#[tokio::test]
async fn test_failures_in_one_run_do_not_touch_another() {
    let temp = setup_test_environment();
    let good = [
        litf("suite-start", &["root"], json!({})),
        litf("test-result", &["root", "ok"], json!({"status": "passed"})),
        litf("suite-end", &["root"], json!({})),
    ];
    let bad = [
        litf("suite-start", &["root"], json!({})),
        "garbage garbage".to_string(),
        litf("test-start", &["root", "hang"], json!({})),
    ];
    let good_tool = write_feed(temp.path(), "good.litf", &good);
    let bad_tool = write_feed(temp.path(), "bad.litf", &bad);

    let supervisor = new_supervisor();
    let good_run = supervisor
        .start_run(&spec(good_tool, "good"), temp.path())
        .await
        .unwrap();
    let bad_run = supervisor
        .start_run(&spec(bad_tool, "bad"), temp.path())
        .await
        .unwrap();
    tokio::time::timeout(WAIT, async {
        supervisor.wait(good_run).await;
        supervisor.wait(bad_run).await;
    })
    .await
    .unwrap();

    let good_snapshot = supervisor.snapshot(good_run).await.unwrap();
    assert_eq!(good_snapshot.phase, RunPhase::Completed);
    assert!(!good_snapshot.has_failures());
    assert!(good_snapshot.logs.is_empty());

    let bad_snapshot = supervisor.snapshot(bad_run).await.unwrap();
    assert_eq!(bad_snapshot.phase, RunPhase::Crashed);
}

#[tokio::test]
async fn test_subscribe_all_over_tcp_interleaves_with_ordered_seqs() {
    let temp = setup_test_environment();
    let feed_a = [
        litf("suite-start", &["alpha"], json!({})),
        litf("test-start", &["alpha", "t1"], json!({})),
        litf("test-result", &["alpha", "t1"], json!({"status": "passed"})),
        litf("suite-end", &["alpha"], json!({})),
    ];
    let feed_b = [
        litf("suite-start", &["beta"], json!({})),
        litf("test-result", &["beta", "t1"], json!({"status": "failed"})),
        litf("suite-end", &["beta"], json!({})),
    ];
    let tool_a = write_feed(temp.path(), "a.litf", &feed_a);
    let tool_b = write_feed(temp.path(), "b.litf", &feed_b);

    let hub = Arc::new(BroadcastHub::new());
    let supervisor = Supervisor::new(Arc::clone(&hub));
    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(server::serve(listener, Arc::clone(&hub), shutdown.clone()));

    // Subscribe to "all runs" before anything starts, then launch both
    // tools: the subscriber must be told about each run as it appears.
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"{\"subscribe\":\"all\"}\n").await.unwrap();
    let (reader, _writer) = client.into_split();
    let mut lines = BufReader::new(reader).lines();

    let run_a = supervisor
        .start_run(&spec(tool_a, "alpha-runner"), temp.path())
        .await
        .unwrap();
    let run_b = supervisor
        .start_run(&spec(tool_b, "beta-runner"), temp.path())
        .await
        .unwrap();

    let mut snapshot_seq: std::collections::HashMap<RunId, u64> = Default::default();
    let mut delta_seqs: std::collections::HashMap<RunId, Vec<u64>> = Default::default();
    let mut terminal: std::collections::HashSet<RunId> = Default::default();

    // A fast run may already be terminal in its snapshot; count that too.
    tokio::time::timeout(WAIT, async {
        while terminal.len() < 2 {
            let line = lines
                .next_line()
                .await
                .expect("read line")
                .expect("connection stays open");
            let value: serde_json::Value = serde_json::from_str(&line).expect("valid JSON");
            let run = RunId(value["run"].as_u64().unwrap_or(0));
            match value["type"].as_str() {
                Some("snapshot") => {
                    snapshot_seq.insert(run, value["seq"].as_u64().unwrap());
                    if value["phase"] == "completed" || value["phase"] == "crashed" {
                        terminal.insert(run);
                    }
                }
                Some("delta") => {
                    delta_seqs.entry(run).or_default().push(value["seq"].as_u64().unwrap());
                    if value["change"] == "phase"
                        && (value["phase"] == "completed" || value["phase"] == "crashed")
                    {
                        terminal.insert(run);
                    }
                }
                _ => {}
            }
        }
    })
    .await
    .expect("both runs should finish while subscribed");

    // Deltas of both runs interleave on one connection, but each run's own
    // sequence is gapless and strictly increasing from its snapshot.
    let empty = Vec::new();
    for run in [run_a, run_b] {
        let start = snapshot_seq.get(&run).copied().expect("snapshot received");
        let seqs = delta_seqs.get(&run).unwrap_or(&empty);
        let expected: Vec<u64> = (start + 1..=start + seqs.len() as u64).collect();
        assert_eq!(seqs, &expected, "sequence of {run} has a gap or duplicate");
    }

    shutdown.cancel();
    let _ = server_task.await;
}

#[tokio::test]
async fn test_tcp_subscribe_unknown_run_reports_error() {
    let hub = Arc::new(BroadcastHub::new());
    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(server::serve(listener, Arc::clone(&hub), shutdown.clone()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"{\"subscribe\":{\"run\":424242}}\n")
        .await
        .unwrap();
    let (reader, _writer) = client.into_split();
    let mut lines = BufReader::new(reader).lines();

    let line = tokio::time::timeout(WAIT, lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "error");

    shutdown.cancel();
    let _ = server_task.await;
}

#[tokio::test]
async fn test_late_tcp_subscriber_catches_up_from_snapshot() {
    let temp = setup_test_environment();
    let feed = [
        litf("suite-start", &["root"], json!({})),
        litf("test-result", &["root", "t1"], json!({"status": "passed"})),
        litf("suite-end", &["root"], json!({})),
    ];
    let tool = write_feed(temp.path(), "events.litf", &feed);

    let hub = Arc::new(BroadcastHub::new());
    let supervisor = Supervisor::new(Arc::clone(&hub));
    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(server::serve(listener, Arc::clone(&hub), shutdown.clone()));

    let run = supervisor
        .start_run(&spec(tool, "quick"), temp.path())
        .await
        .unwrap();
    tokio::time::timeout(WAIT, supervisor.wait(run)).await.unwrap();

    // Joining after the run finished: the snapshot alone carries the full
    // final state.
    let mut client = TcpStream::connect(addr).await.unwrap();
    let request = format!("{{\"subscribe\":{{\"run\":{}}}}}\n", run.0);
    client.write_all(request.as_bytes()).await.unwrap();
    let (reader, _writer) = client.into_split();
    let mut lines = BufReader::new(reader).lines();

    let line = tokio::time::timeout(WAIT, lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "snapshot");
    assert_eq!(value["phase"], "completed");
    assert_eq!(value["tree"][0]["name"], "root");
    assert_eq!(value["tree"][0]["status"], "passed");

    shutdown.cancel();
    let _ = server_task.await;
}
