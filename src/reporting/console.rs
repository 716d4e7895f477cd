//! # Console Reporting Module / 控制台报告模块
//!
//! This module prints colorful, formatted summaries of finished runs with
//! internationalization support: one block per run with its phase, followed
//! by the indented node tree, and a detail dump for everything that failed.
//!
//! 此模块打印带颜色的格式化运行摘要，支持国际化：
//! 每次运行一个块，显示其阶段及缩进的节点树，
//! 并对所有失败项输出详细信息。

use colored::*;

use crate::core::models::{NodeSnapshot, RunPhase, RunSnapshot, TestStatus};
use crate::infra::t;

/// Prints a formatted summary of all runs to the console.
/// Displays each run's phase and wall-clock time, then one row per node
/// with status, name and duration, using color coding per status.
///
/// 在控制台打印所有运行的格式化摘要。
/// 显示每次运行的阶段和耗时，然后每个节点一行，
/// 包含状态、名称和持续时间，并按状态进行颜色编码。
///
/// # Output Format / 输出格式
/// ```text
/// --- Run Summary ---
///
/// pytest [run-1] completed (1.24s)
///   - passed   | tests                                    |        N/A
///   - passed   |   test_login                             |      0.31s
///   - failed   |   test_logout                            |      0.02s
/// ```
pub fn print_summary(snapshots: &[RunSnapshot], locale: &str) {
    println!("\n{}", t!("report.summary_banner", locale = locale).bold());

    for snapshot in snapshots {
        let phase_str = phase_label(snapshot.phase, locale);
        let phase_colored = match snapshot.phase {
            RunPhase::Completed if snapshot.has_failures() => phase_str.red(),
            RunPhase::Completed => phase_str.green(),
            RunPhase::Crashed => phase_str.red().bold(),
            RunPhase::Running => phase_str.cyan(),
            RunPhase::Queued => phase_str.yellow(),
        };
        let elapsed = match (snapshot.started_at, snapshot.finished_at) {
            (Some(start), Some(end)) => {
                format!("{:.2}s", (end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => "N/A".to_string(),
        };
        println!(
            "\n{} [{}] {} ({})",
            snapshot.name.bold(),
            snapshot.run,
            phase_colored,
            elapsed.dimmed()
        );

        snapshot.visit(|node, depth| {
            let status_colored = colored_status(node.status, locale);
            let name = format!("{}{}", "  ".repeat(depth), node.name);
            let duration_str = node
                .duration_ms
                .map(|ms| format!("{:.2}s", ms / 1000.0))
                .unwrap_or_else(|| "N/A".to_string());
            println!("  - {:<10} | {:<40} | {:>10}", status_colored, name, duration_str);
        });
    }
}

/// Prints detailed information about every failed or errored test, plus the
/// run-level diagnostics of crashed runs, helping developers debug issues.
///
/// 打印每个失败或出错测试的详细信息，以及崩溃运行的运行级诊断，
/// 帮助开发者调试问题。
pub fn print_failure_details(snapshots: &[RunSnapshot], locale: &str) {
    let mut failures: Vec<(&RunSnapshot, Vec<String>, &NodeSnapshot)> = Vec::new();
    for snapshot in snapshots {
        collect_failures(&snapshot.tree, &mut Vec::new(), snapshot, &mut failures);
    }
    let crashed: Vec<&RunSnapshot> = snapshots
        .iter()
        .filter(|s| s.phase == RunPhase::Crashed)
        .collect();
    if failures.is_empty() && crashed.is_empty() {
        return;
    }

    println!("\n{}", t!("report.failure_banner", locale = locale).red().bold());
    println!("{}", "-".repeat(80));

    for (i, (snapshot, path, node)) in failures.iter().enumerate() {
        println!(
            "[{}/{}] {} '{}' ({})",
            i + 1,
            failures.len(),
            t!("report.failure_header", locale = locale).red(),
            path.join(" › ").cyan(),
            snapshot.name
        );
        if let Some(message) = &node.message {
            println!("\n{message}");
        }
        if !node.logs.is_empty() {
            println!("\n--- {} ---", t!("report.test_log", locale = locale).yellow());
            for line in &node.logs {
                println!("{line}");
            }
        }
        println!("{}", "-".repeat(80));
    }

    for snapshot in crashed {
        println!(
            "{} '{}' [{}]",
            t!("report.crashed_header", locale = locale).red(),
            snapshot.name.cyan(),
            snapshot.run
        );
        for line in &snapshot.logs {
            println!("  {line}");
        }
        println!("{}", "-".repeat(80));
    }
}

fn collect_failures<'a>(
    nodes: &'a [NodeSnapshot],
    path: &mut Vec<String>,
    snapshot: &'a RunSnapshot,
    out: &mut Vec<(&'a RunSnapshot, Vec<String>, &'a NodeSnapshot)>,
) {
    for node in nodes {
        path.push(node.name.clone());
        // Only leaves carry reported results; suite statuses are derived.
        if node.children.is_empty() && node.status.is_bad() {
            out.push((snapshot, path.clone(), node));
        }
        collect_failures(&node.children, path, snapshot, out);
        path.pop();
    }
}

/// Localized label for a node status. / 节点状态的本地化标签。
pub fn status_label(status: TestStatus, locale: &str) -> String {
    match status {
        TestStatus::Pending => t!("report.status_pending", locale = locale).to_string(),
        TestStatus::Running => t!("report.status_running", locale = locale).to_string(),
        TestStatus::Passed => t!("report.status_passed", locale = locale).to_string(),
        TestStatus::Failed => t!("report.status_failed", locale = locale).to_string(),
        TestStatus::Skipped => t!("report.status_skipped", locale = locale).to_string(),
        TestStatus::Errored => t!("report.status_errored", locale = locale).to_string(),
    }
}

/// Localized label for a run phase. / 运行阶段的本地化标签。
pub fn phase_label(phase: RunPhase, locale: &str) -> String {
    match phase {
        RunPhase::Queued => t!("report.phase_queued", locale = locale).to_string(),
        RunPhase::Running => t!("report.phase_running", locale = locale).to_string(),
        RunPhase::Completed => t!("report.phase_completed", locale = locale).to_string(),
        RunPhase::Crashed => t!("report.phase_crashed", locale = locale).to_string(),
    }
}

fn colored_status(status: TestStatus, locale: &str) -> ColoredString {
    let label = status_label(status, locale);
    match status {
        TestStatus::Passed => label.green(),
        TestStatus::Failed | TestStatus::Errored => label.red(),
        TestStatus::Skipped => label.yellow(),
        TestStatus::Running => label.cyan(),
        TestStatus::Pending => label.dimmed(),
    }
}
