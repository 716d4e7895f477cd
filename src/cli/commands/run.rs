//! # Run Command Module / 运行命令模块
//!
//! This module implements the one-shot `run` command: it starts every
//! configured tool against the target directory, waits for all runs to
//! finish (or for Ctrl-C), then prints the console summary and exits
//! nonzero if anything failed or crashed.
//!
//! 此模块实现一次性 `run` 命令：针对目标目录启动每个配置的工具，
//! 等待所有运行结束（或 Ctrl-C），然后打印控制台摘要，
//! 如有失败或崩溃则以非零码退出。

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    core::{config, hub::BroadcastHub, supervisor::Supervisor},
    infra::{adapter::RunnerKind, t},
    reporting::console::{print_failure_details, print_summary},
};

use super::setup_signal_handler;

/// Executes the run command.
///
/// # Arguments
/// * `directory` - Target directory containing the run configuration
/// * `runner` - Launch mechanism for the configured tools
/// * `locale` - The language locale to use for messages
///
/// # Returns
/// An error if any run failed, crashed or could not be launched, so the
/// process exits nonzero for CI consumers.
pub async fn execute(directory: PathBuf, runner: RunnerKind, locale: &str) -> Result<()> {
    let dir = fs::canonicalize(&directory)
        .with_context(|| t!("dir_not_found", locale = locale, path = directory.display()))?;
    let specs = config::load_run_config(&dir)?;

    println!(
        "{}",
        t!(
            "run.starting",
            locale = locale,
            count = specs.len(),
            path = dir.display()
        )
        .bold()
    );

    let stop = setup_signal_handler(locale)?;
    let hub = Arc::new(BroadcastHub::new());
    let supervisor = Supervisor::with_runner(hub, runner);

    let mut started = Vec::new();
    let mut launch_failures = 0usize;
    for spec in &specs {
        match supervisor.start_run(spec, &dir).await {
            Ok(run) => {
                println!(
                    "{}",
                    t!(
                        "run.tool_started",
                        locale = locale,
                        name = spec.name.as_str().yellow(),
                        run = run
                    )
                );
                started.push(run);
            }
            Err(e) => {
                launch_failures += 1;
                eprintln!(
                    "{}",
                    t!(
                        "run.tool_failed",
                        locale = locale,
                        name = spec.name,
                        error = e
                    )
                    .red()
                );
            }
        }
    }

    let all_done = futures::future::join_all(started.iter().map(|run| supervisor.wait(*run)));
    tokio::select! {
        _ = all_done => {}
        _ = stop.cancelled() => {
            supervisor.cancel_all().await;
            futures::future::join_all(started.iter().map(|run| supervisor.wait(*run))).await;
        }
    }

    let snapshots = supervisor.runs().await;
    print_summary(&snapshots, locale);
    let failed = snapshots.iter().any(|s| s.has_failures());
    if failed {
        print_failure_details(&snapshots, locale);
    }

    if failed || launch_failures > 0 {
        anyhow::bail!(t!("run.finished_with_failures", locale = locale));
    }
    println!("\n{}", t!("run.all_passed", locale = locale).green().bold());
    Ok(())
}
