//! # Serve Command Module / 服务命令模块
//!
//! This module implements the `serve` command: it loads the run
//! configuration of the target directory, starts one run per configured
//! tool and exposes the subscription protocol over TCP until shutdown.
//!
//! 此模块实现 `serve` 命令：加载目标目录的运行配置，
//! 为每个配置的工具启动一次运行，并通过 TCP 暴露订阅协议直至关闭。

use anyhow::{Context, Result};
use colored::*;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::fs;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::{
    core::{config, hub::BroadcastHub, supervisor::Supervisor},
    infra::{adapter::RunnerKind, t},
    server,
};

use super::setup_signal_handler;

/// Executes the serve command.
///
/// # Arguments
/// * `directory` - Target directory containing the run configuration
/// * `bind` - Address the subscription server listens on
/// * `port` - Port the subscription server listens on
/// * `runner` - Launch mechanism for the configured tools
/// * `locale` - The language locale to use for messages
pub async fn execute(
    directory: PathBuf,
    bind: IpAddr,
    port: u16,
    runner: RunnerKind,
    locale: &str,
) -> Result<()> {
    let dir = fs::canonicalize(&directory)
        .with_context(|| t!("dir_not_found", locale = locale, path = directory.display()))?;
    let specs = config::load_run_config(&dir)?;

    println!(
        "{}",
        t!(
            "serve.config_loaded",
            locale = locale,
            count = specs.len(),
            path = dir.display()
        )
    );

    let shutdown = setup_signal_handler(locale)?;
    let hub = Arc::new(BroadcastHub::new());
    let supervisor = Arc::new(Supervisor::with_runner(Arc::clone(&hub), runner));

    // One failed launch never takes the session down: each tool fails (and
    // is reported) on its own.
    // 单个启动失败绝不会拖垮整个会话：每个工具各自失败并各自报告。
    for spec in &specs {
        match supervisor.start_run(spec, &dir).await {
            Ok(run) => {
                println!(
                    "{}",
                    t!(
                        "serve.run_started",
                        locale = locale,
                        name = spec.name.as_str().yellow(),
                        run = run
                    )
                );
            }
            Err(e) => {
                eprintln!(
                    "{}",
                    t!(
                        "serve.run_failed",
                        locale = locale,
                        name = spec.name,
                        error = e
                    )
                    .red()
                );
            }
        }
    }

    let addr = SocketAddr::new(bind, port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| t!("serve.bind_failed", locale = locale, addr = addr))?;
    println!(
        "{}",
        t!(
            "serve.listening",
            locale = locale,
            addr = listener.local_addr()?
        )
        .green()
    );

    server::serve(listener, Arc::clone(&hub), shutdown.clone()).await?;

    println!("{}", t!("serve.shutting_down", locale = locale).yellow());
    supervisor.cancel_all().await;
    let runs: Vec<_> = supervisor.runs().await.iter().map(|s| s.run).collect();
    futures::future::join_all(runs.iter().map(|run| supervisor.wait(*run))).await;
    Ok(())
}
