//! # CLI Commands Module / CLI 命令模块
//!
//! Shared plumbing for the `serve` and `run` commands.
//!
//! `serve` 和 `run` 命令的共享基础设施。

use anyhow::Result;
use colored::*;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::infra::t;

pub mod run;
pub mod serve;

/// Sets up a signal handler for graceful shutdown.
pub(crate) fn setup_signal_handler(locale: &str) -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();
    let locale = locale.to_string();

    tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl-C");
        println!("\n{}", t!("shutdown_signal", locale = &locale).yellow());
        token_clone.cancel();
    });

    Ok(token)
}
