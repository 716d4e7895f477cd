//! # Command-Line Interface Module / 命令行接口模块
//!
//! This module builds the `litf-relay` command line: a `serve` command that
//! orchestrates the configured runners and exposes the subscription
//! protocol, and a one-shot `run` command that waits for all runs and
//! prints a console summary.
//!
//! 此模块构建 `litf-relay` 命令行：`serve` 命令编排配置的运行器并
//! 暴露订阅协议；一次性 `run` 命令等待所有运行结束并打印控制台摘要。

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::{env, net::IpAddr, path::PathBuf};

use crate::infra::adapter::RunnerKind;
use crate::infra::t;

pub mod commands;

/// Pre-parses the command line arguments to find the language setting.
/// This allows i18n to be initialized before the full CLI is built.
/// It looks for a `--lang <VALUE>` argument.
fn pre_parse_language() -> String {
    let args: Vec<String> = env::args().collect();
    if let Some(pos) = args.iter().position(|arg| arg == "--lang") {
        if let Some(lang) = args.get(pos + 1) {
            return lang.clone();
        }
    }
    // Fallback to system language detection
    sys_locale::get_locale().unwrap_or_else(|| "en".to_string())
}

fn build_cli(locale: &str) -> Command {
    Command::new("litf-relay")
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(t!("cli_about", locale = locale).to_string())
        .arg(
            Arg::new("lang")
                .long("lang")
                .help(t!("cli_lang", locale = locale).to_string())
                .value_name("LANGUAGE")
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help(t!("cli_verbose", locale = locale).to_string())
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help(t!("cli_debug", locale = locale).to_string())
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("runner")
                .short('r')
                .long("runner")
                .help(t!("cli_runner", locale = locale).to_string())
                .value_name("RUNNER")
                .default_value("subprocess")
                .value_parser(["subprocess", "docker"])
                .global(true)
                .action(ArgAction::Set),
        )
        .subcommand(
            Command::new("serve")
                .about(t!("cmd_serve_about", locale = locale).to_string())
                .arg(
                    Arg::new("directory")
                        .help(t!("arg_directory", locale = locale).to_string())
                        .value_name("DIRECTORY")
                        .default_value(".")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .help(t!("arg_bind", locale = locale).to_string())
                        .value_name("ADDRESS")
                        .default_value("127.0.0.1")
                        .value_parser(clap::value_parser!(IpAddr))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .help(t!("arg_port", locale = locale).to_string())
                        .value_name("PORT")
                        .default_value("8889")
                        .value_parser(clap::value_parser!(u16))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("run")
                .about(t!("cmd_run_about", locale = locale).to_string())
                .arg(
                    Arg::new("directory")
                        .help(t!("arg_directory", locale = locale).to_string())
                        .value_name("DIRECTORY")
                        .default_value(".")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
}

pub async fn run() -> Result<()> {
    // Pre-parse language and initialize i18n first.
    let language = pre_parse_language();
    rust_i18n::set_locale(&language);

    let matches = build_cli(&language).get_matches();
    init_tracing(matches.get_flag("verbose"), matches.get_flag("debug"));
    let runner = matches
        .get_one::<String>("runner")
        .and_then(|s| RunnerKind::parse(s))
        .unwrap_or_default();

    match matches.subcommand() {
        Some(("serve", serve_matches)) => {
            let directory = serve_matches
                .get_one::<PathBuf>("directory")
                .unwrap() // Has default
                .clone();
            let bind = *serve_matches.get_one::<IpAddr>("bind").unwrap();
            let port = *serve_matches.get_one::<u16>("port").unwrap();
            commands::serve::execute(directory, bind, port, runner, &language).await?;
        }
        Some(("run", run_matches)) => {
            let directory = run_matches
                .get_one::<PathBuf>("directory")
                .unwrap() // Has default
                .clone();
            commands::run::execute(directory, runner, &language).await?;
        }
        _ => {
            // This case handles when no subcommand is given.
            // Clap will have already printed help info.
        }
    }
    Ok(())
}

/// Installs the diagnostic subscriber. `RUST_LOG` always wins; otherwise
/// `--debug` and `--verbose` pick the default level.
fn init_tracing(verbose: bool, debug: bool) {
    let default_level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
