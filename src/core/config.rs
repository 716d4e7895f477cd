//! # Run Configuration Module / 运行配置模块
//!
//! This module loads the directory-level run configuration file that lists
//! which runner tools to orchestrate for a target directory.
//!
//! 此模块加载目录级运行配置文件，该文件列出了要为目标目录编排的运行器工具。

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::infra::t;

/// Name of the configuration file looked up inside the target directory.
/// 在目标目录中查找的配置文件名。
pub const CONFIG_FILE: &str = ".litf.json";

/// One runner tool to orchestrate, as configured by the user.
/// 用户配置的一个要编排的运行器工具。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The command line that launches the runner; shell-expanded before the
    /// split into program and arguments.
    /// 启动运行器的命令行；在拆分为程序和参数之前先进行 shell 展开。
    pub tool: String,
    /// Display name for the run, unique within one configuration.
    /// 运行的显示名称，在同一配置中唯一。
    pub name: String,
}

/// Reads and validates the `.litf.json` configuration of `dir`: a JSON array
/// of `{"tool": …, "name": …}` objects, one per runner to orchestrate.
///
/// 读取并校验 `dir` 下的 `.litf.json` 配置：一个 JSON 数组，
/// 每个要编排的运行器对应一个 `{"tool": …, "name": …}` 对象。
pub fn load_run_config(dir: &Path) -> Result<Vec<ToolSpec>> {
    let path = dir.join(CONFIG_FILE);
    let content = fs::read_to_string(&path)
        .with_context(|| t!("config.read_failed", path = path.display()))?;
    let specs: Vec<ToolSpec> = serde_json::from_str(&content)
        .with_context(|| t!("config.parse_failed", path = path.display()))?;

    if specs.is_empty() {
        bail!(t!("config.empty", path = path.display()));
    }
    for (i, spec) in specs.iter().enumerate() {
        if spec.tool.trim().is_empty() {
            bail!(t!("config.blank_tool", index = i));
        }
        if spec.name.trim().is_empty() {
            bail!(t!("config.blank_name", index = i));
        }
        if specs[..i].iter().any(|other| other.name == spec.name) {
            bail!(t!("config.duplicate_name", name = spec.name));
        }
    }
    Ok(specs)
}
