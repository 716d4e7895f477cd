//! # LITF Relay Library / LITF 中继库
//!
//! This library provides the core functionality of LITF Relay, an
//! orchestrator that drives arbitrary test-runner tools through a uniform
//! adapter contract, normalizes their output into the Language-Independent
//! Test Format (LITF) and broadcasts live and historical run state to
//! subscribers.
//!
//! 此库提供 LITF Relay 的核心功能。LITF Relay 是一个编排器，
//! 通过统一的适配器契约驱动任意测试运行器工具，
//! 将其输出规范化为语言无关测试格式（LITF），
//! 并向订阅者广播实时与历史运行状态。
//!
//! ## Modules / 模块
//!
//! - `core` - Data model, protocol codec, run state machine, supervisor and broadcast hub
//! - `infra` - Infrastructure services like runner subprocess management
//! - `server` - Subscription protocol over TCP for external subscribers
//! - `reporting` - Console summary of finished runs
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 数据模型、协议编解码器、运行状态机、监督器和广播中心
//! - `infra` - 基础设施服务，如运行器子进程管理
//! - `server` - 面向外部订阅者的 TCP 订阅协议
//! - `reporting` - 已结束运行的控制台摘要
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;
pub mod server;

// Re-export commonly used items
pub use self::core::hub;
pub use self::core::models;
pub use self::core::protocol;
pub use self::core::supervisor;

/// Initializes the application's internationalization (i18n) based on the system locale.
///
/// This function detects the user's system locale and sets the appropriate
/// language for the application's user interface. It attempts to match the full
/// locale (e.g., "zh-CN"), then just the language code (e.g., "en"), and
/// finally falls back to the default language ("en").
pub fn init() {
    // Detect system locale and set it for i18n.
    // Fallback to "en" if detection fails.
    let locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    let available_locales = rust_i18n::available_locales!();

    // Try to match the full locale first (e.g., "zh-CN")
    // Then try to match the language part only (e.g., "en" from "en-US")
    // Finally, fall back to "en"
    let lang = if available_locales.contains(&locale.as_str()) {
        &locale
    } else {
        locale
            .split('-')
            .next()
            .filter(|lang_code| available_locales.contains(lang_code))
            .unwrap_or("en")
    };

    rust_i18n::set_locale(lang);
}

// Initialize i18n
rust_i18n::i18n!("locales", fallback = "en");
