//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for LITF Relay,
//! including runner subprocess management and i18n support.
//!
//! 此模块为 LITF Relay 提供基础设施服务，
//! 包括运行器子进程管理和国际化支持。

pub mod adapter;

// Re-export i18n functions for easier access
pub use rust_i18n::t;
