//! # Reporting Module / 报告模块
//!
//! This module handles presentation of final run state on the console for
//! the one-shot invocation mode.
//!
//! 此模块负责在一次性调用模式下于控制台呈现最终运行状态。

pub mod console;
