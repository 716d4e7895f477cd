//! # Core Module / 核心模块
//!
//! This module contains the core functionality of LITF Relay,
//! including the data model, the protocol codec, the per-run state machine,
//! the run supervisor and the broadcast hub.
//!
//! 此模块包含 LITF Relay 的核心功能，
//! 包括数据模型、协议编解码器、每次运行的状态机、运行监督器和广播中心。

pub mod config;
pub mod hub;
pub mod models;
pub mod protocol;
pub mod state;
pub mod supervisor;

// Re-exports
pub use hub::BroadcastHub;
pub use state::RunStateMachine;
pub use supervisor::Supervisor;
