//! # 通用工具

pub mod event_stream;
pub mod task;

pub use task::spawn_isolated;
