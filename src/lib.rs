//! # Relay Gateway
//!
//! OpenAI 兼容的中继网关核心库：渠道适配器、请求分发、请求头覆盖与流式心跳

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod server;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{RelayError, Result};
