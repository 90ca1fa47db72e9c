//! # 上游适配器实现
//!
//! 按渠道类型创建适配器，每次请求一个新实例。

pub mod claude;
pub mod claude_code;
pub mod openai;

use crate::channel::ChannelType;
use crate::error::{RelayError, Result};
use crate::relay::adaptor::Adaptor;
use axum::http::HeaderValue;

pub use claude::{ClaudeAdaptor, ClaudeRequestMode};
pub use claude_code::ClaudeCodeAdaptor;
pub use openai::OpenAIAdaptor;

/// 按渠道类型创建适配器
#[must_use]
pub fn get_adaptor(channel_type: ChannelType) -> Option<Box<dyn Adaptor>> {
    match channel_type {
        ChannelType::OpenAI => Some(Box::new(OpenAIAdaptor::default())),
        ChannelType::Claude => Some(Box::new(ClaudeAdaptor::default())),
        ChannelType::ClaudeCode => Some(Box::new(ClaudeCodeAdaptor::default())),
        ChannelType::Other(_) => None,
    }
}

/// 构造请求头值，非法字符视为请求构建失败
pub(crate) fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| RelayError::request_build_with_source(format!("invalid value for header {name}"), e))
}
