//! # 渠道定义
//!
//! 渠道类型标识以及多密钥渠道状态

pub mod multi_key;

pub use multi_key::{FirstEnabledSelector, KeySelector, KeyStatus, MultiKeyChannelState, MultiKeyMode};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 渠道类型（与持久化中的整数编号一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelType {
    OpenAI,
    Claude,
    ClaudeCode,
    Other(i32),
}

impl ChannelType {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::OpenAI => 1,
            Self::Claude => 14,
            Self::ClaudeCode => 58,
            Self::Other(code) => code,
        }
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::OpenAI,
            14 => Self::Claude,
            58 => Self::ClaudeCode,
            other => Self::Other(other),
        }
    }

    /// 日志展示用名称
    #[must_use]
    pub fn display_name(self) -> String {
        match self {
            Self::OpenAI => "OpenAI".to_string(),
            Self::Claude => "Claude".to_string(),
            Self::ClaudeCode => "Claude Code".to_string(),
            Self::Other(code) => format!("Type-{code}"),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => f.write_str("openai"),
            Self::Claude => f.write_str("claude"),
            Self::ClaudeCode => f.write_str("claude_code"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "openai" => Ok(Self::OpenAI),
            "claude" | "anthropic" => Ok(Self::Claude),
            "claude_code" | "claude-code" => Ok(Self::ClaudeCode),
            other => other
                .parse::<i32>()
                .map(Self::from_code)
                .map_err(|_| format!("Unknown channel type: {s}")),
        }
    }
}

impl TryFrom<String> for ChannelType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelType> for String {
    fn from(value: ChannelType) -> Self {
        value.to_string()
    }
}
