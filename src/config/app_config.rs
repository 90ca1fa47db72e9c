//! # 应用配置结构定义

use crate::cache::Keyspace;
use crate::channel::{ChannelType, MultiKeyMode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

/// 心跳间隔未配置或非正数时使用的默认值（秒）
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 10;
/// 单次心跳发送的超时（秒）
pub const DEFAULT_PING_SEND_TIMEOUT_SECONDS: u64 = 10;
/// 心跳任务的最长存活时间（秒），防止泄漏
pub const DEFAULT_PING_MAX_DURATION_SECONDS: u64 = 120 * 60;

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 中继行为配置
    #[serde(default)]
    pub relay: RelayConfig,
    /// 缓存键配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 上游渠道
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// 中继行为配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 调试模式：记录出站请求/响应详情（敏感头脱敏）
    pub debug: bool,
    /// 是否为流式请求发送心跳
    pub ping_interval_enabled: bool,
    /// 心跳间隔（秒），非正数回退到默认值
    pub ping_interval_seconds: i64,
    /// 单次心跳发送超时（秒）
    pub ping_send_timeout_seconds: u64,
    /// 心跳任务最长存活时间（秒）
    pub ping_max_duration_seconds: u64,
    /// 上游请求总超时（秒），0 表示不限制
    pub request_timeout_seconds: u64,
    /// 客户端写出通道缓冲（帧数）
    pub stream_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            debug: false,
            ping_interval_enabled: true,
            ping_interval_seconds: DEFAULT_PING_INTERVAL_SECONDS as i64,
            ping_send_timeout_seconds: DEFAULT_PING_SEND_TIMEOUT_SECONDS,
            ping_max_duration_seconds: DEFAULT_PING_MAX_DURATION_SECONDS,
            request_timeout_seconds: 0,
            stream_buffer: 64,
        }
    }
}

impl RelayConfig {
    /// 生效的心跳间隔
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        u64::try_from(self.ping_interval_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map_or(
                Duration::from_secs(DEFAULT_PING_INTERVAL_SECONDS),
                Duration::from_secs,
            )
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_seconds > 0).then(|| Duration::from_secs(self.request_timeout_seconds))
    }
}

/// 缓存键配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 全局键前缀（多部署共享后端时隔离）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

impl CacheConfig {
    #[must_use]
    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(self.key_prefix.as_deref())
    }
}

/// 上游渠道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: i64,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    /// 凭证列表（多密钥渠道有多个）
    pub keys: Vec<String>,
    #[serde(default)]
    pub key_mode: MultiKeyMode,
    /// 出站代理，例如 `http://127.0.0.1:7890`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// 支持的模型；为空表示匹配全部
    #[serde(default)]
    pub models: Vec<String>,
    /// 请求模型到上游模型的映射
    #[serde(default)]
    pub model_mapping: std::collections::HashMap<String, String>,
    /// 出站请求头覆盖模板
    #[serde(default)]
    pub header_override: Map<String, Value>,
    /// 关闭流式心跳
    #[serde(default)]
    pub disable_ping: bool,
}

impl ChannelConfig {
    /// 渠道是否服务该模型
    #[must_use]
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }

    /// 上游模型名
    #[must_use]
    pub fn upstream_model(&self, model: &str) -> String {
        self.model_mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }
}

impl AppConfig {
    /// 应用环境变量覆盖
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prefix) = lookup(crate::cache::KEY_PREFIX_ENV)
            && !prefix.trim().is_empty()
        {
            self.cache.key_prefix = Some(prefix.trim().to_string());
        }
        if let Some(debug) = lookup("DEBUG") {
            self.relay.debug = matches!(debug.trim().to_ascii_lowercase().as_str(), "1" | "true");
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        if self.channels.is_empty() {
            return Err("at least one channel must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.id) {
                return Err(format!("duplicate channel id: {}", channel.id));
            }
            if channel.base_url.trim().is_empty() {
                return Err(format!("channel {} base_url cannot be empty", channel.id));
            }
            if channel.keys.iter().all(|k| k.trim().is_empty()) {
                return Err(format!("channel {} must have at least one key", channel.id));
            }
        }
        Ok(())
    }
}
