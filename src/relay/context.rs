//! # 请求上下文
//!
//! `RelayContext` 在请求开始时构建，之后只读；渠道凭证与 base URL 在整个请求生命周期内不变。
//! `ClientContext` 是分发器看到的入站请求。

use crate::channel::ChannelType;
use crate::config::ChannelConfig;
use crate::relay::writer::ResponseWriter;
use axum::http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 入站请求意图
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RelayMode {
    #[default]
    ChatCompletions,
    AudioTranscription,
    AudioTranslation,
    Realtime,
    Task,
}

impl RelayMode {
    /// 按入站路径分类
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/v1/audio/transcriptions") {
            Self::AudioTranscription
        } else if path.starts_with("/v1/audio/translations") {
            Self::AudioTranslation
        } else if path.starts_with("/v1/realtime") {
            Self::Realtime
        } else if path.starts_with("/v1/tasks") || path.contains("/submit/") {
            Self::Task
        } else {
            Self::ChatCompletions
        }
    }

    /// multipart 表单类请求
    #[must_use]
    pub const fn is_audio(self) -> bool {
        matches!(self, Self::AudioTranscription | Self::AudioTranslation)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatCompletions => "chat_completions",
            Self::AudioTranscription => "audio_transcription",
            Self::AudioTranslation => "audio_translation",
            Self::Realtime => "realtime",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 渠道身份（构建后不可变）
#[derive(Debug, Clone)]
pub struct ChannelBinding {
    pub id: i64,
    pub channel_type: ChannelType,
    pub base_url: String,
    pub proxy: Option<String>,
    pub header_override: Map<String, Value>,
}

impl ChannelBinding {
    #[must_use]
    pub fn new(id: i64, channel_type: ChannelType, base_url: impl Into<String>) -> Self {
        Self {
            id,
            channel_type,
            base_url: base_url.into(),
            proxy: None,
            header_override: Map::new(),
        }
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn with_header_override(mut self, header_override: Map<String, Value>) -> Self {
        self.header_override = header_override;
        self
    }
}

impl From<&ChannelConfig> for ChannelBinding {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            id: config.id,
            channel_type: config.channel_type,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            proxy: config.proxy.clone().filter(|p| !p.trim().is_empty()),
            header_override: config.header_override.clone(),
        }
    }
}

/// 单次中继请求的上下文
#[derive(Debug, Clone)]
pub struct RelayContext {
    request_id: String,
    channel: ChannelBinding,
    api_key: String,
    /// 客户端请求的模型
    pub origin_model_name: String,
    /// 实际发往上游的模型
    pub upstream_model_name: String,
    pub relay_mode: RelayMode,
    pub is_stream: bool,
    /// 关闭本次请求的流式心跳
    pub disable_ping: bool,
}

impl RelayContext {
    #[must_use]
    pub fn new(channel: ChannelBinding, api_key: impl Into<String>, relay_mode: RelayMode) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            channel,
            api_key: api_key.into(),
            origin_model_name: String::new(),
            upstream_model_name: String::new(),
            relay_mode,
            is_stream: false,
            disable_ping: false,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// 设置请求模型，上游模型默认与之相同
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.upstream_model_name.clone_from(&model);
        self.origin_model_name = model;
        self
    }

    #[must_use]
    pub const fn with_stream(mut self, is_stream: bool) -> Self {
        self.is_stream = is_stream;
        self
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub const fn channel(&self) -> &ChannelBinding {
        &self.channel
    }

    #[must_use]
    pub const fn channel_id(&self) -> i64 {
        self.channel.id
    }

    #[must_use]
    pub const fn channel_type(&self) -> ChannelType {
        self.channel.channel_type
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.channel.base_url
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.channel.proxy.as_deref()
    }

    /// 本次请求选中的渠道凭证
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub const fn headers_override(&self) -> &Map<String, Value> {
        &self.channel.header_override
    }
}

/// 入站客户端请求
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    cancel: CancellationToken,
    writer: Arc<ResponseWriter>,
}

impl ClientContext {
    #[must_use]
    pub const fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        writer: Arc<ResponseWriter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            cancel,
            writer,
        }
    }

    /// 入站请求头（非 UTF-8 视为不存在）
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 客户端断开时触发
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub const fn writer(&self) -> &Arc<ResponseWriter> {
        &self.writer
    }
}
